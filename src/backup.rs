use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/deptadmin.sqlite3";
const DB_FILE_NAME: &str = "deptadmin.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "deptadmin-workspace-v1";
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Meta rows under this prefix hold workspace secrets. They never leave the
/// workspace and survive a restore.
const RESERVED_META_PREFIX: &str = "auth.";
const META_TABLE: &str = "meta";

/// Every table, parents before children. Import inserts the named tables in
/// this order and clears them in reverse.
pub const BACKUP_TABLES: &[&str] = &[
    "persons",
    "department_heads",
    "coordinators",
    "lab_chiefs",
    "teachers",
    "staff",
    "technicians",
    "students",
    "administrators",
    "rooms",
    "courses",
    "chapters",
    "sessions",
    "homework",
    "enrollments",
    "evaluations",
    "grades",
    "absences",
    "deliberations",
    "internships",
    "incidents",
    "incident_history",
    "reservations",
    "laboratories",
    "lab_equipment",
    "meta",
];

#[derive(Debug, Clone)]
pub struct TableCounts {
    pub counts: BTreeMap<String, usize>,
}

impl TableCounts {
    pub fn to_json(&self) -> serde_json::Value {
        json!(self.counts)
    }
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

pub fn row_counts(conn: &Connection) -> anyhow::Result<TableCounts> {
    let mut counts = BTreeMap::new();
    for table in BACKUP_TABLES {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
            r.get(0)
        })?;
        counts.insert(table.to_string(), n as usize);
    }
    Ok(TableCounts { counts })
}

fn sql_to_json(v: ValueRef<'_>) -> serde_json::Value {
    match v {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => json!(b),
    }
}

fn json_to_sql(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => {
            let bytes: Option<Vec<u8>> = items
                .iter()
                .map(|i| i.as_u64().and_then(|n| u8::try_from(n).ok()))
                .collect();
            match bytes {
                Some(b) => Value::Blob(b),
                None => Value::Text(v.to_string()),
            }
        }
        serde_json::Value::Object(_) => Value::Text(v.to_string()),
    }
}

fn is_reserved_meta(row: &serde_json::Map<String, serde_json::Value>) -> bool {
    row.get("key")
        .and_then(|v| v.as_str())
        .is_some_and(|k| k.starts_with(RESERVED_META_PREFIX))
}

fn table_columns(conn: &Connection, table: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let cols = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols)
}

/// `{timestamp, schemaVersion, tables: {name: [rows]}}`
pub fn export_tables_json(conn: &Connection) -> anyhow::Result<serde_json::Value> {
    let mut tables = serde_json::Map::new();
    for table in BACKUP_TABLES {
        let sql = if *table == META_TABLE {
            format!(
                "SELECT * FROM {} WHERE key NOT LIKE '{}%' ORDER BY rowid",
                table, RESERVED_META_PREFIX
            )
        } else {
            format!("SELECT * FROM {} ORDER BY rowid", table)
        };
        let mut stmt = conn
            .prepare(&sql)
            .with_context(|| format!("failed to read table {}", table))?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut obj = serde_json::Map::new();
            for (i, name) in names.iter().enumerate() {
                obj.insert(name.clone(), sql_to_json(row.get_ref(i)?));
            }
            out.push(serde_json::Value::Object(obj));
        }
        tables.insert(table.to_string(), serde_json::Value::Array(out));
    }
    let schema_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(json!({
        "timestamp": Utc::now().to_rfc3339(),
        "schemaVersion": schema_version,
        "tables": tables,
    }))
}

pub fn export_tables_json_file(conn: &Connection, out_path: &Path) -> anyhow::Result<TableCounts> {
    let doc = export_tables_json(conn)?;
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let text = serde_json::to_string_pretty(&doc).context("failed to serialize backup")?;
    std::fs::write(out_path, text)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
    row_counts(conn)
}

/// Reloads each table named in `doc` with its rows. Tables the document does
/// not name are left alone. Runs in one transaction; foreign keys are checked
/// at commit, so a partial backup that orphans rows is rolled back.
pub fn import_tables_json(
    conn: &Connection,
    doc: &serde_json::Value,
) -> anyhow::Result<TableCounts> {
    let tables = doc
        .get("tables")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow!("backup is missing the tables object"))?;
    for (name, rows) in tables {
        if !BACKUP_TABLES.contains(&name.as_str()) {
            bail!("unknown table in backup: {}", name);
        }
        if !rows.is_array() {
            bail!("table {} must be an array of rows", name);
        }
    }

    let named: Vec<&str> = BACKUP_TABLES
        .iter()
        .copied()
        .filter(|t| tables.contains_key(*t))
        .collect();

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch("PRAGMA defer_foreign_keys = ON")?;
    for table in named.iter().rev() {
        let sql = if *table == META_TABLE {
            format!(
                "DELETE FROM {} WHERE key NOT LIKE '{}%'",
                table, RESERVED_META_PREFIX
            )
        } else {
            format!("DELETE FROM {}", table)
        };
        tx.execute(&sql, [])
            .with_context(|| format!("failed to clear table {}", table))?;
    }

    for table in &named {
        let Some(rows) = tables.get(*table).and_then(|v| v.as_array()) else {
            continue;
        };
        let known = table_columns(&tx, table)?;
        for (idx, row) in rows.iter().enumerate() {
            let obj = row
                .as_object()
                .ok_or_else(|| anyhow!("{}[{}] is not an object", table, idx))?;
            if *table == META_TABLE && is_reserved_meta(obj) {
                continue;
            }
            let (cols, vals): (Vec<&String>, Vec<Value>) = obj
                .iter()
                .filter(|(k, _)| known.iter().any(|c| c == *k))
                .map(|(k, v)| (k, json_to_sql(v)))
                .unzip();
            if cols.is_empty() {
                bail!("{}[{}] has no known columns", table, idx);
            }
            let sql = format!(
                "INSERT INTO {}({}) VALUES({})",
                table,
                cols.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", "),
                vec!["?"; cols.len()].join(", ")
            );
            tx.execute(&sql, params_from_iter(vals))
                .with_context(|| format!("failed to insert {}[{}]", table, idx))?;
        }
    }
    tx.commit().context("backup violates referential integrity")?;
    row_counts(conn)
}

pub fn import_tables_json_file(conn: &Connection, in_path: &Path) -> anyhow::Result<TableCounts> {
    let text = std::fs::read_to_string(in_path)
        .with_context(|| format!("failed to read {}", in_path.to_string_lossy()))?;
    let doc: serde_json::Value = serde_json::from_str(&text).context("backup is not valid JSON")?;
    import_tables_json(conn, &doc)
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut f, &mut hasher).context("failed to hash database")?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let db_sha256 = sha256_file(&db_path)?;
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": Utc::now().to_rfc3339(),
        "dbSha256": db_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2,
        db_sha256,
    })
}

/// Accepts a zip bundle or a bare SQLite file. The caller must close any open
/// connection to the workspace database first.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE_NAME);

    let sig = read_signature(in_path)?;
    if sig.starts_with(SQLITE_HEADER) {
        std::fs::copy(in_path, &dst).with_context(|| {
            format!(
                "failed to copy sqlite database from {} to {}",
                in_path.to_string_lossy(),
                dst.to_string_lossy()
            )
        })?;
        return Ok(ImportSummary {
            bundle_format_detected: "sqlite3".to_string(),
        });
    }
    if !sig.starts_with(&[0x50, 0x4B, 0x03, 0x04]) {
        bail!("input is neither a workspace bundle nor a sqlite database");
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE_NAME));
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let mut db_out = File::create(&tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing db/deptadmin.sqlite3")?;
        std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
    }
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    drop(db_out);

    if let Some(expected) = manifest.get("dbSha256").and_then(|v| v.as_str()) {
        let actual = sha256_file(&tmp_dst)?;
        if actual != expected {
            let _ = std::fs::remove_file(&tmp_dst);
            bail!("database digest mismatch: expected {}, got {}", expected, actual);
        }
    }

    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
    })
}

fn read_signature(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 16];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    Ok(sig[..read].to_vec())
}
