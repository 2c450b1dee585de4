#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("deptadmin-backup-src");
    let workspace2 = temp_dir("deptadmin-backup-dst");
    let out_dir = temp_dir("deptadmin-backup-out");

    let db_src = workspace.join("deptadmin.sqlite3");
    let bytes = b"sqlite-test-payload";
    std::fs::write(&db_src, bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/deptadmin.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let db_dst = workspace2.join("deptadmin.sqlite3");
    let restored = std::fs::read(&db_dst).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn bundle_with_wrong_digest_is_rejected() {
    let out_dir = temp_dir("deptadmin-backup-digest");
    let workspace = temp_dir("deptadmin-backup-digest-dst");
    let existing = b"existing-database";
    std::fs::write(workspace.join("deptadmin.sqlite3"), existing).expect("write existing db");

    let bundle_path = out_dir.join("tampered.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("start manifest");
        zip.write_all(
            serde_json::json!({
                "format": backup::BUNDLE_FORMAT_V1,
                "version": 1,
                "dbSha256": "0000000000000000000000000000000000000000000000000000000000000000"
            })
            .to_string()
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/deptadmin.sqlite3", opts).expect("start db");
        zip.write_all(b"tampered-payload").expect("write db");
        zip.finish().expect("finish zip");
    }

    let err = backup::import_workspace_bundle(&bundle_path, &workspace)
        .expect_err("digest mismatch must fail");
    assert!(err.to_string().contains("digest mismatch"));

    let kept = std::fs::read(workspace.join("deptadmin.sqlite3")).expect("read kept db");
    assert_eq!(kept, existing);
    assert!(!workspace.join("deptadmin.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bare_sqlite_import_is_supported() {
    let out_dir = temp_dir("deptadmin-backup-bare");
    let workspace = temp_dir("deptadmin-backup-bare-dst");

    let bare_file = out_dir.join("copy.sqlite3");
    let mut bytes = b"SQLite format 3\0".to_vec();
    bytes.extend_from_slice(b"rest-of-database");
    std::fs::write(&bare_file, &bytes).expect("write sqlite file");

    let import = backup::import_workspace_bundle(&bare_file, &workspace).expect("import sqlite");
    assert_eq!(import.bundle_format_detected, "sqlite3");

    let restored = std::fs::read(workspace.join("deptadmin.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_input_is_rejected() {
    let out_dir = temp_dir("deptadmin-backup-unknown");
    let workspace = temp_dir("deptadmin-backup-unknown-dst");

    let junk = out_dir.join("notes.txt");
    std::fs::write(&junk, b"just some notes").expect("write junk");
    assert!(backup::import_workspace_bundle(&junk, &workspace).is_err());
    assert!(!workspace.join("deptadmin.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn json_export_import_through_rusqlite() {
    let src = rusqlite::Connection::open_in_memory().expect("open src");
    let dst = rusqlite::Connection::open_in_memory().expect("open dst");
    for conn in [&src, &dst] {
        conn.execute_batch("PRAGMA foreign_keys = ON").expect("fk on");
        for table in backup::BACKUP_TABLES {
            let sql = if *table == "meta" {
                "CREATE TABLE meta(key TEXT PRIMARY KEY, value_json TEXT NOT NULL)".to_string()
            } else {
                format!("CREATE TABLE {}(id TEXT PRIMARY KEY, note TEXT, score REAL)", table)
            };
            conn.execute_batch(&sql).expect("create table");
        }
    }
    src.execute_batch(
        "INSERT INTO meta VALUES('auth.signingKey', '\"src-secret\"');
         INSERT INTO meta VALUES('department.name', '\"Physics\"');",
    )
    .expect("seed src meta");
    dst.execute("INSERT INTO meta VALUES('auth.signingKey', '\"dst-secret\"')", [])
        .expect("seed dst meta");
    src.execute(
        "INSERT INTO rooms(id, note, score) VALUES('r1', 'ground floor', 1.5)",
        [],
    )
    .expect("insert room");
    src.execute("INSERT INTO persons(id, note) VALUES('p1', NULL)", [])
        .expect("insert person");

    let doc = backup::export_tables_json(&src).expect("export");
    assert_eq!(doc["tables"]["rooms"][0]["note"], "ground floor");
    let meta = doc["tables"]["meta"].as_array().expect("meta rows");
    assert_eq!(meta.len(), 1);
    assert_eq!(meta[0]["key"], "department.name");

    let counts = backup::import_tables_json(&dst, &doc).expect("import");
    assert_eq!(counts.counts.get("rooms"), Some(&1));
    assert_eq!(counts.counts.get("persons"), Some(&1));
    assert_eq!(counts.counts.get("grades"), Some(&0));
    assert_eq!(counts.counts.get("meta"), Some(&2));
    let kept: String = dst
        .query_row("SELECT value_json FROM meta WHERE key = 'auth.signingKey'", [], |r| r.get(0))
        .expect("signing key kept");
    assert_eq!(kept, "\"dst-secret\"");

    let score: f64 = dst
        .query_row("SELECT score FROM rooms WHERE id = 'r1'", [], |r| r.get(0))
        .expect("score");
    assert_eq!(score, 1.5);

    let bad = serde_json::json!({ "tables": { "rooms": {} } });
    assert!(backup::import_tables_json(&dst, &bad).is_err());
}
