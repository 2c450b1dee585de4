use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "deptadmin.sqlite3";
pub const SCHEMA_VERSION: i64 = 2;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS persons(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // Role records share the person's id. Removing a person removes its roles.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS department_heads(
            person_id TEXT PRIMARY KEY,
            department TEXT,
            FOREIGN KEY(person_id) REFERENCES persons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS coordinators(
            person_id TEXT PRIMARY KEY,
            program TEXT,
            FOREIGN KEY(person_id) REFERENCES persons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lab_chiefs(
            person_id TEXT PRIMARY KEY,
            laboratory TEXT,
            FOREIGN KEY(person_id) REFERENCES persons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            person_id TEXT PRIMARY KEY,
            specialty TEXT,
            appogee TEXT,
            FOREIGN KEY(person_id) REFERENCES persons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            person_id TEXT PRIMARY KEY,
            position TEXT,
            FOREIGN KEY(person_id) REFERENCES persons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS technicians(
            person_id TEXT PRIMARY KEY,
            specialty TEXT,
            FOREIGN KEY(person_id) REFERENCES persons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            person_id TEXT PRIMARY KEY,
            student_no TEXT,
            address TEXT,
            level TEXT,
            FOREIGN KEY(person_id) REFERENCES persons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS administrators(
            person_id TEXT PRIMARY KEY,
            granted_at TEXT NOT NULL,
            FOREIGN KEY(person_id) REFERENCES persons(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            capacity INTEGER,
            kind TEXT,
            available INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            code TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            semester TEXT,
            year INTEGER,
            teacher_id TEXT,
            FOREIGN KEY(teacher_id) REFERENCES persons(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS chapters(
            id TEXT PRIMARY KEY,
            course_code TEXT NOT NULL,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(course_code) REFERENCES courses(code) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chapters_course ON chapters(course_code, sort_order)",
        [],
    )?;

    // Rooms in use cannot be deleted out from under a session or reservation.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            course_code TEXT NOT NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            room_id TEXT,
            kind TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            FOREIGN KEY(course_code) REFERENCES courses(code) ON DELETE CASCADE,
            FOREIGN KEY(room_id) REFERENCES rooms(id) ON DELETE RESTRICT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_course ON sessions(course_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS homework(
            id TEXT PRIMARY KEY,
            course_code TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            due_date TEXT,
            FOREIGN KEY(course_code) REFERENCES courses(code) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            enrolled_at TEXT NOT NULL,
            UNIQUE(student_id, course_code),
            FOREIGN KEY(student_id) REFERENCES persons(id) ON DELETE CASCADE,
            FOREIGN KEY(course_code) REFERENCES courses(code) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            course_code TEXT NOT NULL,
            title TEXT NOT NULL,
            kind TEXT,
            date TEXT,
            coefficient REAL NOT NULL DEFAULT 1,
            FOREIGN KEY(course_code) REFERENCES courses(code) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_course ON evaluations(course_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            evaluation_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            value REAL,
            updated_at TEXT,
            UNIQUE(evaluation_id, student_id),
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES persons(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS absences(
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            justified INTEGER NOT NULL DEFAULT 0,
            reason TEXT,
            UNIQUE(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE,
            FOREIGN KEY(student_id) REFERENCES persons(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS deliberations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            average REAL,
            decision TEXT NOT NULL,
            decided_by TEXT,
            decided_at TEXT NOT NULL,
            UNIQUE(student_id, course_code),
            FOREIGN KEY(student_id) REFERENCES persons(id) ON DELETE CASCADE,
            FOREIGN KEY(course_code) REFERENCES courses(code) ON DELETE CASCADE,
            FOREIGN KEY(decided_by) REFERENCES persons(id) ON DELETE SET NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS internships(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            company TEXT NOT NULL,
            subject TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            supervisor_id TEXT,
            status TEXT NOT NULL,
            report_submitted INTEGER NOT NULL DEFAULT 0,
            report_submitted_at TEXT,
            defense_date TEXT,
            jury_json TEXT,
            grade REAL,
            diploma_authorized_at TEXT,
            diploma_delivered_at TEXT,
            FOREIGN KEY(student_id) REFERENCES persons(id) ON DELETE CASCADE,
            FOREIGN KEY(supervisor_id) REFERENCES persons(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_internships_student ON internships(student_id)",
        [],
    )?;

    // Reporters stay attached to their incidents; technicians may leave.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS incidents(
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            room_id TEXT,
            submitted_at TEXT NOT NULL,
            status TEXT NOT NULL,
            priority TEXT NOT NULL,
            reporter_id TEXT NOT NULL,
            technician_id TEXT,
            assigned_at TEXT,
            started_at TEXT,
            solution TEXT,
            resolved_at TEXT,
            closed_at TEXT,
            FOREIGN KEY(room_id) REFERENCES rooms(id) ON DELETE SET NULL,
            FOREIGN KEY(reporter_id) REFERENCES persons(id) ON DELETE RESTRICT,
            FOREIGN KEY(technician_id) REFERENCES persons(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS incident_history(
            id TEXT PRIMARY KEY,
            incident_id TEXT NOT NULL,
            at TEXT NOT NULL,
            from_status TEXT,
            to_status TEXT NOT NULL,
            actor_id TEXT,
            note TEXT,
            FOREIGN KEY(incident_id) REFERENCES incidents(id) ON DELETE CASCADE,
            FOREIGN KEY(actor_id) REFERENCES persons(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_incident_history_incident ON incident_history(incident_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reservations(
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            requester_id TEXT NOT NULL,
            requested_at TEXT NOT NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            purpose TEXT,
            status TEXT NOT NULL,
            decided_at TEXT,
            decided_by TEXT,
            rejection_reason TEXT,
            FOREIGN KEY(room_id) REFERENCES rooms(id) ON DELETE RESTRICT,
            FOREIGN KEY(requester_id) REFERENCES persons(id) ON DELETE CASCADE,
            FOREIGN KEY(decided_by) REFERENCES persons(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reservations_room_date ON reservations(room_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS laboratories(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            chief_id TEXT,
            FOREIGN KEY(chief_id) REFERENCES persons(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lab_equipment(
            id TEXT PRIMARY KEY,
            laboratory_id TEXT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'available',
            FOREIGN KEY(laboratory_id) REFERENCES laboratories(id) ON DELETE CASCADE
        )",
        [],
    )?;

    migrate(&conn)?;

    Ok(conn)
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    // v1 workspaces predate the incident room link.
    if !table_has_column(conn, "incidents", "room_id")? {
        conn.execute("ALTER TABLE incidents ADD COLUMN room_id TEXT", [])?;
    }

    conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    Ok(())
}

pub fn schema_version(conn: &Connection) -> anyhow::Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}

pub fn meta_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM meta WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn meta_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO meta(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
