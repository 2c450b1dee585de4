use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_deptadmind");
    let mut child = Command::new(exe)
        .env_remove("DEPTADMIN_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn deptadmind");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(json!({}))
}

fn error_code(resp: &serde_json::Value) -> String {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false), "expected error: {}", resp);
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn id_of(v: &serde_json::Value) -> String {
    v.get("id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string()
}

fn setup_person(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    tag: &str,
    role: &str,
) -> (String, String) {
    let email = format!("{}@dept.test", tag);
    let person = request_ok(
        stdin,
        reader,
        &format!("{}-create", tag),
        "persons.create",
        json!({ "name": tag, "email": email, "role": role }),
    );
    let login = request_ok(
        stdin,
        reader,
        &format!("{}-login", tag),
        "auth.login",
        json!({ "email": email }),
    );
    let token = login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string();
    (id_of(&person), token)
}

fn table_count(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    table: &str,
) -> i64 {
    let info = request_ok(stdin, reader, id, "workspace.info", json!({}));
    info["tables"][table]
        .as_i64()
        .unwrap_or_else(|| panic!("missing count for {}", table))
}

#[test]
fn deleting_a_course_cascades_to_its_children() {
    let workspace = temp_dir("deptadmin-integrity-cascade");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (student_id, _) = setup_person(&mut stdin, &mut reader, "student", "student");
    let (teacher_id, _) = setup_person(&mut stdin, &mut reader, "teacher", "teacher");
    let room = request_ok(&mut stdin, &mut reader, "2", "rooms.create", json!({ "name": "E-7" }));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "courses.create",
        json!({ "code": "DB300", "title": "Databases", "teacherId": teacher_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chapters.create",
        json!({ "courseCode": "DB300", "title": "Normal forms" }),
    );
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.create",
        json!({ "courseCode": "DB300", "date": "2026-10-14", "start": "10:00", "end": "12:00", "roomId": id_of(&room) }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "homework.create",
        json!({ "courseCode": "DB300", "title": "Schema design" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "enrollments.create",
        json!({ "studentId": student_id, "courseCode": "DB300" }),
    );
    let evaluation = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "evaluations.create",
        json!({ "courseCode": "DB300", "title": "Project" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "grades.set",
        json!({ "evaluationId": id_of(&evaluation), "studentId": student_id, "value": 15 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "absences.record",
        json!({ "sessionId": id_of(&session), "studentId": student_id }),
    );

    // A session holds the room.
    let held = request(
        &mut stdin,
        &mut reader,
        "11",
        "rooms.delete",
        json!({ "roomId": id_of(&room) }),
    );
    assert_eq!(error_code(&held), "restricted");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "courses.delete",
        json!({ "code": "DB300" }),
    );
    for (i, table) in [
        "courses",
        "chapters",
        "sessions",
        "homework",
        "enrollments",
        "evaluations",
        "grades",
        "absences",
    ]
    .iter()
    .enumerate()
    {
        assert_eq!(
            table_count(&mut stdin, &mut reader, &format!("count-{}", i), table),
            0,
            "{} should be empty",
            table
        );
    }
    assert_eq!(table_count(&mut stdin, &mut reader, "13", "persons"), 2);

    let gone = request(
        &mut stdin,
        &mut reader,
        "14",
        "courses.get",
        json!({ "code": "DB300" }),
    );
    assert_eq!(error_code(&gone), "not_found");

    // With the session gone the room is free to go.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "rooms.delete",
        json!({ "roomId": id_of(&room) }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn referenced_rooms_and_reporters_are_restricted() {
    let workspace = temp_dir("deptadmin-integrity-restrict");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (staff_id, staff_token) = setup_person(&mut stdin, &mut reader, "staff", "staff");
    let (teacher_id, _) = setup_person(&mut stdin, &mut reader, "teacher", "teacher");
    let booked = request_ok(&mut stdin, &mut reader, "2", "rooms.create", json!({ "name": "F-1" }));
    let broken = request_ok(&mut stdin, &mut reader, "3", "rooms.create", json!({ "name": "F-2" }));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reservations.create",
        json!({ "token": staff_token, "roomId": id_of(&booked), "date": "2026-12-01", "start": "09:00", "end": "11:00" }),
    );
    let incident = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "incidents.create",
        json!({ "token": staff_token, "description": "Window will not close", "roomId": id_of(&broken) }),
    );

    let restricted = request(
        &mut stdin,
        &mut reader,
        "6",
        "rooms.delete",
        json!({ "roomId": id_of(&booked) }),
    );
    assert_eq!(error_code(&restricted), "restricted");

    // Incidents only point at a room; deleting it clears the link.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "rooms.delete",
        json!({ "roomId": id_of(&broken) }),
    );
    let detached = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "incidents.get",
        json!({ "incidentId": id_of(&incident) }),
    );
    assert!(detached["roomId"].is_null());

    let reporter = request(
        &mut stdin,
        &mut reader,
        "9",
        "persons.delete",
        json!({ "personId": staff_id }),
    );
    assert_eq!(error_code(&reporter), "restricted");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "courses.create",
        json!({ "code": "SE400", "title": "Software Engineering", "teacherId": teacher_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "persons.delete",
        json!({ "personId": teacher_id }),
    );
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "courses.get",
        json!({ "code": "SE400" }),
    );
    assert!(course["teacherId"].is_null());
    assert_eq!(table_count(&mut stdin, &mut reader, "13", "teachers"), 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
