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

#[test]
fn incident_moves_strictly_forward_with_history() {
    let workspace = temp_dir("deptadmin-incident-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (teacher_id, teacher_token) = setup_person(&mut stdin, &mut reader, "reporter", "teacher");
    let (tech_id, tech_token) = setup_person(&mut stdin, &mut reader, "tech", "technician");
    let (tech2_id, _) = setup_person(&mut stdin, &mut reader, "tech2", "technician");
    let (_, head_token) = setup_person(&mut stdin, &mut reader, "head", "departmentHead");
    let room = request_ok(&mut stdin, &mut reader, "2", "rooms.create", json!({ "name": "Lab 2" }));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "incidents.create",
        json!({ "token": teacher_token, "description": "Network switch down", "priority": "high", "roomId": id_of(&room) }),
    );
    let incident_id = id_of(&created);
    assert_eq!(created["status"], json!("submitted"));
    assert_eq!(created["priority"], json!("high"));
    assert_eq!(created["reporterId"], json!(teacher_id));
    assert!(created["technicianId"].is_null());

    let skipped = request(
        &mut stdin,
        &mut reader,
        "4",
        "incidents.resolve",
        json!({ "token": tech_token, "incidentId": incident_id, "solution": "Rebooted" }),
    );
    assert_eq!(error_code(&skipped), "invalid_transition");

    let not_a_technician = request(
        &mut stdin,
        &mut reader,
        "5",
        "incidents.assign",
        json!({ "token": head_token, "incidentId": incident_id, "technicianId": teacher_id }),
    );
    assert_eq!(error_code(&not_a_technician), "invalid_assignee");

    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "incidents.assign",
        json!({ "token": head_token, "incidentId": incident_id, "technicianId": tech_id }),
    );
    assert_eq!(assigned["status"], json!("assigned"));
    assert_eq!(assigned["technicianId"], json!(tech_id));

    let reassigned = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "incidents.assign",
        json!({ "token": head_token, "incidentId": incident_id, "technicianId": tech2_id }),
    );
    assert_eq!(reassigned["technicianId"], json!(tech2_id));

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "incidents.start",
        json!({ "token": tech_token, "incidentId": incident_id }),
    );
    assert_eq!(started["status"], json!("in_progress"));

    let no_solution = request(
        &mut stdin,
        &mut reader,
        "9",
        "incidents.resolve",
        json!({ "token": tech_token, "incidentId": incident_id, "solution": "  " }),
    );
    assert_eq!(error_code(&no_solution), "bad_params");

    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "incidents.resolve",
        json!({ "token": tech_token, "incidentId": incident_id, "solution": "Replaced power supply" }),
    );
    assert_eq!(resolved["status"], json!("resolved"));
    assert_eq!(resolved["solution"], json!("Replaced power supply"));
    assert!(resolved["resolvedAt"].is_string());

    let closed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "incidents.close",
        json!({ "token": head_token, "incidentId": incident_id }),
    );
    assert_eq!(closed["status"], json!("closed"));

    let reopened = request(
        &mut stdin,
        &mut reader,
        "12",
        "incidents.start",
        json!({ "token": tech_token, "incidentId": incident_id }),
    );
    assert_eq!(error_code(&reopened), "invalid_transition");

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "incidents.get",
        json!({ "incidentId": incident_id }),
    );
    let steps: Vec<&str> = detail["history"]
        .as_array()
        .expect("history")
        .iter()
        .map(|h| h["toStatus"].as_str().unwrap_or(""))
        .collect();
    assert_eq!(
        steps,
        vec!["submitted", "assigned", "assigned", "in_progress", "resolved", "closed"]
    );

    let by_tech = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "incidents.list",
        json!({ "technicianId": tech2_id, "status": "closed" }),
    );
    assert_eq!(by_tech["incidents"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn incident_requires_session_and_valid_priority() {
    let workspace = temp_dir("deptadmin-incident-params");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (_, token) = setup_person(&mut stdin, &mut reader, "reporter", "staff");

    let anonymous = request(
        &mut stdin,
        &mut reader,
        "2",
        "incidents.create",
        json!({ "description": "Leaking tap" }),
    );
    assert_eq!(error_code(&anonymous), "unauthorized");

    let bad_priority = request(
        &mut stdin,
        &mut reader,
        "3",
        "incidents.create",
        json!({ "token": token, "description": "Leaking tap", "priority": "whenever" }),
    );
    assert_eq!(error_code(&bad_priority), "bad_params");

    let unknown_room = request(
        &mut stdin,
        &mut reader,
        "4",
        "incidents.create",
        json!({ "token": token, "description": "Leaking tap", "roomId": "missing-room" }),
    );
    assert_eq!(error_code(&unknown_room), "not_found");

    let defaulted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "incidents.create",
        json!({ "token": token, "description": "Leaking tap" }),
    );
    assert_eq!(defaulted["priority"], json!("normal"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
