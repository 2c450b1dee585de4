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

fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        stdin,
        reader,
        "student",
        "persons.create",
        json!({ "name": "Yasmine Student", "email": "yasmine@dept.test", "role": "student" }),
    );
    let internship = request_ok(
        stdin,
        reader,
        "internship",
        "internships.create",
        json!({
            "studentId": id_of(&student),
            "company": "Orbit Systems",
            "subject": "Static analysis of firmware",
            "startDate": "2026-02-01",
            "endDate": "2026-07-31"
        }),
    );
    assert_eq!(internship["status"], json!("in_progress"));
    id_of(&internship)
}

#[test]
fn diploma_gate_blocks_below_pass_mark_and_opens_at_ten() {
    let workspace = temp_dir("deptadmin-internship-gate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let internship_id = open_workspace(&mut stdin, &mut reader, &workspace);

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "internships.submitReport",
        json!({ "internshipId": internship_id }),
    );
    assert_eq!(submitted["status"], json!("report_submitted"));
    assert_eq!(submitted["reportSubmitted"], json!(true));

    let scheduled = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "internships.scheduleDefense",
        json!({ "internshipId": internship_id, "defenseDate": "2026-09-15", "jury": ["Dr. Amrani", "Dr. Benali"] }),
    );
    assert_eq!(scheduled["status"], json!("defense_scheduled"));
    assert_eq!(scheduled["jury"].as_array().map(|a| a.len()), Some(2));

    let failed_grade = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "internships.recordGrade",
        json!({ "internshipId": internship_id, "grade": 9.5 }),
    );
    assert_eq!(failed_grade["status"], json!("not_validated"));

    let blocked = request(
        &mut stdin,
        &mut reader,
        "4",
        "internships.authorizeDiploma",
        json!({ "internshipId": internship_id }),
    );
    assert_eq!(error_code(&blocked), "gate_failed");
    assert_eq!(
        blocked["error"]["details"]["unmet"],
        json!(["grade_below_pass_mark"])
    );

    // Nothing was written by the failed authorization.
    let unchanged = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "internships.get",
        json!({ "internshipId": internship_id }),
    );
    assert_eq!(unchanged["status"], json!("not_validated"));
    assert!(unchanged["diplomaAuthorizedAt"].is_null());
    assert_eq!(unchanged["diplomaGate"]["ready"], json!(false));

    let passed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "internships.recordGrade",
        json!({ "internshipId": internship_id, "grade": 10 }),
    );
    assert_eq!(passed["status"], json!("validated"));

    let authorized = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "internships.authorizeDiploma",
        json!({ "internshipId": internship_id }),
    );
    assert_eq!(authorized["status"], json!("diploma_authorized"));
    assert!(authorized["diplomaAuthorizedAt"].is_string());

    let twice = request(
        &mut stdin,
        &mut reader,
        "8",
        "internships.authorizeDiploma",
        json!({ "internshipId": internship_id }),
    );
    assert_eq!(error_code(&twice), "invalid_transition");

    let delivered = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "internships.deliverDiploma",
        json!({ "internshipId": internship_id }),
    );
    assert_eq!(delivered["status"], json!("diploma_delivered"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn diploma_gate_lists_every_unmet_condition() {
    let workspace = temp_dir("deptadmin-internship-unmet");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let internship_id = open_workspace(&mut stdin, &mut reader, &workspace);

    let blocked = request(
        &mut stdin,
        &mut reader,
        "1",
        "internships.authorizeDiploma",
        json!({ "internshipId": internship_id }),
    );
    assert_eq!(error_code(&blocked), "gate_failed");
    assert_eq!(
        blocked["error"]["details"]["unmet"],
        json!(["report_not_submitted", "defense_not_scheduled", "grade_missing"])
    );

    let early_defense = request(
        &mut stdin,
        &mut reader,
        "2",
        "internships.scheduleDefense",
        json!({ "internshipId": internship_id, "defenseDate": "2026-09-15", "jury": ["Dr. Amrani"] }),
    );
    assert_eq!(error_code(&early_defense), "invalid_transition");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "internships.submitReport",
        json!({ "internshipId": internship_id }),
    );
    let empty_jury = request(
        &mut stdin,
        &mut reader,
        "4",
        "internships.scheduleDefense",
        json!({ "internshipId": internship_id, "defenseDate": "2026-09-15", "jury": [] }),
    );
    assert_eq!(error_code(&empty_jury), "bad_params");

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "5",
        "internships.recordGrade",
        json!({ "internshipId": internship_id, "grade": 21 }),
    );
    assert_eq!(error_code(&out_of_range), "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "internships.list",
        json!({ "status": "report_submitted" }),
    );
    assert_eq!(listed["internships"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
