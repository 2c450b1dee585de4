use crate::calc;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, optional_enum, optional_f64, optional_str, required_str, session, to_value};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use crate::workflow::deliberation::{self, Decision};
use crate::workflow::{fmt_date, has_role, now_stamp, parse_date};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn evaluation_course(conn: &Connection, evaluation_id: &str) -> AppResult<String> {
    conn.query_row(
        "SELECT course_code FROM evaluations WHERE id = ?",
        [evaluation_id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("evaluation", evaluation_id))
}

fn require_course(conn: &Connection, code: &str) -> AppResult<()> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE code = ?", [code], |r| r.get(0))
        .optional()?;
    found
        .map(|_| ())
        .ok_or_else(|| AppError::not_found("course", code))
}

fn handle_evaluations_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "courseCode")?;
    let title = required_str(&req.params, "title")?;
    let kind = optional_str(&req.params, "kind");
    let date = optional_str(&req.params, "date")
        .map(|d| parse_date(&d).map(fmt_date))
        .transpose()?;
    let coefficient = optional_f64(&req.params, "coefficient")?.unwrap_or(1.0);
    if !coefficient.is_finite() || coefficient < 0.0 {
        return Err(AppError::bad_params("coefficient must be a non-negative number"));
    }
    require_course(conn, &code)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO evaluations(id, course_code, title, kind, date, coefficient)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &code, &title, &kind, &date, coefficient),
    )?;
    info!(evaluation = %id, course = %code, "evaluation created");
    Ok(json!({
        "id": id,
        "courseCode": code,
        "title": title,
        "kind": kind,
        "date": date,
        "coefficient": coefficient
    }))
}

fn handle_evaluations_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "courseCode")?;
    require_course(conn, &code)?;
    let mut stmt = conn.prepare(
        "SELECT e.id, e.title, e.kind, e.date, e.coefficient,
           (SELECT COUNT(*) FROM grades g WHERE g.evaluation_id = e.id AND g.value IS NOT NULL)
         FROM evaluations e WHERE e.course_code = ? ORDER BY e.date, e.title",
    )?;
    let evaluations = stmt
        .query_map([&code], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "kind": r.get::<_, Option<String>>(2)?,
                "date": r.get::<_, Option<String>>(3)?,
                "coefficient": r.get::<_, f64>(4)?,
                "gradedCount": r.get::<_, i64>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "evaluations": evaluations }))
}

/// `value: null` records that the student was evaluated but not graded yet.
fn handle_grades_set(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let evaluation_id = required_str(&req.params, "evaluationId")?;
    let student_id = required_str(&req.params, "studentId")?;
    let value = optional_f64(&req.params, "value")?;
    if let Some(v) = value {
        if !v.is_finite() || !(0.0..=20.0).contains(&v) {
            return Err(AppError::bad_params("grade must be between 0 and 20")
                .with_details(json!({ "value": v })));
        }
    }
    evaluation_course(conn, &evaluation_id)?;
    if !has_role(conn, &student_id, Role::Student)? {
        return Err(AppError::not_found("student", &student_id));
    }

    conn.execute(
        "INSERT INTO grades(id, evaluation_id, student_id, value, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(evaluation_id, student_id) DO UPDATE SET
           value = excluded.value,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            &evaluation_id,
            &student_id,
            value,
            now_stamp(),
        ),
    )?;
    Ok(json!({
        "evaluationId": evaluation_id,
        "studentId": student_id,
        "value": value
    }))
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let evaluation_id = required_str(&req.params, "evaluationId")?;
    evaluation_course(conn, &evaluation_id)?;
    let mut stmt = conn.prepare(
        "SELECT g.student_id, p.name, g.value, g.updated_at
         FROM grades g JOIN persons p ON p.id = g.student_id
         WHERE g.evaluation_id = ? ORDER BY p.name",
    )?;
    let grades = stmt
        .query_map([&evaluation_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "studentName": r.get::<_, String>(1)?,
                "value": r.get::<_, Option<f64>>(2)?,
                "updatedAt": r.get::<_, Option<String>>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "evaluationId": evaluation_id, "grades": grades }))
}

fn handle_grades_average(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let code = required_str(&req.params, "courseCode")?;
    require_course(conn, &code)?;
    let outcome = calc::course_outcome(conn, &student_id, &code)?;
    to_value(&outcome)
}

fn handle_absences_record(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let session_id = required_str(&req.params, "sessionId")?;
    let student_id = required_str(&req.params, "studentId")?;
    let reason = optional_str(&req.params, "reason");
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM sessions WHERE id = ?", [&session_id], |r| r.get(0))
        .optional()?;
    if found.is_none() {
        return Err(AppError::not_found("session", &session_id));
    }
    if !has_role(conn, &student_id, Role::Student)? {
        return Err(AppError::not_found("student", &student_id));
    }

    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO absences(id, session_id, student_id, justified, reason) VALUES(?, ?, ?, 0, ?)
         ON CONFLICT(session_id, student_id) DO NOTHING",
        (&id, &session_id, &student_id, &reason),
    )?;
    Ok(json!({
        "sessionId": session_id,
        "studentId": student_id,
        "created": inserted > 0
    }))
}

fn handle_absences_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let (filter_sql, key) = match (
        optional_str(&req.params, "sessionId"),
        optional_str(&req.params, "studentId"),
    ) {
        (Some(s), _) => ("a.session_id = ?", s),
        (None, Some(st)) => ("a.student_id = ?", st),
        (None, None) => return Err(AppError::bad_params("sessionId or studentId is required")),
    };
    let sql = format!(
        "SELECT a.id, a.session_id, a.student_id, s.course_code, s.date, a.justified, a.reason
         FROM absences a JOIN sessions s ON s.id = a.session_id
         WHERE {} ORDER BY s.date, s.start_time",
        filter_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let absences = stmt
        .query_map([&key], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "sessionId": r.get::<_, String>(1)?,
                "studentId": r.get::<_, String>(2)?,
                "courseCode": r.get::<_, String>(3)?,
                "date": r.get::<_, String>(4)?,
                "justified": r.get::<_, i64>(5)? != 0,
                "reason": r.get::<_, Option<String>>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "absences": absences }))
}

fn handle_absences_justify(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let absence_id = required_str(&req.params, "absenceId")?;
    let reason = required_str(&req.params, "reason")?;
    let changed = conn.execute(
        "UPDATE absences SET justified = 1, reason = ? WHERE id = ?",
        (&reason, &absence_id),
    )?;
    if changed == 0 {
        return Err(AppError::not_found("absence", &absence_id));
    }
    Ok(json!({ "absenceId": absence_id, "justified": true, "reason": reason }))
}

fn handle_deliberations_run(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let conn = conn(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let code = required_str(&req.params, "courseCode")?;
    let explicit = optional_enum(&req.params, "decision", Decision::parse)?;
    require_course(conn, &code)?;
    let result = deliberation::deliberate(conn, &student_id, &code, &session.user_id, explicit)?;
    to_value(&result)
}

fn handle_deliberations_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "courseCode")?;
    require_course(conn, &code)?;
    Ok(json!({
        "deliberations": to_value(&deliberation::list_for_course(conn, &code)?)?
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "evaluations.create" => handle_evaluations_create(state, req),
        "evaluations.list" => handle_evaluations_list(state, req),
        "grades.set" => handle_grades_set(state, req),
        "grades.list" => handle_grades_list(state, req),
        "grades.average" => handle_grades_average(state, req),
        "absences.record" => handle_absences_record(state, req),
        "absences.list" => handle_absences_list(state, req),
        "absences.justify" => handle_absences_justify(state, req),
        "deliberations.run" => handle_deliberations_run(state, req),
        "deliberations.list" => handle_deliberations_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
