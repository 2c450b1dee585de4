use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, optional_enum, optional_str, required_f64, required_str, to_value};
use crate::ipc::types::{AppState, Request};
use crate::workflow::internship::{self, InternshipStatus, NewInternship};
use serde_json::json;

fn internship_id(req: &Request) -> AppResult<String> {
    required_str(&req.params, "internshipId")
}

fn handle_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let created = internship::create(
        conn,
        NewInternship {
            student_id: required_str(&req.params, "studentId")?,
            company: required_str(&req.params, "company")?,
            subject: required_str(&req.params, "subject")?,
            start_date: optional_str(&req.params, "startDate"),
            end_date: optional_str(&req.params, "endDate"),
            supervisor_id: optional_str(&req.params, "supervisorId"),
        },
    )?;
    to_value(&created)
}

fn handle_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let student_id = optional_str(&req.params, "studentId");
    let status = optional_enum(&req.params, "status", InternshipStatus::parse)?;
    let rows = internship::list(conn, student_id.as_deref(), status)?;
    Ok(json!({ "internships": to_value(&rows)? }))
}

fn handle_get(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let id = internship_id(req)?;
    let i = internship::get(conn, &id)?;
    let unmet = match internship::diploma_gate(&i) {
        Ok(()) => Vec::new(),
        Err(unmet) => unmet,
    };
    let mut out = to_value(&i)?;
    out["diplomaGate"] = json!({ "ready": unmet.is_empty(), "unmet": unmet });
    Ok(out)
}

fn handle_submit_report(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    to_value(&internship::submit_report(conn, &internship_id(req)?)?)
}

fn handle_schedule_defense(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let id = internship_id(req)?;
    let defense_date = required_str(&req.params, "defenseDate")?;
    let jury: Vec<String> = match req.params.get("jury") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_params("jury members must be strings"))
            })
            .collect::<AppResult<_>>()?,
        _ => return Err(AppError::bad_params("missing jury array")),
    };
    to_value(&internship::schedule_defense(conn, &id, &defense_date, &jury)?)
}

fn handle_record_grade(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let id = internship_id(req)?;
    let grade = required_f64(&req.params, "grade")?;
    to_value(&internship::record_grade(conn, &id, grade)?)
}

fn handle_authorize_diploma(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    to_value(&internship::authorize_diploma(conn, &internship_id(req)?)?)
}

fn handle_deliver_diploma(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    to_value(&internship::deliver_diploma(conn, &internship_id(req)?)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "internships.create" => handle_create(state, req),
        "internships.list" => handle_list(state, req),
        "internships.get" => handle_get(state, req),
        "internships.submitReport" => handle_submit_report(state, req),
        "internships.scheduleDefense" => handle_schedule_defense(state, req),
        "internships.recordGrade" => handle_record_grade(state, req),
        "internships.authorizeDiploma" => handle_authorize_diploma(state, req),
        "internships.deliverDiploma" => handle_deliver_diploma(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
