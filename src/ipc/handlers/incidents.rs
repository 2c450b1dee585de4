use crate::error::AppResult;
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, optional_enum, optional_str, required_str, session, to_value};
use crate::ipc::types::{AppState, Request};
use crate::workflow::incident::{self, IncidentFilter, IncidentPriority, IncidentStatus, NewIncident};
use serde_json::json;

fn handle_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let conn = conn(state)?;
    let created = incident::create(
        conn,
        NewIncident {
            description: required_str(&req.params, "description")?,
            room_id: optional_str(&req.params, "roomId"),
            priority: optional_enum(&req.params, "priority", IncidentPriority::parse)?
                .unwrap_or(IncidentPriority::Normal),
            reporter_id: session.user_id,
        },
    )?;
    to_value(&created)
}

fn handle_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let filter = IncidentFilter {
        status: optional_enum(&req.params, "status", IncidentStatus::parse)?,
        technician_id: optional_str(&req.params, "technicianId"),
        reporter_id: optional_str(&req.params, "reporterId"),
    };
    Ok(json!({ "incidents": to_value(&incident::list(conn, &filter)?)? }))
}

fn handle_get(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let id = required_str(&req.params, "incidentId")?;
    let mut out = to_value(&incident::get(conn, &id)?)?;
    out["history"] = to_value(&incident::history(conn, &id)?)?;
    Ok(out)
}

fn handle_assign(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let conn = conn(state)?;
    let id = required_str(&req.params, "incidentId")?;
    let technician_id = required_str(&req.params, "technicianId")?;
    to_value(&incident::assign(conn, &id, &technician_id, &session.user_id)?)
}

fn handle_start(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let conn = conn(state)?;
    let id = required_str(&req.params, "incidentId")?;
    to_value(&incident::start(conn, &id, &session.user_id)?)
}

fn handle_resolve(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let conn = conn(state)?;
    let id = required_str(&req.params, "incidentId")?;
    let solution = required_str(&req.params, "solution")?;
    to_value(&incident::resolve(conn, &id, &solution, &session.user_id)?)
}

fn handle_close(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let conn = conn(state)?;
    let id = required_str(&req.params, "incidentId")?;
    to_value(&incident::close(conn, &id, &session.user_id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "incidents.create" => handle_create(state, req),
        "incidents.list" => handle_list(state, req),
        "incidents.get" => handle_get(state, req),
        "incidents.assign" => handle_assign(state, req),
        "incidents.start" => handle_start(state, req),
        "incidents.resolve" => handle_resolve(state, req),
        "incidents.close" => handle_close(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
