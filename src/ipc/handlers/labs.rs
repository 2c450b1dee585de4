use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use crate::workflow::has_role;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

const EQUIPMENT_STATUSES: [&str; 4] = ["available", "in_use", "maintenance", "out_of_service"];

fn equipment_status(raw: Option<String>) -> AppResult<String> {
    let status = raw.unwrap_or_else(|| EQUIPMENT_STATUSES[0].to_string());
    if EQUIPMENT_STATUSES.contains(&status.as_str()) {
        Ok(status)
    } else {
        Err(AppError::bad_params(format!("unknown equipment status: {}", status))
            .with_details(json!({ "allowed": EQUIPMENT_STATUSES })))
    }
}

fn require_lab(conn: &Connection, lab_id: &str) -> AppResult<()> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM laboratories WHERE id = ?", [lab_id], |r| r.get(0))
        .optional()?;
    found
        .map(|_| ())
        .ok_or_else(|| AppError::not_found("laboratory", lab_id))
}

fn handle_labs_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let name = required_str(&req.params, "name")?;
    let chief_id = optional_str(&req.params, "chiefId");
    if let Some(c) = chief_id.as_deref() {
        if !has_role(conn, c, Role::LabChief)? {
            return Err(AppError::not_found("lab chief", c));
        }
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO laboratories(id, name, chief_id) VALUES(?, ?, ?)",
        (&id, &name, &chief_id),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            AppError::new("conflict", "laboratory name already in use")
                .with_details(json!({ "name": name }))
        }
        other => AppError::from(other),
    })?;
    info!(laboratory = %id, "laboratory created");
    Ok(json!({ "id": id, "name": name, "chiefId": chief_id }))
}

fn handle_labs_list(state: &mut AppState, _req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let mut stmt = conn.prepare(
        "SELECT l.id, l.name, l.chief_id, p.name,
           (SELECT COUNT(*) FROM lab_equipment e WHERE e.laboratory_id = l.id)
         FROM laboratories l LEFT JOIN persons p ON p.id = l.chief_id
         ORDER BY l.name",
    )?;
    let labs = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "chiefId": r.get::<_, Option<String>>(2)?,
                "chiefName": r.get::<_, Option<String>>(3)?,
                "equipmentCount": r.get::<_, i64>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "laboratories": labs }))
}

fn handle_equipment_add(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let lab_id = required_str(&req.params, "laboratoryId")?;
    let name = required_str(&req.params, "name")?;
    let status = equipment_status(optional_str(&req.params, "status"))?;
    require_lab(conn, &lab_id)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lab_equipment(id, laboratory_id, name, status) VALUES(?, ?, ?, ?)",
        (&id, &lab_id, &name, &status),
    )?;
    Ok(json!({ "id": id, "laboratoryId": lab_id, "name": name, "status": status }))
}

fn handle_equipment_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let lab_id = required_str(&req.params, "laboratoryId")?;
    require_lab(conn, &lab_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, name, status FROM lab_equipment WHERE laboratory_id = ? ORDER BY name",
    )?;
    let equipment = stmt
        .query_map([&lab_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "status": r.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "laboratoryId": lab_id, "equipment": equipment }))
}

fn handle_equipment_set_status(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let equipment_id = required_str(&req.params, "equipmentId")?;
    let status = equipment_status(Some(required_str(&req.params, "status")?))?;
    let changed = conn.execute(
        "UPDATE lab_equipment SET status = ? WHERE id = ?",
        (&status, &equipment_id),
    )?;
    if changed == 0 {
        return Err(AppError::not_found("equipment", &equipment_id));
    }
    Ok(json!({ "equipmentId": equipment_id, "status": status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "labs.create" => handle_labs_create(state, req),
        "labs.list" => handle_labs_list(state, req),
        "labs.equipment.add" => handle_equipment_add(state, req),
        "labs.equipment.list" => handle_equipment_list(state, req),
        "labs.equipment.setStatus" => handle_equipment_set_status(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
