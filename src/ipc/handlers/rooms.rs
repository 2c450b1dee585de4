use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, optional_bool, optional_i64, optional_str, required_str, to_value};
use crate::ipc::types::{AppState, Request};
use crate::workflow::reservation::{self, TimeSlot};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn room_json(conn: &Connection, room_id: &str) -> AppResult<serde_json::Value> {
    conn.query_row(
        "SELECT id, name, capacity, kind, available FROM rooms WHERE id = ?",
        [room_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "capacity": r.get::<_, Option<i64>>(2)?,
                "kind": r.get::<_, Option<String>>(3)?,
                "available": r.get::<_, i64>(4)? != 0,
            }))
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("room", room_id))
}

fn handle_rooms_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let name = required_str(&req.params, "name")?;
    let capacity = optional_i64(&req.params, "capacity")?;
    if capacity.is_some_and(|c| c < 0) {
        return Err(AppError::bad_params("capacity must not be negative"));
    }
    let kind = optional_str(&req.params, "kind");
    let available = optional_bool(&req.params, "available")?.unwrap_or(true);

    let room_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO rooms(id, name, capacity, kind, available) VALUES(?, ?, ?, ?, ?)",
        (&room_id, &name, capacity, &kind, available as i64),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            AppError::new("conflict", "room name already in use")
                .with_details(json!({ "name": name }))
        }
        other => AppError::from(other),
    })?;
    info!(room = %room_id, "room created");
    room_json(conn, &room_id)
}

fn handle_rooms_list(state: &mut AppState, _req: &Request) -> AppResult<serde_json::Value> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "rooms": [] }));
    };
    let mut stmt = conn.prepare("SELECT id FROM rooms ORDER BY name")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let rooms = ids
        .iter()
        .map(|id| room_json(conn, id))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(json!({ "rooms": rooms }))
}

fn handle_rooms_set_available(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let room_id = required_str(&req.params, "roomId")?;
    let available = optional_bool(&req.params, "available")?
        .ok_or_else(|| AppError::bad_params("missing available"))?;
    let changed = conn.execute(
        "UPDATE rooms SET available = ? WHERE id = ?",
        (available as i64, &room_id),
    )?;
    if changed == 0 {
        return Err(AppError::not_found("room", &room_id));
    }
    info!(room = %room_id, available, "room availability flag changed");
    room_json(conn, &room_id)
}

/// Rooms still referenced by sessions or reservations cannot be deleted.
fn handle_rooms_delete(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let room_id = required_str(&req.params, "roomId")?;
    let changed = conn.execute("DELETE FROM rooms WHERE id = ?", [&room_id])?;
    if changed == 0 {
        return Err(AppError::not_found("room", &room_id));
    }
    info!(room = %room_id, "room deleted");
    Ok(json!({ "deleted": room_id }))
}

fn handle_rooms_availability(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let room_id = required_str(&req.params, "roomId")?;
    let slot = TimeSlot::parse(
        &required_str(&req.params, "date")?,
        &required_str(&req.params, "start")?,
        &required_str(&req.params, "end")?,
    )?;
    let exclude = optional_str(&req.params, "excludeReservationId");
    let availability = reservation::check_availability(conn, &room_id, &slot, exclude.as_deref())?;
    to_value(&availability)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "rooms.create" => handle_rooms_create(state, req),
        "rooms.list" => handle_rooms_list(state, req),
        "rooms.setAvailable" => handle_rooms_set_available(state, req),
        "rooms.delete" => handle_rooms_delete(state, req),
        "rooms.availability" => handle_rooms_availability(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
