use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, optional_enum, optional_str, required_str, session, to_value};
use crate::ipc::types::{AppState, Request};
use crate::workflow::reservation::{self, NewReservation, ReservationFilter, ReservationStatus, TimeSlot};
use crate::workflow::{fmt_date, parse_date};
use serde_json::json;

fn handle_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let conn = conn(state)?;
    let slot = TimeSlot::parse(
        &required_str(&req.params, "date")?,
        &required_str(&req.params, "start")?,
        &required_str(&req.params, "end")?,
    )?;
    let created = reservation::create(
        conn,
        NewReservation {
            room_id: required_str(&req.params, "roomId")?,
            requester_id: session.user_id,
            slot,
            purpose: optional_str(&req.params, "purpose"),
        },
    )?;
    to_value(&created)
}

fn handle_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let filter = ReservationFilter {
        room_id: optional_str(&req.params, "roomId"),
        requester_id: optional_str(&req.params, "requesterId"),
        status: optional_enum(&req.params, "status", ReservationStatus::parse)?,
        date: optional_str(&req.params, "date")
            .map(|d| parse_date(&d).map(fmt_date))
            .transpose()?,
    };
    let rows = reservation::list(conn, &filter)?;
    Ok(json!({ "reservations": to_value(&rows)? }))
}

fn handle_get(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let id = required_str(&req.params, "reservationId")?;
    to_value(&reservation::get(conn, &id)?)
}

fn handle_accept(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let conn = conn(state)?;
    let id = required_str(&req.params, "reservationId")?;
    to_value(&reservation::accept(conn, &id, &session.user_id)?)
}

fn handle_reject(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let conn = conn(state)?;
    let id = required_str(&req.params, "reservationId")?;
    let reason = required_str(&req.params, "reason")?;
    to_value(&reservation::reject(conn, &id, &session.user_id, &reason)?)
}

/// Only the requester may withdraw a reservation.
fn handle_cancel(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let conn = conn(state)?;
    let id = required_str(&req.params, "reservationId")?;
    let current = reservation::get(conn, &id)?;
    if current.requester_id != session.user_id {
        return Err(AppError::new("unauthorized", "only the requester can cancel a reservation")
            .with_details(json!({ "reservationId": id })));
    }
    to_value(&reservation::cancel(conn, &id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reservations.create" => handle_create(state, req),
        "reservations.list" => handle_list(state, req),
        "reservations.get" => handle_get(state, req),
        "reservations.accept" => handle_accept(state, req),
        "reservations.reject" => handle_reject(state, req),
        "reservations.cancel" => handle_cancel(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
