use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use rusqlite::{Transaction, TransactionBehavior};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{fmt_date, fmt_time, now_stamp, parse_date, parse_time, require_person};
use crate::error::{AppError, AppResult};

status_enum!(ReservationStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Cancelled => "cancelled",
});

/// Statuses that hold a room slot.
pub const SLOT_HOLDING: [ReservationStatus; 2] =
    [ReservationStatus::Pending, ReservationStatus::Accepted];

/// A date plus a half-open `[start, end)` time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> AppResult<Self> {
        if start >= end {
            return Err(AppError::bad_params("start time must be before end time")
                .with_details(json!({ "start": fmt_time(start), "end": fmt_time(end) })));
        }
        Ok(Self { date, start, end })
    }

    pub fn parse(date: &str, start: &str, end: &str) -> AppResult<Self> {
        Self::new(parse_date(date)?, parse_time(start)?, parse_time(end)?)
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.date == other.date && self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub room_id: String,
    pub requester_id: String,
    pub requested_at: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub purpose: Option<String>,
    pub status: ReservationStatus,
    pub decided_at: Option<String>,
    pub decided_by: Option<String>,
    pub rejection_reason: Option<String>,
}

impl Reservation {
    fn slot(&self) -> AppResult<TimeSlot> {
        TimeSlot::parse(&self.date, &self.start_time, &self.end_time)
    }
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub room_id: String,
    pub requester_id: String,
    pub slot: TimeSlot,
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub room_id: Option<String>,
    pub requester_id: Option<String>,
    pub status: Option<ReservationStatus>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub available: bool,
    pub room_unavailable: bool,
    pub conflicts: Vec<Reservation>,
}

const SELECT_COLUMNS: &str = "id, room_id, requester_id, requested_at, date, start_time, end_time,
     purpose, status, decided_at, decided_by, rejection_reason";

fn map_row(r: &Row<'_>) -> rusqlite::Result<Reservation> {
    Ok(Reservation {
        id: r.get(0)?,
        room_id: r.get(1)?,
        requester_id: r.get(2)?,
        requested_at: r.get(3)?,
        date: r.get(4)?,
        start_time: r.get(5)?,
        end_time: r.get(6)?,
        purpose: r.get(7)?,
        status: r.get(8)?,
        decided_at: r.get(9)?,
        decided_by: r.get(10)?,
        rejection_reason: r.get(11)?,
    })
}

fn room_flag(conn: &Connection, room_id: &str) -> AppResult<bool> {
    let available: Option<i64> = conn
        .query_row("SELECT available FROM rooms WHERE id = ?", [room_id], |r| {
            r.get(0)
        })
        .optional()?;
    match available {
        Some(v) => Ok(v != 0),
        None => Err(AppError::not_found("room", room_id)),
    }
}

/// Reservations in `statuses` for the same room and date whose interval
/// overlaps `slot`.
fn overlapping(
    conn: &Connection,
    room_id: &str,
    slot: &TimeSlot,
    statuses: &[ReservationStatus],
    exclude_id: Option<&str>,
) -> AppResult<Vec<Reservation>> {
    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM reservations
         WHERE room_id = ? AND date = ? AND id != ? AND status IN ({})
         ORDER BY start_time",
        SELECT_COLUMNS, placeholders
    );
    let mut bind: Vec<Value> = vec![
        Value::Text(room_id.to_string()),
        Value::Text(fmt_date(slot.date)),
        Value::Text(exclude_id.unwrap_or("").to_string()),
    ];
    bind.extend(statuses.iter().map(|s| Value::Text(s.as_str().to_string())));

    let mut stmt = conn.prepare(&sql)?;
    let candidates = stmt
        .query_map(params_from_iter(bind), map_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::new();
    for c in candidates {
        if c.slot()?.overlaps(slot) {
            out.push(c);
        }
    }
    Ok(out)
}

pub fn check_availability(
    conn: &Connection,
    room_id: &str,
    slot: &TimeSlot,
    exclude_id: Option<&str>,
) -> AppResult<Availability> {
    let flagged_available = room_flag(conn, room_id)?;
    let conflicts = overlapping(conn, room_id, slot, &SLOT_HOLDING, exclude_id)?;
    Ok(Availability {
        available: flagged_available && conflicts.is_empty(),
        room_unavailable: !flagged_available,
        conflicts,
    })
}

pub fn get(conn: &Connection, id: &str) -> AppResult<Reservation> {
    let sql = format!("SELECT {} FROM reservations WHERE id = ?", SELECT_COLUMNS);
    conn.query_row(&sql, [id], map_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("reservation", id))
}

pub fn list(conn: &Connection, filter: &ReservationFilter) -> AppResult<Vec<Reservation>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    if let Some(room) = filter.room_id.as_ref() {
        clauses.push("room_id = ?");
        bind.push(Value::Text(room.clone()));
    }
    if let Some(requester) = filter.requester_id.as_ref() {
        clauses.push("requester_id = ?");
        bind.push(Value::Text(requester.clone()));
    }
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        bind.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(date) = filter.date.as_ref() {
        clauses.push("date = ?");
        bind.push(Value::Text(date.clone()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM reservations {} ORDER BY date, start_time, requested_at",
        SELECT_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create(conn: &Connection, new: NewReservation) -> AppResult<Reservation> {
    require_person(conn, &new.requester_id)?;
    let availability = check_availability(conn, &new.room_id, &new.slot, None)?;
    if !availability.available {
        let conflict_ids: Vec<&str> = availability.conflicts.iter().map(|c| c.id.as_str()).collect();
        return Err(AppError::new("unavailable", "room is not available for this slot")
            .with_details(json!({
                "roomUnavailable": availability.room_unavailable,
                "conflicts": conflict_ids,
            })));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO reservations(id, room_id, requester_id, requested_at, date, start_time,
                                  end_time, purpose, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &new.room_id,
            &new.requester_id,
            now_stamp(),
            fmt_date(new.slot.date),
            fmt_time(new.slot.start),
            fmt_time(new.slot.end),
            &new.purpose,
            ReservationStatus::Pending,
        ),
    )?;
    info!(reservation = %id, room = %new.room_id, "reservation requested");
    get(conn, &id)
}

fn require_pending(r: &Reservation, to: ReservationStatus) -> AppResult<()> {
    if r.status != ReservationStatus::Pending {
        return Err(AppError::invalid_transition(
            "reservation",
            r.status.as_str(),
            to.as_str(),
        ));
    }
    Ok(())
}

/// Accepting re-checks the slot against other accepted reservations inside a
/// write transaction, so two requests for one slot cannot both be accepted.
pub fn accept(conn: &Connection, id: &str, decided_by: &str) -> AppResult<Reservation> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let r = get(&tx, id)?;
    require_pending(&r, ReservationStatus::Accepted)?;

    let slot = r.slot()?;
    let clashing = overlapping(&tx, &r.room_id, &slot, &[ReservationStatus::Accepted], Some(id))?;
    if !clashing.is_empty() {
        let ids: Vec<&str> = clashing.iter().map(|c| c.id.as_str()).collect();
        return Err(AppError::new("conflict", "slot already accepted for another request")
            .with_details(json!({ "conflicts": ids })));
    }
    if !room_flag(&tx, &r.room_id)? {
        return Err(AppError::new("unavailable", "room is flagged unavailable")
            .with_details(json!({ "roomId": r.room_id })));
    }

    tx.execute(
        "UPDATE reservations SET status = ?, decided_at = ?, decided_by = ? WHERE id = ?",
        (ReservationStatus::Accepted, now_stamp(), decided_by, id),
    )?;
    tx.commit()?;
    info!(reservation = %id, decided_by, "reservation accepted");
    get(conn, id)
}

pub fn reject(
    conn: &Connection,
    id: &str,
    decided_by: &str,
    reason: &str,
) -> AppResult<Reservation> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::bad_params("rejection reason must not be empty"));
    }
    let r = get(conn, id)?;
    require_pending(&r, ReservationStatus::Rejected)?;
    conn.execute(
        "UPDATE reservations
         SET status = ?, decided_at = ?, decided_by = ?, rejection_reason = ?
         WHERE id = ?",
        (ReservationStatus::Rejected, now_stamp(), decided_by, reason, id),
    )?;
    info!(reservation = %id, decided_by, "reservation rejected");
    get(conn, id)
}

pub fn cancel(conn: &Connection, id: &str) -> AppResult<Reservation> {
    let r = get(conn, id)?;
    require_pending(&r, ReservationStatus::Cancelled)?;
    conn.execute(
        "UPDATE reservations SET status = ? WHERE id = ?",
        (ReservationStatus::Cancelled, id),
    )?;
    info!(reservation = %id, "reservation cancelled");
    get(conn, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(start: &str, end: &str) -> TimeSlot {
        TimeSlot::parse("2025-03-10", start, end).expect("slot")
    }

    #[test]
    fn half_open_intervals_touching_do_not_overlap() {
        let booked = slot("10:00", "12:00");
        assert!(booked.overlaps(&slot("11:00", "13:00")));
        assert!(booked.overlaps(&slot("09:00", "10:30")));
        assert!(booked.overlaps(&slot("10:30", "11:00")));
        assert!(!booked.overlaps(&slot("12:00", "14:00")));
        assert!(!booked.overlaps(&slot("08:00", "10:00")));
    }

    #[test]
    fn different_days_never_overlap() {
        let a = TimeSlot::parse("2025-03-10", "10:00", "12:00").expect("a");
        let b = TimeSlot::parse("2025-03-11", "10:00", "12:00").expect("b");
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn empty_or_inverted_slot_is_rejected() {
        let e = TimeSlot::parse("2025-03-10", "12:00", "12:00").unwrap_err();
        assert_eq!(e.code, "bad_params");
        assert!(TimeSlot::parse("2025-03-10", "13:00", "12:00").is_err());
    }

    #[test]
    fn status_text_roundtrips() {
        assert_eq!(ReservationStatus::parse("accepted"), Some(ReservationStatus::Accepted));
        assert_eq!(ReservationStatus::Cancelled.as_str(), "cancelled");
        assert_eq!(ReservationStatus::parse("approved"), None);
    }

    fn pending_pair_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE rooms(id TEXT PRIMARY KEY, available INTEGER NOT NULL DEFAULT 1);
             CREATE TABLE reservations(
                id TEXT PRIMARY KEY, room_id TEXT, requester_id TEXT, requested_at TEXT,
                date TEXT, start_time TEXT, end_time TEXT, purpose TEXT, status TEXT,
                decided_at TEXT, decided_by TEXT, rejection_reason TEXT);
             INSERT INTO rooms(id) VALUES('room-1');
             INSERT INTO reservations(id, room_id, requester_id, requested_at, date, start_time, end_time, status)
               VALUES('r1', 'room-1', 'p1', '2025-03-01T08:00:00Z', '2025-03-10', '10:00', '12:00', 'pending');
             INSERT INTO reservations(id, room_id, requester_id, requested_at, date, start_time, end_time, status)
               VALUES('r2', 'room-1', 'p2', '2025-03-01T08:05:00Z', '2025-03-10', '11:00', '13:00', 'pending');",
        )
        .expect("seed");
        conn
    }

    #[test]
    fn second_overlapping_accept_is_a_conflict() {
        let conn = pending_pair_db();
        let first = accept(&conn, "r1", "head").expect("accept r1");
        assert_eq!(first.status, ReservationStatus::Accepted);

        let e = accept(&conn, "r2", "head").unwrap_err();
        assert_eq!(e.code, "conflict");
        let details = e.details.expect("details");
        assert_eq!(details["conflicts"][0], "r1");
        assert_eq!(get(&conn, "r2").expect("r2").status, ReservationStatus::Pending);
    }

    #[test]
    fn rejected_slot_does_not_block_accept() {
        let conn = pending_pair_db();
        reject(&conn, "r1", "head", "exam week").expect("reject r1");
        let second = accept(&conn, "r2", "head").expect("accept r2");
        assert_eq!(second.status, ReservationStatus::Accepted);
    }
}
