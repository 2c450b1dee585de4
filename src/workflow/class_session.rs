use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::reservation::TimeSlot;
use super::{fmt_date, fmt_time};
use crate::error::{AppError, AppResult};

status_enum!(SessionStatus {
    Pending => "pending",
    Confirmed => "confirmed",
});

/// One scheduled meeting of a course.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSession {
    pub id: String,
    pub course_code: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub room_id: Option<String>,
    pub kind: Option<String>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone)]
pub struct NewClassSession {
    pub course_code: String,
    pub slot: TimeSlot,
    pub room_id: Option<String>,
    pub kind: Option<String>,
}

const SELECT_COLUMNS: &str =
    "id, course_code, date, start_time, end_time, room_id, kind, status";

fn map_row(r: &Row<'_>) -> rusqlite::Result<ClassSession> {
    Ok(ClassSession {
        id: r.get(0)?,
        course_code: r.get(1)?,
        date: r.get(2)?,
        start_time: r.get(3)?,
        end_time: r.get(4)?,
        room_id: r.get(5)?,
        kind: r.get(6)?,
        status: r.get(7)?,
    })
}

pub fn get(conn: &Connection, id: &str) -> AppResult<ClassSession> {
    let sql = format!("SELECT {} FROM sessions WHERE id = ?", SELECT_COLUMNS);
    conn.query_row(&sql, [id], map_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("session", id))
}

pub fn list_for_course(conn: &Connection, course_code: &str) -> AppResult<Vec<ClassSession>> {
    let sql = format!(
        "SELECT {} FROM sessions WHERE course_code = ? ORDER BY date, start_time",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([course_code], map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create(conn: &Connection, new: NewClassSession) -> AppResult<ClassSession> {
    let course: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM courses WHERE code = ?",
            [&new.course_code],
            |r| r.get(0),
        )
        .optional()?;
    if course.is_none() {
        return Err(AppError::not_found("course", &new.course_code));
    }
    if let Some(room) = new.room_id.as_deref() {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM rooms WHERE id = ?", [room], |r| r.get(0))
            .optional()?;
        if found.is_none() {
            return Err(AppError::not_found("room", room));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(id, course_code, date, start_time, end_time, room_id, kind, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &new.course_code,
            fmt_date(new.slot.date),
            fmt_time(new.slot.start),
            fmt_time(new.slot.end),
            &new.room_id,
            &new.kind,
            SessionStatus::Pending,
        ),
    )?;
    get(conn, &id)
}

pub fn confirm(conn: &Connection, id: &str) -> AppResult<ClassSession> {
    let s = get(conn, id)?;
    if s.status != SessionStatus::Pending {
        return Err(AppError::invalid_transition(
            "session",
            s.status.as_str(),
            SessionStatus::Confirmed.as_str(),
        ));
    }
    conn.execute(
        "UPDATE sessions SET status = ? WHERE id = ?",
        (SessionStatus::Confirmed, id),
    )?;
    info!(session = %id, "session confirmed");
    get(conn, id)
}
