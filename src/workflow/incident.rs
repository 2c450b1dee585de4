use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::{has_role, now_stamp, require_person};
use crate::error::{AppError, AppResult};
use crate::roles::Role;

status_enum!(IncidentStatus {
    Submitted => "submitted",
    Assigned => "assigned",
    InProgress => "in_progress",
    Resolved => "resolved",
    Closed => "closed",
});

status_enum!(IncidentPriority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Urgent => "urgent",
});

/// Incidents move strictly one step forward. An assigned incident may be
/// handed to another technician before work starts.
pub fn check_transition(from: IncidentStatus, to: IncidentStatus) -> AppResult<()> {
    use IncidentStatus::*;
    let allowed = matches!(
        (from, to),
        (Submitted, Assigned)
            | (Assigned, Assigned)
            | (Assigned, InProgress)
            | (InProgress, Resolved)
            | (Resolved, Closed)
    );
    if allowed {
        Ok(())
    } else {
        Err(AppError::invalid_transition(
            "incident",
            from.as_str(),
            to.as_str(),
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub description: String,
    pub room_id: Option<String>,
    pub submitted_at: String,
    pub status: IncidentStatus,
    pub priority: IncidentPriority,
    pub reporter_id: String,
    pub technician_id: Option<String>,
    pub assigned_at: Option<String>,
    pub started_at: Option<String>,
    pub solution: Option<String>,
    pub resolved_at: Option<String>,
    pub closed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub at: String,
    pub from_status: Option<IncidentStatus>,
    pub to_status: IncidentStatus,
    pub actor_id: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewIncident {
    pub description: String,
    pub room_id: Option<String>,
    pub priority: IncidentPriority,
    pub reporter_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub technician_id: Option<String>,
    pub reporter_id: Option<String>,
}

const SELECT_COLUMNS: &str = "id, description, room_id, submitted_at, status, priority, reporter_id,
     technician_id, assigned_at, started_at, solution, resolved_at, closed_at";

fn map_row(r: &Row<'_>) -> rusqlite::Result<Incident> {
    Ok(Incident {
        id: r.get(0)?,
        description: r.get(1)?,
        room_id: r.get(2)?,
        submitted_at: r.get(3)?,
        status: r.get(4)?,
        priority: r.get(5)?,
        reporter_id: r.get(6)?,
        technician_id: r.get(7)?,
        assigned_at: r.get(8)?,
        started_at: r.get(9)?,
        solution: r.get(10)?,
        resolved_at: r.get(11)?,
        closed_at: r.get(12)?,
    })
}

fn append_history(
    conn: &Connection,
    incident_id: &str,
    from: Option<IncidentStatus>,
    to: IncidentStatus,
    actor_id: Option<&str>,
    note: Option<&str>,
) -> AppResult<()> {
    conn.execute(
        "INSERT INTO incident_history(id, incident_id, at, from_status, to_status, actor_id, note)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            incident_id,
            now_stamp(),
            from,
            to,
            actor_id,
            note,
        ),
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> AppResult<Incident> {
    let sql = format!("SELECT {} FROM incidents WHERE id = ?", SELECT_COLUMNS);
    conn.query_row(&sql, [id], map_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("incident", id))
}

pub fn history(conn: &Connection, id: &str) -> AppResult<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT at, from_status, to_status, actor_id, note
         FROM incident_history
         WHERE incident_id = ?
         ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([id], |r| {
            Ok(HistoryEntry {
                at: r.get(0)?,
                from_status: r.get(1)?,
                to_status: r.get(2)?,
                actor_id: r.get(3)?,
                note: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list(conn: &Connection, filter: &IncidentFilter) -> AppResult<Vec<Incident>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    if let Some(status) = filter.status {
        clauses.push("status = ?");
        bind.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(t) = filter.technician_id.as_ref() {
        clauses.push("technician_id = ?");
        bind.push(Value::Text(t.clone()));
    }
    if let Some(rep) = filter.reporter_id.as_ref() {
        clauses.push("reporter_id = ?");
        bind.push(Value::Text(rep.clone()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM incidents {} ORDER BY submitted_at DESC",
        SELECT_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create(conn: &Connection, new: NewIncident) -> AppResult<Incident> {
    let description = new.description.trim();
    if description.is_empty() {
        return Err(AppError::bad_params("description must not be empty"));
    }
    require_person(conn, &new.reporter_id)?;
    if let Some(room_id) = new.room_id.as_deref() {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM rooms WHERE id = ?", [room_id], |r| r.get(0))
            .optional()?;
        if found.is_none() {
            return Err(AppError::not_found("room", room_id));
        }
    }

    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO incidents(id, description, room_id, submitted_at, status, priority, reporter_id)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            description,
            &new.room_id,
            now_stamp(),
            IncidentStatus::Submitted,
            new.priority,
            &new.reporter_id,
        ),
    )?;
    append_history(
        &tx,
        &id,
        None,
        IncidentStatus::Submitted,
        Some(&new.reporter_id),
        None,
    )?;
    tx.commit()?;
    info!(incident = %id, priority = %new.priority, "incident submitted");
    get(conn, &id)
}

pub fn assign(
    conn: &Connection,
    id: &str,
    technician_id: &str,
    actor_id: &str,
) -> AppResult<Incident> {
    let current = get(conn, id)?;
    check_transition(current.status, IncidentStatus::Assigned)?;
    if !has_role(conn, technician_id, Role::Technician)? {
        return Err(AppError::new("invalid_assignee", "assignee is not a technician")
            .with_details(serde_json::json!({ "technicianId": technician_id })));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE incidents SET status = ?, technician_id = ?, assigned_at = ? WHERE id = ?",
        (IncidentStatus::Assigned, technician_id, now_stamp(), id),
    )?;
    append_history(
        &tx,
        id,
        Some(current.status),
        IncidentStatus::Assigned,
        Some(actor_id),
        Some(technician_id),
    )?;
    tx.commit()?;
    info!(incident = %id, technician = %technician_id, "incident assigned");
    get(conn, id)
}

pub fn start(conn: &Connection, id: &str, actor_id: &str) -> AppResult<Incident> {
    let current = get(conn, id)?;
    check_transition(current.status, IncidentStatus::InProgress)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE incidents SET status = ?, started_at = ? WHERE id = ?",
        (IncidentStatus::InProgress, now_stamp(), id),
    )?;
    append_history(
        &tx,
        id,
        Some(current.status),
        IncidentStatus::InProgress,
        Some(actor_id),
        None,
    )?;
    tx.commit()?;
    info!(incident = %id, "incident in progress");
    get(conn, id)
}

pub fn resolve(conn: &Connection, id: &str, solution: &str, actor_id: &str) -> AppResult<Incident> {
    let solution = solution.trim();
    if solution.is_empty() {
        return Err(AppError::bad_params("solution must not be empty"));
    }
    let current = get(conn, id)?;
    check_transition(current.status, IncidentStatus::Resolved)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE incidents SET status = ?, solution = ?, resolved_at = ? WHERE id = ?",
        (IncidentStatus::Resolved, solution, now_stamp(), id),
    )?;
    append_history(
        &tx,
        id,
        Some(current.status),
        IncidentStatus::Resolved,
        Some(actor_id),
        None,
    )?;
    tx.commit()?;
    info!(incident = %id, "incident resolved");
    get(conn, id)
}

pub fn close(conn: &Connection, id: &str, actor_id: &str) -> AppResult<Incident> {
    let current = get(conn, id)?;
    check_transition(current.status, IncidentStatus::Closed)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE incidents SET status = ?, closed_at = ? WHERE id = ?",
        (IncidentStatus::Closed, now_stamp(), id),
    )?;
    append_history(
        &tx,
        id,
        Some(current.status),
        IncidentStatus::Closed,
        Some(actor_id),
        None,
    )?;
    tx.commit()?;
    info!(incident = %id, "incident closed");
    get(conn, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use IncidentStatus::*;

    #[test]
    fn forward_steps_are_allowed() {
        for (from, to) in [
            (Submitted, Assigned),
            (Assigned, InProgress),
            (InProgress, Resolved),
            (Resolved, Closed),
        ] {
            assert!(check_transition(from, to).is_ok(), "{from} -> {to}");
        }
    }

    #[test]
    fn skipping_or_going_back_is_rejected() {
        for (from, to) in [
            (Submitted, Resolved),
            (Submitted, InProgress),
            (Assigned, Resolved),
            (Resolved, InProgress),
            (Closed, Submitted),
            (InProgress, Assigned),
        ] {
            let e = check_transition(from, to).unwrap_err();
            assert_eq!(e.code, "invalid_transition", "{from} -> {to}");
        }
    }

    #[test]
    fn reassignment_before_start_is_allowed() {
        assert!(check_transition(Assigned, Assigned).is_ok());
    }
}
