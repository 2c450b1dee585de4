use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{fmt_date, has_role, now_stamp, parse_date, require_person};
use crate::calc::PASS_MARK;
use crate::error::{AppError, AppResult};
use crate::roles::Role;

status_enum!(InternshipStatus {
    InProgress => "in_progress",
    ReportSubmitted => "report_submitted",
    DefenseScheduled => "defense_scheduled",
    Validated => "validated",
    NotValidated => "not_validated",
    DiplomaAuthorized => "diploma_authorized",
    DiplomaDelivered => "diploma_delivered",
});

pub const MAX_GRADE: f64 = 20.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Internship {
    pub id: String,
    pub student_id: String,
    pub company: String,
    pub subject: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub supervisor_id: Option<String>,
    pub status: InternshipStatus,
    pub report_submitted: bool,
    pub report_submitted_at: Option<String>,
    pub defense_date: Option<String>,
    pub jury: Vec<String>,
    pub grade: Option<f64>,
    pub diploma_authorized_at: Option<String>,
    pub diploma_delivered_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewInternship {
    pub student_id: String,
    pub company: String,
    pub subject: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub supervisor_id: Option<String>,
}

/// Conditions checked before a diploma may be authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateFailure {
    ReportNotSubmitted,
    DefenseNotScheduled,
    GradeMissing,
    GradeBelowPassMark,
}

/// Every unmet condition is reported, not just the first one.
pub fn diploma_gate(i: &Internship) -> Result<(), Vec<GateFailure>> {
    let mut unmet = Vec::new();
    if !i.report_submitted {
        unmet.push(GateFailure::ReportNotSubmitted);
    }
    if i.defense_date.is_none() {
        unmet.push(GateFailure::DefenseNotScheduled);
    }
    match i.grade {
        None => unmet.push(GateFailure::GradeMissing),
        Some(g) if g < PASS_MARK => unmet.push(GateFailure::GradeBelowPassMark),
        Some(_) => {}
    }
    if unmet.is_empty() {
        Ok(())
    } else {
        Err(unmet)
    }
}

const SELECT_COLUMNS: &str = "id, student_id, company, subject, start_date, end_date, supervisor_id,
     status, report_submitted, report_submitted_at, defense_date, jury_json, grade,
     diploma_authorized_at, diploma_delivered_at";

fn map_row(r: &Row<'_>) -> rusqlite::Result<Internship> {
    let jury_json: Option<String> = r.get(11)?;
    let jury = jury_json
        .as_deref()
        .map(serde_json::from_str::<Vec<String>>)
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e)))?
        .unwrap_or_default();
    Ok(Internship {
        id: r.get(0)?,
        student_id: r.get(1)?,
        company: r.get(2)?,
        subject: r.get(3)?,
        start_date: r.get(4)?,
        end_date: r.get(5)?,
        supervisor_id: r.get(6)?,
        status: r.get(7)?,
        report_submitted: r.get::<_, i64>(8)? != 0,
        report_submitted_at: r.get(9)?,
        defense_date: r.get(10)?,
        jury,
        grade: r.get(12)?,
        diploma_authorized_at: r.get(13)?,
        diploma_delivered_at: r.get(14)?,
    })
}

pub fn get(conn: &Connection, id: &str) -> AppResult<Internship> {
    let sql = format!("SELECT {} FROM internships WHERE id = ?", SELECT_COLUMNS);
    conn.query_row(&sql, [id], map_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("internship", id))
}

pub fn list(
    conn: &Connection,
    student_id: Option<&str>,
    status: Option<InternshipStatus>,
) -> AppResult<Vec<Internship>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    if let Some(s) = student_id {
        clauses.push("student_id = ?");
        bind.push(Value::Text(s.to_string()));
    }
    if let Some(st) = status {
        clauses.push("status = ?");
        bind.push(Value::Text(st.as_str().to_string()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM internships {} ORDER BY start_date, company",
        SELECT_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create(conn: &Connection, new: NewInternship) -> AppResult<Internship> {
    if new.company.trim().is_empty() || new.subject.trim().is_empty() {
        return Err(AppError::bad_params("company and subject are required"));
    }
    if !has_role(conn, &new.student_id, Role::Student)? {
        return Err(AppError::not_found("student", &new.student_id));
    }
    if let Some(sup) = new.supervisor_id.as_deref() {
        require_person(conn, sup)?;
    }
    let start = new.start_date.as_deref().map(parse_date).transpose()?;
    let end = new.end_date.as_deref().map(parse_date).transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        if e < s {
            return Err(AppError::bad_params("end date precedes start date"));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO internships(id, student_id, company, subject, start_date, end_date,
                                 supervisor_id, status)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &new.student_id,
            new.company.trim(),
            new.subject.trim(),
            start.map(fmt_date),
            end.map(fmt_date),
            &new.supervisor_id,
            InternshipStatus::InProgress,
        ),
    )?;
    info!(internship = %id, student = %new.student_id, "internship created");
    get(conn, &id)
}

fn require_status(
    i: &Internship,
    allowed: &[InternshipStatus],
    to: InternshipStatus,
) -> AppResult<()> {
    if allowed.contains(&i.status) {
        Ok(())
    } else {
        Err(AppError::invalid_transition(
            "internship",
            i.status.as_str(),
            to.as_str(),
        ))
    }
}

pub fn submit_report(conn: &Connection, id: &str) -> AppResult<Internship> {
    let i = get(conn, id)?;
    require_status(
        &i,
        &[InternshipStatus::InProgress],
        InternshipStatus::ReportSubmitted,
    )?;
    conn.execute(
        "UPDATE internships SET status = ?, report_submitted = 1, report_submitted_at = ?
         WHERE id = ?",
        (InternshipStatus::ReportSubmitted, now_stamp(), id),
    )?;
    info!(internship = %id, "internship report submitted");
    get(conn, id)
}

/// Rescheduling an already scheduled defense is allowed.
pub fn schedule_defense(
    conn: &Connection,
    id: &str,
    defense_date: &str,
    jury: &[String],
) -> AppResult<Internship> {
    let date = parse_date(defense_date)?;
    let jury: Vec<String> = jury
        .iter()
        .map(|j| j.trim().to_string())
        .filter(|j| !j.is_empty())
        .collect();
    if jury.is_empty() {
        return Err(AppError::bad_params("jury must name at least one member"));
    }
    let i = get(conn, id)?;
    require_status(
        &i,
        &[
            InternshipStatus::ReportSubmitted,
            InternshipStatus::DefenseScheduled,
        ],
        InternshipStatus::DefenseScheduled,
    )?;
    let jury_json = serde_json::to_string(&jury).map_err(|e| AppError::internal(e.into()))?;
    conn.execute(
        "UPDATE internships SET status = ?, defense_date = ?, jury_json = ? WHERE id = ?",
        (InternshipStatus::DefenseScheduled, fmt_date(date), jury_json, id),
    )?;
    info!(internship = %id, defense_date = %fmt_date(date), "defense scheduled");
    get(conn, id)
}

/// Records the defense grade; the outcome follows from the pass mark. A grade
/// can be corrected until the diploma is authorized.
pub fn record_grade(conn: &Connection, id: &str, grade: f64) -> AppResult<Internship> {
    if !grade.is_finite() || !(0.0..=MAX_GRADE).contains(&grade) {
        return Err(AppError::bad_params("grade must be between 0 and 20")
            .with_details(json!({ "grade": grade })));
    }
    let i = get(conn, id)?;
    let outcome = if grade >= PASS_MARK {
        InternshipStatus::Validated
    } else {
        InternshipStatus::NotValidated
    };
    require_status(
        &i,
        &[
            InternshipStatus::DefenseScheduled,
            InternshipStatus::Validated,
            InternshipStatus::NotValidated,
        ],
        outcome,
    )?;
    conn.execute(
        "UPDATE internships SET status = ?, grade = ? WHERE id = ?",
        (outcome, grade, id),
    )?;
    info!(internship = %id, grade, outcome = %outcome, "internship graded");
    get(conn, id)
}

pub fn authorize_diploma(conn: &Connection, id: &str) -> AppResult<Internship> {
    let i = get(conn, id)?;
    if matches!(
        i.status,
        InternshipStatus::DiplomaAuthorized | InternshipStatus::DiplomaDelivered
    ) {
        return Err(AppError::invalid_transition(
            "internship",
            i.status.as_str(),
            InternshipStatus::DiplomaAuthorized.as_str(),
        ));
    }
    if let Err(unmet) = diploma_gate(&i) {
        return Err(
            AppError::new("gate_failed", "diploma authorization requirements not met")
                .with_details(json!({ "unmet": unmet })),
        );
    }
    require_status(
        &i,
        &[InternshipStatus::Validated],
        InternshipStatus::DiplomaAuthorized,
    )?;
    conn.execute(
        "UPDATE internships SET status = ?, diploma_authorized_at = ? WHERE id = ?",
        (InternshipStatus::DiplomaAuthorized, now_stamp(), id),
    )?;
    info!(internship = %id, "diploma authorized");
    get(conn, id)
}

pub fn deliver_diploma(conn: &Connection, id: &str) -> AppResult<Internship> {
    let i = get(conn, id)?;
    require_status(
        &i,
        &[InternshipStatus::DiplomaAuthorized],
        InternshipStatus::DiplomaDelivered,
    )?;
    conn.execute(
        "UPDATE internships SET status = ?, diploma_delivered_at = ? WHERE id = ?",
        (InternshipStatus::DiplomaDelivered, now_stamp(), id),
    )?;
    info!(internship = %id, "diploma delivered");
    get(conn, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graded(grade: Option<f64>) -> Internship {
        Internship {
            id: "i-1".into(),
            student_id: "s-1".into(),
            company: "Acme".into(),
            subject: "Telemetry".into(),
            start_date: None,
            end_date: None,
            supervisor_id: None,
            status: InternshipStatus::Validated,
            report_submitted: true,
            report_submitted_at: Some("2025-06-01T00:00:00+00:00".into()),
            defense_date: Some("2025-06-20".into()),
            jury: vec!["Dr. A".into()],
            grade,
            diploma_authorized_at: None,
            diploma_delivered_at: None,
        }
    }

    #[test]
    fn gate_blocks_below_pass_mark() {
        let unmet = diploma_gate(&graded(Some(9.5))).unwrap_err();
        assert_eq!(unmet, vec![GateFailure::GradeBelowPassMark]);
    }

    #[test]
    fn gate_passes_at_exactly_ten() {
        assert!(diploma_gate(&graded(Some(10.0))).is_ok());
    }

    #[test]
    fn gate_lists_every_missing_condition() {
        let mut i = graded(None);
        i.report_submitted = false;
        i.defense_date = None;
        let unmet = diploma_gate(&i).unwrap_err();
        assert_eq!(
            unmet,
            vec![
                GateFailure::ReportNotSubmitted,
                GateFailure::DefenseNotScheduled,
                GateFailure::GradeMissing,
            ]
        );
    }
}
