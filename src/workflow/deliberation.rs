use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::now_stamp;
use crate::calc::{self, CourseOutcome};
use crate::error::{AppError, AppResult};

status_enum!(Decision {
    Validated => "validated",
    NotValidated => "not_validated",
});

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliberation {
    pub id: String,
    pub student_id: String,
    pub course_code: String,
    pub average: Option<f64>,
    pub decision: Decision,
    pub decided_by: Option<String>,
    pub decided_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliberationResult {
    pub deliberation: Deliberation,
    pub outcome: CourseOutcome,
    pub overridden: bool,
}

fn map_row(r: &Row<'_>) -> rusqlite::Result<Deliberation> {
    Ok(Deliberation {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_code: r.get(2)?,
        average: r.get(3)?,
        decision: r.get(4)?,
        decided_by: r.get(5)?,
        decided_at: r.get(6)?,
    })
}

fn enrolled(conn: &Connection, student_id: &str, course_code: &str) -> AppResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE student_id = ? AND course_code = ?",
            (student_id, course_code),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Computes the student's course average and records the committee decision.
/// Without an explicit decision the pass mark decides. Re-running replaces the
/// previous record for the same student and course.
pub fn deliberate(
    conn: &Connection,
    student_id: &str,
    course_code: &str,
    decided_by: &str,
    explicit: Option<Decision>,
) -> AppResult<DeliberationResult> {
    if !enrolled(conn, student_id, course_code)? {
        return Err(AppError::new("not_enrolled", "student is not enrolled in this course")
            .with_details(serde_json::json!({
                "studentId": student_id,
                "courseCode": course_code,
            })));
    }

    let outcome = calc::course_outcome(conn, student_id, course_code)?;
    let computed = if outcome.passed {
        Decision::Validated
    } else {
        Decision::NotValidated
    };
    let decision = explicit.unwrap_or(computed);

    conn.execute(
        "INSERT INTO deliberations(id, student_id, course_code, average, decision, decided_by, decided_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, course_code) DO UPDATE SET
           average = excluded.average,
           decision = excluded.decision,
           decided_by = excluded.decided_by,
           decided_at = excluded.decided_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            course_code,
            outcome.average,
            decision,
            decided_by,
            now_stamp(),
        ),
    )?;
    info!(student = %student_id, course = %course_code, decision = %decision, "deliberation recorded");

    let deliberation = conn
        .query_row(
            "SELECT id, student_id, course_code, average, decision, decided_by, decided_at
             FROM deliberations WHERE student_id = ? AND course_code = ?",
            (student_id, course_code),
            map_row,
        )?;
    Ok(DeliberationResult {
        deliberation,
        outcome,
        overridden: decision != computed,
    })
}

pub fn list_for_course(conn: &Connection, course_code: &str) -> AppResult<Vec<Deliberation>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, course_code, average, decision, decided_by, decided_at
         FROM deliberations WHERE course_code = ? ORDER BY decided_at",
    )?;
    let rows = stmt
        .query_map([course_code], map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
