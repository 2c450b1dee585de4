use rusqlite::Connection;
use serde::Serialize;

/// Passing threshold on the 0-20 scale.
pub const PASS_MARK: f64 = 10.0;

/// Two-decimal rounding, half away from zero.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Coefficient-weighted mean `sum(value * coef) / sum(coef)`, unrounded.
/// Reported averages go through `round_2`. `None` when the coefficients sum to zero.
pub fn raw_weighted_mean<I>(items: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut num = 0.0;
    let mut denom = 0.0;
    for (value, coef) in items {
        num += value * coef;
        denom += coef;
    }
    if denom <= 0.0 {
        return None;
    }
    Some(num / denom)
}

/// Compares the unrounded mean: 9.996 reports as 10.00 but does not pass.
pub fn passes(mean: f64) -> bool {
    mean >= PASS_MARK
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedEvaluation {
    pub evaluation_id: String,
    pub title: String,
    pub value: f64,
    pub coefficient: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOutcome {
    pub student_id: String,
    pub course_code: String,
    pub average: Option<f64>,
    pub passed: bool,
    pub evaluations: Vec<GradedEvaluation>,
}

/// Graded evaluations of one student in one course. Grades without a value
/// are not graded yet and are left out.
pub fn graded_evaluations(
    conn: &Connection,
    student_id: &str,
    course_code: &str,
) -> rusqlite::Result<Vec<GradedEvaluation>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.title, g.value, e.coefficient
         FROM grades g
         JOIN evaluations e ON e.id = g.evaluation_id
         WHERE g.student_id = ? AND e.course_code = ? AND g.value IS NOT NULL
         ORDER BY e.date, e.title",
    )?;
    stmt.query_map((student_id, course_code), |r| {
        Ok(GradedEvaluation {
            evaluation_id: r.get(0)?,
            title: r.get(1)?,
            value: r.get(2)?,
            coefficient: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

pub fn course_outcome(
    conn: &Connection,
    student_id: &str,
    course_code: &str,
) -> rusqlite::Result<CourseOutcome> {
    let evaluations = graded_evaluations(conn, student_id, course_code)?;
    let raw = raw_weighted_mean(evaluations.iter().map(|e| (e.value, e.coefficient)));
    Ok(CourseOutcome {
        student_id: student_id.to_string(),
        course_code: course_code.to_string(),
        average: raw.map(round_2),
        passed: raw.map(passes).unwrap_or(false),
        evaluations,
    })
}
