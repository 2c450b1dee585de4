use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, optional_i64, optional_str, required_str, to_value};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use crate::workflow::class_session::{self, NewClassSession};
use crate::workflow::reservation::TimeSlot;
use crate::workflow::{fmt_date, has_role, now_stamp, parse_date};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn require_course(conn: &Connection, code: &str) -> AppResult<()> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE code = ?", [code], |r| r.get(0))
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(AppError::not_found("course", code)),
    }
}

fn require_student(conn: &Connection, student_id: &str) -> AppResult<()> {
    if has_role(conn, student_id, Role::Student)? {
        Ok(())
    } else {
        Err(AppError::not_found("student", student_id))
    }
}

fn course_json(conn: &Connection, code: &str) -> AppResult<serde_json::Value> {
    conn.query_row(
        "SELECT
           c.code, c.title, c.semester, c.year, c.teacher_id,
           (SELECT COUNT(*) FROM chapters ch WHERE ch.course_code = c.code),
           (SELECT COUNT(*) FROM sessions s WHERE s.course_code = c.code),
           (SELECT COUNT(*) FROM homework h WHERE h.course_code = c.code),
           (SELECT COUNT(*) FROM evaluations e WHERE e.course_code = c.code),
           (SELECT COUNT(*) FROM enrollments en WHERE en.course_code = c.code)
         FROM courses c WHERE c.code = ?",
        [code],
        |r| {
            Ok(json!({
                "code": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "semester": r.get::<_, Option<String>>(2)?,
                "year": r.get::<_, Option<i64>>(3)?,
                "teacherId": r.get::<_, Option<String>>(4)?,
                "chapterCount": r.get::<_, i64>(5)?,
                "sessionCount": r.get::<_, i64>(6)?,
                "homeworkCount": r.get::<_, i64>(7)?,
                "evaluationCount": r.get::<_, i64>(8)?,
                "enrollmentCount": r.get::<_, i64>(9)?,
            }))
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("course", code))
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "code")?;
    let title = required_str(&req.params, "title")?;
    let semester = optional_str(&req.params, "semester");
    let year = optional_i64(&req.params, "year")?;
    let teacher_id = optional_str(&req.params, "teacherId");
    if let Some(t) = teacher_id.as_deref() {
        if !has_role(conn, t, Role::Teacher)? {
            return Err(AppError::not_found("teacher", t));
        }
    }

    conn.execute(
        "INSERT INTO courses(code, title, semester, year, teacher_id) VALUES(?, ?, ?, ?, ?)",
        (&code, &title, &semester, year, &teacher_id),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            AppError::new("conflict", "course code already exists")
                .with_details(json!({ "code": code }))
        }
        other => AppError::from(other),
    })?;
    info!(course = %code, "course created");
    course_json(conn, &code)
}

fn handle_courses_list(state: &mut AppState, _req: &Request) -> AppResult<serde_json::Value> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "courses": [] }));
    };
    let mut stmt = conn.prepare("SELECT code FROM courses ORDER BY year, semester, code")?;
    let codes = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let courses = codes
        .iter()
        .map(|c| course_json(conn, c))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(json!({ "courses": courses }))
}

fn handle_courses_get(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "code")?;
    let mut course = course_json(conn, &code)?;

    let mut stmt = conn.prepare(
        "SELECT id, title, sort_order FROM chapters WHERE course_code = ? ORDER BY sort_order",
    )?;
    let chapters = stmt
        .query_map([&code], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "sortOrder": r.get::<_, i64>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    course["chapters"] = json!(chapters);
    course["sessions"] = to_value(&class_session::list_for_course(conn, &code)?)?;
    Ok(course)
}

/// Chapters, sessions, homework, evaluations, grades, enrollments and
/// deliberations of the course are removed with it.
fn handle_courses_delete(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "code")?;
    require_course(conn, &code)?;
    conn.execute("DELETE FROM courses WHERE code = ?", [&code])?;
    info!(course = %code, "course deleted");
    Ok(json!({ "deleted": code }))
}

fn handle_chapters_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "courseCode")?;
    let title = required_str(&req.params, "title")?;
    require_course(conn, &code)?;
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM chapters WHERE course_code = ?",
        [&code],
        |r| r.get(0),
    )?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO chapters(id, course_code, title, sort_order) VALUES(?, ?, ?, ?)",
        (&id, &code, &title, next),
    )?;
    Ok(json!({ "id": id, "courseCode": code, "title": title, "sortOrder": next }))
}

fn handle_chapters_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "courseCode")?;
    require_course(conn, &code)?;
    let mut stmt = conn.prepare(
        "SELECT id, title, sort_order FROM chapters WHERE course_code = ? ORDER BY sort_order",
    )?;
    let chapters = stmt
        .query_map([&code], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "sortOrder": r.get::<_, i64>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "chapters": chapters }))
}

fn handle_sessions_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let slot = TimeSlot::parse(
        &required_str(&req.params, "date")?,
        &required_str(&req.params, "start")?,
        &required_str(&req.params, "end")?,
    )?;
    let session = class_session::create(
        conn,
        NewClassSession {
            course_code: required_str(&req.params, "courseCode")?,
            slot,
            room_id: optional_str(&req.params, "roomId"),
            kind: optional_str(&req.params, "kind"),
        },
    )?;
    to_value(&session)
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "courseCode")?;
    require_course(conn, &code)?;
    Ok(json!({ "sessions": to_value(&class_session::list_for_course(conn, &code)?)? }))
}

fn handle_sessions_confirm(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let id = required_str(&req.params, "sessionId")?;
    to_value(&class_session::confirm(conn, &id)?)
}

fn handle_homework_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "courseCode")?;
    let title = required_str(&req.params, "title")?;
    let description = optional_str(&req.params, "description");
    let due_date = optional_str(&req.params, "dueDate")
        .map(|d| parse_date(&d).map(fmt_date))
        .transpose()?;
    require_course(conn, &code)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO homework(id, course_code, title, description, due_date) VALUES(?, ?, ?, ?, ?)",
        (&id, &code, &title, &description, &due_date),
    )?;
    Ok(json!({
        "id": id,
        "courseCode": code,
        "title": title,
        "description": description,
        "dueDate": due_date
    }))
}

fn handle_homework_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = required_str(&req.params, "courseCode")?;
    require_course(conn, &code)?;
    let mut stmt = conn.prepare(
        "SELECT id, title, description, due_date FROM homework
         WHERE course_code = ? ORDER BY due_date, title",
    )?;
    let homework = stmt
        .query_map([&code], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "dueDate": r.get::<_, Option<String>>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "homework": homework }))
}

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let code = required_str(&req.params, "courseCode")?;
    require_student(conn, &student_id)?;
    require_course(conn, &code)?;
    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO enrollments(id, student_id, course_code, enrolled_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id, course_code) DO NOTHING",
        (&id, &student_id, &code, now_stamp()),
    )?;
    Ok(json!({
        "studentId": student_id,
        "courseCode": code,
        "created": inserted > 0
    }))
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let code = optional_str(&req.params, "courseCode");
    let student_id = optional_str(&req.params, "studentId");
    let (sql, key) = match (code, student_id) {
        (Some(c), _) => (
            "SELECT e.student_id, e.course_code, e.enrolled_at, p.name
             FROM enrollments e JOIN persons p ON p.id = e.student_id
             WHERE e.course_code = ? ORDER BY p.name",
            c,
        ),
        (None, Some(s)) => (
            "SELECT e.student_id, e.course_code, e.enrolled_at, p.name
             FROM enrollments e JOIN persons p ON p.id = e.student_id
             WHERE e.student_id = ? ORDER BY e.course_code",
            s,
        ),
        (None, None) => return Err(AppError::bad_params("courseCode or studentId is required")),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([&key], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "courseCode": r.get::<_, String>(1)?,
                "enrolledAt": r.get::<_, String>(2)?,
                "studentName": r.get::<_, String>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "enrollments": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "courses.create" => handle_courses_create(state, req),
        "courses.list" => handle_courses_list(state, req),
        "courses.get" => handle_courses_get(state, req),
        "courses.delete" => handle_courses_delete(state, req),
        "chapters.create" => handle_chapters_create(state, req),
        "chapters.list" => handle_chapters_list(state, req),
        "sessions.create" => handle_sessions_create(state, req),
        "sessions.list" => handle_sessions_list(state, req),
        "sessions.confirm" => handle_sessions_confirm(state, req),
        "homework.create" => handle_homework_create(state, req),
        "homework.list" => handle_homework_list(state, req),
        "enrollments.create" => handle_enrollments_create(state, req),
        "enrollments.list" => handle_enrollments_list(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
