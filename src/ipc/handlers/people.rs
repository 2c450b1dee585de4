use crate::error::{AppError, AppResult};
use crate::identity;
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::roles::Role;
use crate::workflow::{now_stamp, require_person};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// Optional columns of each role record: (wire key, column).
fn role_fields(role: Role) -> &'static [(&'static str, &'static str)] {
    match role {
        Role::DepartmentHead => &[("department", "department")],
        Role::Coordinator => &[("program", "program")],
        Role::LabChief => &[("laboratory", "laboratory")],
        Role::Teacher => &[("specialty", "specialty"), ("appogee", "appogee")],
        Role::Staff => &[("position", "position")],
        Role::Technician => &[("specialty", "specialty")],
        Role::Student => &[
            ("studentNo", "student_no"),
            ("address", "address"),
            ("level", "level"),
        ],
        Role::Admin => &[],
    }
}

fn grant_role(
    conn: &Connection,
    person_id: &str,
    role: Role,
    fields: &serde_json::Value,
) -> AppResult<()> {
    let mut cols = vec!["person_id"];
    let mut vals = vec![Value::Text(person_id.to_string())];
    for (key, col) in role_fields(role) {
        cols.push(*col);
        vals.push(match optional_str(fields, key) {
            Some(v) => Value::Text(v),
            None => Value::Null,
        });
    }
    if role == Role::Admin {
        cols.push("granted_at");
        vals.push(Value::Text(now_stamp()));
    }
    let updates: Vec<String> = cols[1..]
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    let sql = format!(
        "INSERT INTO {}({}) VALUES({}) ON CONFLICT(person_id) DO {}",
        role.table(),
        cols.join(", "),
        vec!["?"; cols.len()].join(", "),
        if updates.is_empty() {
            "NOTHING".to_string()
        } else {
            format!("UPDATE SET {}", updates.join(", "))
        }
    );
    conn.execute(&sql, params_from_iter(vals))?;
    Ok(())
}

fn parse_role(raw: &str) -> AppResult<Role> {
    Role::parse(raw).ok_or_else(|| AppError::bad_params(format!("unknown role: {}", raw)))
}

fn person_json(conn: &Connection, person_id: &str) -> AppResult<serde_json::Value> {
    let row = conn
        .query_row(
            "SELECT id, name, email, created_at FROM persons WHERE id = ?",
            [person_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "email": r.get::<_, String>(2)?,
                    "createdAt": r.get::<_, String>(3)?,
                }))
            },
        )
        .optional()?;
    let Some(mut person) = row else {
        return Err(AppError::not_found("person", person_id));
    };
    let roles = identity::roles_of(conn, person_id)?;
    let primary = identity::resolve_role(conn, person_id)?;
    person["roles"] = json!(roles.iter().map(|r| r.as_str()).collect::<Vec<_>>());
    person["primaryRole"] = json!(primary.map(|r| r.as_str()));
    Ok(person)
}

fn handle_persons_create(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let name = required_str(&req.params, "name")?;
    let email = required_str(&req.params, "email")?;
    if !email.contains('@') {
        return Err(AppError::bad_params("email must contain @"));
    }
    let role = optional_str(&req.params, "role")
        .map(|r| parse_role(&r))
        .transpose()?;

    if identity::find_person_by_email(conn, &email)?.is_some() {
        return Err(AppError::new("conflict", "email already in use")
            .with_details(json!({ "email": email })));
    }

    let person_id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO persons(id, name, email, created_at) VALUES(?, ?, ?, ?)",
        (&person_id, &name, &email, now_stamp()),
    )?;
    if let Some(role) = role {
        let fields = req.params.get("fields").cloned().unwrap_or(json!({}));
        grant_role(&tx, &person_id, role, &fields)?;
    }
    tx.commit()?;
    info!(person = %person_id, "person created");
    person_json(conn, &person_id)
}

fn handle_persons_list(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let role = optional_str(&req.params, "role")
        .map(|r| parse_role(&r))
        .transpose()?;
    let sql = match role {
        Some(role) => format!(
            "SELECT p.id FROM persons p JOIN {} r ON r.person_id = p.id ORDER BY p.name",
            role.table()
        ),
        None => "SELECT id FROM persons ORDER BY name".to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let persons = ids
        .iter()
        .map(|id| person_json(conn, id))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(json!({ "persons": persons }))
}

fn handle_persons_get(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let person_id = required_str(&req.params, "personId")?;
    person_json(conn, &person_id)
}

/// Role records, enrollments and grades go with the person; reported
/// incidents block the delete.
fn handle_persons_delete(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let person_id = required_str(&req.params, "personId")?;
    require_person(conn, &person_id)?;
    conn.execute("DELETE FROM persons WHERE id = ?", [&person_id])
        .map_err(|e| {
            let e = AppError::from(e);
            if e.code == "restricted" {
                e.with_details(json!({ "personId": person_id, "reason": "referenced by incidents" }))
            } else {
                e
            }
        })?;
    info!(person = %person_id, "person deleted");
    Ok(json!({ "deleted": person_id }))
}

fn handle_roles_grant(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let person_id = required_str(&req.params, "personId")?;
    let role = parse_role(&required_str(&req.params, "role")?)?;
    require_person(conn, &person_id)?;
    let fields = req.params.get("fields").cloned().unwrap_or(json!({}));
    grant_role(conn, &person_id, role, &fields)?;
    info!(person = %person_id, role = role.as_str(), "role granted");
    person_json(conn, &person_id)
}

fn handle_roles_revoke(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let person_id = required_str(&req.params, "personId")?;
    let role = parse_role(&required_str(&req.params, "role")?)?;
    require_person(conn, &person_id)?;
    conn.execute(
        &format!("DELETE FROM {} WHERE person_id = ?", role.table()),
        [&person_id],
    )?;
    info!(person = %person_id, role = role.as_str(), "role revoked");
    person_json(conn, &person_id)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "persons.create" => handle_persons_create(state, req),
        "persons.list" => handle_persons_list(state, req),
        "persons.get" => handle_persons_get(state, req),
        "persons.delete" => handle_persons_delete(state, req),
        "roles.grant" => handle_roles_grant(state, req),
        "roles.revoke" => handle_roles_revoke(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
