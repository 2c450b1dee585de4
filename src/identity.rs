use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::db;
use crate::error::{AppError, AppResult};
use crate::roles::Role;
use crate::token::{self, Session, TokenErrorCode};

const SIGNING_KEY_META: &str = "auth.signingKey";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Login {
    pub token: String,
    pub session: Session,
    pub person: Person,
}

pub fn find_person_by_email(conn: &Connection, email: &str) -> AppResult<Option<Person>> {
    Ok(conn
        .query_row(
            "SELECT id, name, email FROM persons WHERE email = ? COLLATE NOCASE",
            [email.trim()],
            |r| {
                Ok(Person {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    email: r.get(2)?,
                })
            },
        )
        .optional()?)
}

/// Highest-priority role held by the person, probed in a single query over
/// every role table.
pub fn resolve_role(conn: &Connection, person_id: &str) -> AppResult<Option<Role>> {
    let probes: Vec<String> = Role::PRIORITY
        .iter()
        .map(|role| {
            format!(
                "SELECT {} AS prio FROM {} WHERE person_id = ?1",
                role.rank(),
                role.table()
            )
        })
        .collect();
    let sql = format!(
        "SELECT prio FROM ({}) ORDER BY prio LIMIT 1",
        probes.join(" UNION ALL ")
    );
    let rank: Option<i64> = conn
        .query_row(&sql, [person_id], |r| r.get(0))
        .optional()?;
    Ok(rank.and_then(|r| Role::PRIORITY.get(r as usize).copied()))
}

/// Every role record the person holds, highest priority first.
pub fn roles_of(conn: &Connection, person_id: &str) -> AppResult<Vec<Role>> {
    let mut out = Vec::new();
    for role in Role::PRIORITY {
        if crate::workflow::has_role(conn, person_id, role)? {
            out.push(role);
        }
    }
    Ok(out)
}

fn signing_key(conn: &Connection) -> AppResult<Vec<u8>> {
    if let Some(v) = db::meta_get_json(conn, SIGNING_KEY_META).map_err(AppError::internal)? {
        if let Some(decoded) = v.as_str().and_then(|s| STANDARD.decode(s).ok()) {
            return Ok(decoded);
        }
        warn!("stored signing key is unreadable; issuing a new one");
    }
    let secret = token::new_secret();
    db::meta_set_json(conn, SIGNING_KEY_META, &json!(STANDARD.encode(&secret)))
        .map_err(AppError::internal)?;
    Ok(secret)
}

/// Any password is accepted; only the email identifies the caller.
pub fn login(conn: &Connection, email: &str, ttl_hours: i64) -> AppResult<Login> {
    let person = find_person_by_email(conn, email)?.ok_or_else(|| {
        AppError::new("not_found", "no person with this email")
            .with_details(json!({ "email": email.trim() }))
    })?;
    let role = resolve_role(conn, &person.id)?.ok_or_else(|| {
        AppError::new("no_role", "person holds no role in the department")
            .with_details(json!({ "personId": person.id }))
    })?;

    let session = Session::new(
        person.id.clone(),
        role,
        Utc::now().timestamp(),
        ttl_hours * 3600,
    );
    let token = token::encode_token(&session, &signing_key(conn)?)
        .map_err(|e| AppError::new("internal", e.to_string()))?;
    info!(person = %person.id, role = role.as_str(), "session issued");
    Ok(Login {
        token,
        session,
        person,
    })
}

/// Checks signature and expiry, and that the person still exists.
pub fn verify(conn: &Connection, raw_token: &str) -> AppResult<Session> {
    let session = token::decode_token(raw_token, &signing_key(conn)?, Utc::now().timestamp())
        .map_err(|e| {
            let message = match e.code {
                TokenErrorCode::Expired => "session expired",
                _ => "invalid session token",
            };
            AppError::new("unauthorized", message).with_details(json!({ "reason": e.message }))
        })?;
    if !crate::workflow::person_exists(conn, &session.user_id)? {
        return Err(AppError::new("unauthorized", "session user no longer exists"));
    }
    Ok(session)
}
