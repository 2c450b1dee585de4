use crate::error::AppResult;
use crate::identity;
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, required_str, session, to_value};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_auth_login(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let email = required_str(&req.params, "email")?;
    // params.password is accepted and ignored.
    let login = identity::login(conn, &email, state.config.token_ttl_hours)?;
    to_value(&login)
}

fn handle_auth_verify(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let session = session(state, req)?;
    let roles = identity::roles_of(conn(state)?, &session.user_id)?;
    let roles: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
    Ok(json!({ "session": to_value(&session)?, "roles": roles }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.login" => handle_auth_login(state, req),
        "auth.verify" => handle_auth_verify(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
