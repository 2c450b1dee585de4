use crate::backup;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

const RESERVED_META_PREFIX: &str = "auth.";

fn handle_health(state: &mut AppState, _req: &Request) -> AppResult<serde_json::Value> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
    }))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let path = PathBuf::from(required_str(&req.params, "path")?);

    // Release the previous workspace before opening the next one.
    state.db = None;
    let conn = db::open_db(&path).map_err(|e| AppError::new("db_open_failed", format!("{e:#}")))?;
    let schema_version = db::schema_version(&conn).map_err(AppError::internal)?;
    info!(workspace = %path.display(), schema_version, "workspace opened");

    state.workspace = Some(path.clone());
    state.db = Some(conn);
    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "schemaVersion": schema_version
    }))
}

fn handle_workspace_info(state: &mut AppState, _req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let counts = backup::row_counts(conn).map_err(AppError::internal)?;
    Ok(json!({
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "schemaVersion": db::schema_version(conn).map_err(AppError::internal)?,
        "tables": counts.to_json()
    }))
}

fn meta_key(req: &Request) -> AppResult<String> {
    let key = required_str(&req.params, "key")?;
    if key.starts_with(RESERVED_META_PREFIX) {
        return Err(AppError::bad_params("meta key is reserved").with_details(json!({ "key": key })));
    }
    Ok(key)
}

fn handle_meta_get(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let key = meta_key(req)?;
    let value = db::meta_get_json(conn, &key).map_err(AppError::internal)?;
    Ok(json!({ "key": key, "value": value }))
}

fn handle_meta_set(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let key = meta_key(req)?;
    let value = req
        .params
        .get("value")
        .cloned()
        .ok_or_else(|| AppError::bad_params("missing value"))?;
    db::meta_set_json(conn, &key, &value).map_err(AppError::internal)?;
    Ok(json!({ "key": key, "value": value }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        "workspace.info" => handle_workspace_info(state, req),
        "meta.get" => handle_meta_get(state, req),
        "meta.set" => handle_meta_set(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
