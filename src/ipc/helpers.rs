use rusqlite::Connection;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::identity;
use crate::ipc::types::{AppState, Request};
use crate::token::Session;

pub fn conn(state: &AppState) -> AppResult<&Connection> {
    state
        .db
        .as_ref()
        .ok_or_else(|| AppError::new("no_workspace", "select a workspace first"))
}

pub fn required_str(params: &serde_json::Value, key: &str) -> AppResult<String> {
    match params.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        Some(_) => Err(AppError::bad_params(format!("{} must not be empty", key))),
        None => Err(AppError::bad_params(format!("missing {}", key))),
    }
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> AppResult<f64> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| AppError::bad_params(format!("missing numeric {}", key)))
}

pub fn optional_f64(params: &serde_json::Value, key: &str) -> AppResult<Option<f64>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| AppError::bad_params(format!("{} must be a number", key))),
    }
}

pub fn optional_i64(params: &serde_json::Value, key: &str) -> AppResult<Option<i64>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| AppError::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn optional_bool(params: &serde_json::Value, key: &str) -> AppResult<Option<bool>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| AppError::bad_params(format!("{} must be a boolean", key))),
    }
}

/// Parses an optional status-like string with `parse`, rejecting unknown values.
pub fn optional_enum<T>(
    params: &serde_json::Value,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> AppResult<Option<T>> {
    match optional_str(params, key) {
        None => Ok(None),
        Some(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| AppError::bad_params(format!("unknown {}: {}", key, raw))),
    }
}

/// The caller's session, from `params.token`.
pub fn session(state: &AppState, req: &Request) -> AppResult<Session> {
    let conn = conn(state)?;
    let token = req
        .params
        .get("token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::new("unauthorized", "missing session token"))?;
    identity::verify(conn, token)
}

pub fn to_value<T: Serialize>(v: &T) -> AppResult<serde_json::Value> {
    serde_json::to_value(v).map_err(|e| AppError::internal(e.into()))
}
