use crate::backup;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::ipc::error::respond;
use crate::ipc::helpers::{conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn workspace_path(state: &AppState, req: &Request) -> AppResult<PathBuf> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| AppError::new("no_workspace", "select a workspace first"))
}

fn handle_backup_export_json(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let out_path = required_str(&req.params, "outPath")?;
    let counts = backup::export_tables_json_file(conn, &PathBuf::from(&out_path)).map_err(|e| {
        AppError::new("io_failed", format!("{e:#}")).with_details(json!({ "path": out_path }))
    })?;
    info!(path = %out_path, "json backup written");
    Ok(json!({ "path": out_path, "tables": counts.to_json() }))
}

/// Reloads the tables named in the backup. A rejected backup leaves the
/// workspace untouched.
fn handle_backup_import_json(state: &mut AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = conn(state)?;
    let in_path = required_str(&req.params, "inPath")?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(AppError::new("not_found", "backup file not found")
            .with_details(json!({ "path": in_path })));
    }
    let counts = backup::import_tables_json_file(conn, &src).map_err(|e| {
        AppError::new("bad_backup", format!("{e:#}")).with_details(json!({ "path": in_path }))
    })?;
    info!(path = %in_path, "json backup restored");
    Ok(json!({ "path": in_path, "tables": counts.to_json() }))
}

fn handle_backup_export_workspace_bundle(
    state: &mut AppState,
    req: &Request,
) -> AppResult<serde_json::Value> {
    let out_path = required_str(&req.params, "outPath")?;
    let workspace_path = workspace_path(state, req)?;

    let export = backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path))
        .map_err(|e| {
            AppError::new("io_failed", format!("{e:#}")).with_details(json!({ "path": out_path }))
        })?;
    info!(path = %out_path, "workspace bundle written");
    Ok(json!({
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256
    }))
}

fn handle_backup_import_workspace_bundle(
    state: &mut AppState,
    req: &Request,
) -> AppResult<serde_json::Value> {
    let in_path = required_str(&req.params, "inPath")?;
    let workspace_path = workspace_path(state, req)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(AppError::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // Only the open workspace's file is about to be replaced.
    let replaces_open = state.workspace.as_deref() == Some(workspace_path.as_path());
    if replaces_open {
        state.db = None;
    }

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            let err = AppError::new("bad_backup", format!("{e:#}"))
                .with_details(json!({ "path": in_path }));
            if replaces_open {
                state.db = Some(db::open_db(&workspace_path).map_err(|reopen| {
                    AppError::new(
                        "db_open_failed",
                        format!("{e:#}; reopening workspace failed: {reopen:#}"),
                    )
                    .with_details(json!({ "path": in_path }))
                })?);
            }
            return Err(err);
        }
    };

    let conn = db::open_db(&workspace_path)
        .map_err(|e| AppError::new("db_open_failed", format!("{e:#}")))?;
    state.workspace = Some(workspace_path.clone());
    state.db = Some(conn);
    info!(workspace = %workspace_path.display(), format = %import.bundle_format_detected, "workspace bundle restored");
    Ok(json!({
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportJson" => handle_backup_export_json(state, req),
        "backup.importJson" => handle_backup_import_json(state, req),
        "backup.exportWorkspaceBundle" => handle_backup_export_workspace_bundle(state, req),
        "backup.importWorkspaceBundle" => handle_backup_import_workspace_bundle(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
