use crate::db;
use crate::ipc::helpers::{get_required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use log::{info, warn};
use serde_json::json;
use std::path::Path;

fn health(state: &AppState) -> serde_json::Value {
    let schema_version = state
        .db
        .as_ref()
        .and_then(|conn| db::schema_version(conn).ok());
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy()),
        "schemaVersion": schema_version
    })
}

/// Opens (creating if needed) the workspace at `path` and makes it current.
/// On failure no workspace is selected.
pub fn select_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    state.db = None;
    state.workspace = None;
    let conn = db::open_db(path)?;
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    info!(
        "event=workspace_select module=ipc status=ok path={}",
        path.display()
    );
    Ok(())
}

fn workspace_select(
    state: &mut AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let raw = get_required_str(params, "path")?;
    let path = Path::new(&raw);
    select_workspace(state, path).map_err(|e| {
        warn!(
            "event=workspace_select module=ipc status=error path={} error={e:#}",
            path.display()
        );
        HandlerErr::new("db_open_failed", format!("{e:#}"))
    })?;
    Ok(json!({ "workspacePath": raw }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(respond(req, Ok(health(state)))),
        "workspace.select" => Some(respond(req, workspace_select(state, &req.params))),
        _ => None,
    }
}
