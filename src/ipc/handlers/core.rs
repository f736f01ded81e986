use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "authenticated": state.session.is_authenticated(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match state.open_workspace(&path) {
        Ok(()) => {
            info!(workspace = %path.display(), "workspace opened");
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_auth_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let username = req.params.get("username").and_then(|v| v.as_str());
    let password = req.params.get("password").and_then(|v| v.as_str());
    let (Some(username), Some(password)) = (username, password) else {
        return err(&req.id, "bad_params", "missing username or password", None);
    };

    if state.credentials.matches(username, password) {
        info!(username, "login");
        state.session.username = Some(username.to_string());
        ok(&req.id, json!({ "authenticated": true, "username": username }))
    } else {
        warn!(username, "rejected login");
        err(&req.id, "unauthorized", "invalid username or password", None)
    }
}

fn handle_auth_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(username) = state.session.username.take() {
        info!(username = %username, "logout");
    }
    ok(&req.id, json!({ "authenticated": false }))
}

fn handle_auth_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "authenticated": state.session.is_authenticated(),
            "username": state.session.username,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "auth.login" => Some(handle_auth_login(state, req)),
        "auth.logout" => Some(handle_auth_logout(state, req)),
        "auth.status" => Some(handle_auth_status(state, req)),
        _ => None,
    }
}
