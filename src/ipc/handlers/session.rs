use crate::ipc::error::{ok, respond, HandlerErr};
use crate::ipc::handlers::setup::{load_accounts, load_sync_settings};
use crate::ipc::helpers::{get_required_str, workspace_conn};
use crate::ipc::types::{AppState, Request};
use crate::session::{gateway_for, Session};
use serde_json::json;
use std::time::Instant;

fn login(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(&req.params, "username")?;
    let password = get_required_str(&req.params, "password")?;

    let (group, settings) = {
        let conn = workspace_conn(state)?;
        let accounts =
            load_accounts(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        let Some(account) = accounts.authenticate(&username, &password) else {
            tracing::info!(username = username.trim(), "login rejected");
            return Err(HandlerErr::new(
                "invalid_credentials",
                "invalid username or password",
            ));
        };
        let settings = load_sync_settings(conn)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        (account.group.clone(), settings)
    };

    state.end_session();
    let epoch = state.take_epoch();
    let gateway = state
        .workspace
        .as_deref()
        .and_then(|ws| gateway_for(&settings, ws));
    let conn = workspace_conn(state)?;
    let session = Session::start(
        username.trim(),
        &group,
        epoch,
        settings,
        gateway,
        conn,
        &state.events,
        Instant::now(),
    );
    let result = json!({
        "username": session.username(),
        "groupKey": session.store().group_key(),
        "state": session.store().readiness().as_str(),
    });
    state.session = Some(session);
    Ok(result)
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, login(state, req))
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let status = match state.session.as_ref() {
        Some(session) => session.status_json(),
        None => json!({
            "state": "uninitialized",
            "username": null,
            "groupKey": null,
            "remoteEnabled": false,
            "dirtyCount": 0,
            "flushInFlight": false,
            "flushPending": false,
            "flushedBatches": 0,
            "lastSyncError": null,
        }),
    };
    ok(&req.id, status)
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.end_session();
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.login" => Some(handle_login(state, req)),
        "session.status" => Some(handle_status(state, req)),
        "session.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
