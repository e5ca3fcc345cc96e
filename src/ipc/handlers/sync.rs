use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::session_parts;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::time::Instant;

fn sync_now(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let (_, session) = session_parts(state)?;
    let scheduled = session.flush_now(Instant::now());
    tracing::debug!(scheduled, "manual sync requested");
    Ok(json!({ "scheduled": scheduled }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sync.now" => Some(respond(&req.id, sync_now(state))),
        _ => None,
    }
}
