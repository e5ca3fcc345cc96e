use crate::export;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, session_parts};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let out_path = PathBuf::from(get_required_str(&req.params, "outPath")?);
    let (_, session) = session_parts(state)?;
    let store = session.store();
    let summaries: Vec<_> = store
        .roster()
        .iter()
        .map(|e| (e.clone(), store.summarize(&e.id)))
        .collect();

    let summary = export::export_group_bundle(
        store.group_key(),
        &store.snapshot(),
        &summaries,
        &out_path,
    )
    .map_err(|e| HandlerErr::new("export_failed", format!("{e:?}")))?;
    tracing::info!(out = %out_path.to_string_lossy(), "export bundle written");
    Ok(json!({
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "outPath": out_path.to_string_lossy(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.bundle" => Some(respond(&req.id, bundle(state, req))),
        _ => None,
    }
}
