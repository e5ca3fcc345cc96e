use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, parse_filter, session_parts};
use crate::ipc::types::{AppState, Request};
use crate::model::is_valid_date;
use serde_json::json;
use std::time::Instant;

fn list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let date = get_optional_str(&req.params, "date")?;
    if let Some(d) = date.as_deref() {
        if !is_valid_date(d) {
            return Err(HandlerErr::new("bad_params", "date must be YYYY-MM-DD"));
        }
    }
    let filter = parse_filter(&req.params)?;
    let (_, session) = session_parts(state)?;
    let store = session.store();

    // Without a date the filter has nothing to look at, so every entry shows.
    let entries: Vec<_> = match date.as_deref() {
        Some(d) => store.visible_entries(d, filter),
        None => store.roster().iter().collect(),
    };
    let rows: Vec<serde_json::Value> = entries
        .into_iter()
        .map(|e| {
            let mut row = json!({
                "id": e.id,
                "name": e.name,
                "groupKey": e.group_key,
                "summary": store.summarize(&e.id),
            });
            if let Some(d) = date.as_deref() {
                row["status"] = json!(store.status_of(d, &e.id));
            }
            row
        })
        .collect();
    Ok(json!({ "entries": rows }))
}

fn add(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(&req.params, "name")?;
    let (conn, session) = session_parts(state)?;
    match session.apply(conn, Instant::now(), |s| s.add_entry(&name))? {
        Some(entry) => {
            tracing::debug!(entry_id = %entry.id, "roster entry added");
            Ok(json!({ "entry": entry }))
        }
        None => Ok(json!({ "entry": null, "ignored": true })),
    }
}

fn remove(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(&req.params, "entryId")?;
    let (conn, session) = session_parts(state)?;
    session.apply(conn, Instant::now(), |s| s.remove_entry(&entry_id))?;
    Ok(json!({ "ok": true }))
}

fn remove_all(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, session) = session_parts(state)?;
    let removed = session.apply(conn, Instant::now(), |s| s.remove_all())?;
    tracing::info!(removed, "roster cleared");
    Ok(json!({ "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "roster.list" => list(state, req),
        "roster.add" => add(state, req),
        "roster.remove" => remove(state, req),
        "roster.removeAll" => remove_all(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
