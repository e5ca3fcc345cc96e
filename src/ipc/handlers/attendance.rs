use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    get_optional_str, get_required_date, get_required_str, parse_filter, parse_status,
    session_parts,
};
use crate::ipc::types::{AppState, Request};
use crate::model::MarkAllScope;
use serde_json::json;
use std::time::Instant;

fn get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(&req.params)?;
    let (_, session) = session_parts(state)?;
    let statuses = session.store().date_row(&date);
    Ok(json!({ "date": date, "statuses": statuses }))
}

fn set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(&req.params)?;
    let entry_id = get_required_str(&req.params, "entryId")?;
    let status = parse_status(&get_required_str(&req.params, "status")?)?;
    let (conn, session) = session_parts(state)?;
    session.apply(conn, Instant::now(), |s| s.set_status(&date, &entry_id, status))?;
    Ok(json!({ "ok": true }))
}

fn cycle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(&req.params)?;
    let entry_id = get_required_str(&req.params, "entryId")?;
    let (conn, session) = session_parts(state)?;
    let status = session.apply(conn, Instant::now(), |s| s.cycle_status(&date, &entry_id))?;
    Ok(json!({ "status": status }))
}

fn set_all(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(&req.params)?;
    let status = parse_status(&get_required_str(&req.params, "status")?)?;
    let filter = parse_filter(&req.params)?;
    let scope_raw = get_optional_str(&req.params, "scope")?;
    let (conn, session) = session_parts(state)?;
    let scope = match scope_raw {
        Some(s) => MarkAllScope::parse(&s, filter).ok_or_else(|| {
            HandlerErr::new("bad_params", "scope must be one of: group, visible")
        })?,
        None => session.settings().default_mark_all_scope(filter),
    };
    let updated = session.apply(conn, Instant::now(), |s| {
        s.set_all_status(&date, status, scope)
    })?;
    Ok(json!({ "updated": updated }))
}

fn clear_date(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let date = get_required_date(&req.params)?;
    let (conn, session) = session_parts(state)?;
    session.apply(conn, Instant::now(), |s| s.clear_date(&date))?;
    Ok(json!({ "ok": true }))
}

fn summary(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let entry_id = get_required_str(&req.params, "entryId")?;
    let (_, session) = session_parts(state)?;
    // Unknown and removed ids count as never marked.
    Ok(json!(session.store().summarize(&entry_id)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.get" => get(state, req),
        "attendance.set" => set(state, req),
        "attendance.cycle" => cycle(state, req),
        "attendance.setAll" => set_all(state, req),
        "attendance.clearDate" => clear_date(state, req),
        "attendance.summary" => summary(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
