use crate::error::StoreError;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;
use crate::model::{is_valid_date, AttendanceStatus, StatusFilter};
use crate::session::Session;
use rusqlite::Connection;

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::new("bad_params", format!("{} must be string", key))),
    }
}

pub fn get_required_date(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let date = get_required_str(params, "date")?;
    if !is_valid_date(&date) {
        return Err(HandlerErr::new("bad_params", "date must be YYYY-MM-DD"));
    }
    Ok(date)
}

pub fn parse_status(raw: &str) -> Result<AttendanceStatus, HandlerErr> {
    AttendanceStatus::parse(raw).ok_or_else(|| StoreError::InvalidStatus(raw.to_string()).into())
}

pub fn parse_filter(params: &serde_json::Value) -> Result<StatusFilter, HandlerErr> {
    match get_optional_str(params, "filter")? {
        None => Ok(StatusFilter::All),
        Some(s) => StatusFilter::parse(&s).ok_or_else(|| {
            HandlerErr::new("bad_params", "filter must be one of: all, present, absent, late")
        }),
    }
}

pub fn workspace_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Cache connection plus the active session, borrowed together.
pub fn session_parts(state: &mut AppState) -> Result<(&Connection, &mut Session), HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let Some(session) = state.session.as_mut() else {
        return Err(HandlerErr::new("no_session", "log in first"));
    };
    Ok((conn, session))
}
