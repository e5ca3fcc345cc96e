use crate::config::{Accounts, SyncSettings};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

#[derive(Clone, Copy)]
enum SetupSection {
    Sync,
    Accounts,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(Self::Sync),
            "accounts" => Some(Self::Accounts),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Sync => "setup.sync",
            Self::Accounts => "setup.accounts",
        }
    }
}

const DEFAULT_ACCOUNTS: [(&str, &str, &str); 5] = [
    ("srp_5am", "srpLeader5AM", "5am"),
    ("srp_8am", "srpLeader8AM", "8am"),
    ("srp_10am", "srpLeader10AM", "10am"),
    ("srp_4pm", "srpLeader4PM", "4pm"),
    ("srp_6pm", "srpLeader6PM", "6pm"),
];

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Sync => json!({
            "remotePath": null,
            "debounceMs": 1500,
            "remoteTimeoutMs": 10000,
            "markAllScope": "group"
        }),
        SetupSection::Accounts => json!({
            "users": DEFAULT_ACCOUNTS
                .iter()
                .map(|(username, password, group)| json!({
                    "username": username,
                    "password": password,
                    "group": group
                }))
                .collect::<Vec<_>>()
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, max_len)?;
    if s.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::String(s))
}

fn parse_users(v: &Value) -> Result<Value, String> {
    let list = v.as_array().ok_or("users must be an array")?;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(list.len());
    for (i, item) in list.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| format!("users[{}] must be an object", i))?;
        let mut fields = Map::new();
        for key in ["username", "password", "group"] {
            let raw = obj
                .get(key)
                .ok_or_else(|| format!("users[{}].{} is required", i, key))?;
            let s = parse_string_max(raw, key, 64)?;
            if s.is_empty() {
                return Err(format!("users[{}].{} must not be blank", i, key));
            }
            fields.insert(key.to_string(), Value::String(s));
        }
        let username = fields["username"].as_str().unwrap_or_default().to_string();
        if !seen.insert(username.clone()) {
            return Err(format!("duplicate username: {}", username));
        }
        out.push(Value::Object(fields));
    }
    Ok(Value::Array(out))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Sync => match k.as_str() {
                "remotePath" => {
                    obj.insert(k.clone(), parse_nullable_string_max(v, k, 1024)?);
                }
                "debounceMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 600_000)?));
                }
                "remoteTimeoutMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 600_000)?));
                }
                "markAllScope" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if s != "group" && s != "visible" {
                        return Err("markAllScope must be one of: group, visible".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown sync field: {}", k)),
            },
            SetupSection::Accounts => match k.as_str() {
                "users" => {
                    obj.insert(k.clone(), parse_users(v)?);
                }
                _ => return Err(format!("unknown accounts field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed saved value falls back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn load_sync_settings(conn: &rusqlite::Connection) -> anyhow::Result<SyncSettings> {
    Ok(serde_json::from_value(load_section(conn, SetupSection::Sync)?)?)
}

pub fn load_accounts(conn: &rusqlite::Connection) -> anyhow::Result<Accounts> {
    Ok(serde_json::from_value(load_section(
        conn,
        SetupSection::Accounts,
    )?)?)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let sync = match load_section(conn, SetupSection::Sync) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let accounts = match load_section(conn, SetupSection::Accounts) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "sync": sync,
            "accounts": accounts
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    // Sync settings are read at login; an open session keeps its own copy.
    tracing::info!(section = section.key(), "setup section updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
