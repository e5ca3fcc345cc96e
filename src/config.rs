use crate::model::{MarkAllScope, StatusFilter};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "ROLLCALLD_LOG";
pub const LOG_FORMAT_ENV: &str = "ROLLCALLD_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Process-level settings. Everything workspace-specific lives in the
/// `setup.*` sections instead.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let log_filter = std::env::var(LOG_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "info".to_string());
        let log_format = match std::env::var(LOG_FORMAT_ENV) {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Self {
            log_filter,
            log_format,
        }
    }

    /// Logs go to stderr; stdout carries the IPC responses.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_new(&self.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false);
        let result = match self.log_format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Text => builder.try_init(),
        };
        if let Err(e) = result {
            eprintln!("logging already initialised: {e}");
        }
    }
}

/// The `setup.sync` section, already merged over its defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    pub remote_path: Option<String>,
    pub debounce_ms: u64,
    pub remote_timeout_ms: u64,
    pub mark_all_scope: String,
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// `None` means the session runs local-only.
    pub fn resolve_remote_path(&self, workspace: &Path) -> Option<PathBuf> {
        let raw = self.remote_path.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let p = PathBuf::from(raw);
        Some(if p.is_absolute() { p } else { workspace.join(p) })
    }

    pub fn default_mark_all_scope(&self, filter: StatusFilter) -> MarkAllScope {
        MarkAllScope::parse(&self.mark_all_scope, filter).unwrap_or(MarkAllScope::Group)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
    pub group: String,
}

/// The `setup.accounts` section.
#[derive(Debug, Clone, Deserialize)]
pub struct Accounts {
    pub users: Vec<Account>,
}

impl Accounts {
    /// Shared leader credentials; both sides are trimmed before comparing.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<&Account> {
        let (u, p) = (username.trim(), password.trim());
        self.users
            .iter()
            .find(|a| a.username == u && a.password == p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relative_remote_path_resolves_against_workspace() {
        let s: SyncSettings = serde_json::from_value(json!({
            "remotePath": "remote/rollcall-remote.sqlite3",
            "debounceMs": 1500,
            "remoteTimeoutMs": 10000,
            "markAllScope": "group"
        }))
        .expect("settings");
        let ws = Path::new("/tmp/ws");
        assert_eq!(
            s.resolve_remote_path(ws),
            Some(PathBuf::from("/tmp/ws/remote/rollcall-remote.sqlite3"))
        );
        assert_eq!(s.debounce(), Duration::from_millis(1500));
    }

    #[test]
    fn blank_remote_path_means_local_only() {
        let s: SyncSettings = serde_json::from_value(json!({
            "remotePath": "  ",
            "debounceMs": 1,
            "remoteTimeoutMs": 1,
            "markAllScope": "visible"
        }))
        .expect("settings");
        assert_eq!(s.resolve_remote_path(Path::new("/tmp")), None);
        assert_eq!(
            s.default_mark_all_scope(StatusFilter::Late),
            MarkAllScope::Visible(StatusFilter::Late)
        );
    }

    #[test]
    fn authenticate_trims_input() {
        let accounts = Accounts {
            users: vec![Account {
                username: "srp_8am".into(),
                password: "secret".into(),
                group: "8am".into(),
            }],
        };
        assert_eq!(
            accounts
                .authenticate(" srp_8am ", "secret ")
                .map(|a| a.group.as_str()),
            Some("8am")
        );
        assert!(accounts.authenticate("srp_8am", "wrong").is_none());
    }
}
