use crate::error::GatewayError;
use crate::model::{AttendanceStatus, RosterEntry, Snapshot, SyncPayload};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Remote table store. Every call is best-effort; callers never assume the
/// remote side is reachable.
pub trait SyncGateway: Send + Sync {
    fn load(&self, group_key: &str) -> Result<Snapshot, GatewayError>;

    fn save(&self, group_key: &str, payload: &SyncPayload) -> Result<(), GatewayError>;
}

/// Remote store kept in a SQLite file, laid out like the hosted tables:
/// `altar_servers(id, name, group_name)` and
/// `attendance_records(server_id, date, status)` keyed by `(date, server_id)`.
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteGateway {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        ensure_remote_schema(&conn)?;
        Ok(conn)
    }

    fn load_inner(&self, group_key: &str) -> rusqlite::Result<Snapshot> {
        let conn = self.connect()?;
        let mut snapshot = Snapshot::default();

        let mut stmt = conn.prepare(
            "SELECT id, name, group_name FROM altar_servers WHERE group_name = ? ORDER BY name",
        )?;
        snapshot.roster = stmt
            .query_map([group_key], |r| {
                Ok(RosterEntry {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    group_key: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT a.date, a.server_id, a.status
             FROM attendance_records a
             JOIN altar_servers s ON s.id = a.server_id
             WHERE s.group_name = ?",
        )?;
        let rows = stmt
            .query_map([group_key], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (date, server_id, status) in rows {
            match AttendanceStatus::parse(&status) {
                Some(AttendanceStatus::Unset) | None => {
                    tracing::debug!(%date, %server_id, %status, "skipping remote row");
                }
                Some(s) => {
                    snapshot
                        .attendance
                        .entry(date)
                        .or_default()
                        .insert(server_id, s);
                }
            }
        }
        Ok(snapshot)
    }

    fn save_inner(&self, group_key: &str, payload: &SyncPayload) -> rusqlite::Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        for id in &payload.removed_entries {
            tx.execute("DELETE FROM attendance_records WHERE server_id = ?", [id])?;
            tx.execute(
                "DELETE FROM altar_servers WHERE id = ? AND group_name = ?",
                (id, group_key),
            )?;
        }
        for date in &payload.cleared_dates {
            tx.execute(
                "DELETE FROM attendance_records
                 WHERE date = ?
                   AND server_id IN (SELECT id FROM altar_servers WHERE group_name = ?)",
                (date, group_key),
            )?;
        }
        for entry in &payload.roster {
            // Entries of another group never travel upstream from this session.
            if entry.group_key != group_key {
                continue;
            }
            tx.execute(
                "INSERT INTO altar_servers(id, name, group_name) VALUES(?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   group_name = excluded.group_name",
                (&entry.id, &entry.name, &entry.group_key),
            )?;
        }
        for (date, row) in &payload.attendance {
            for (server_id, status) in row {
                if *status == AttendanceStatus::Unset {
                    tx.execute(
                        "DELETE FROM attendance_records WHERE date = ? AND server_id = ?",
                        (date, server_id),
                    )?;
                } else {
                    tx.execute(
                        "INSERT INTO attendance_records(server_id, date, status) VALUES(?, ?, ?)
                         ON CONFLICT(date, server_id) DO UPDATE SET status = excluded.status",
                        (server_id, date, status.as_str()),
                    )?;
                }
            }
        }

        tx.commit()
    }
}

impl SyncGateway for SqliteGateway {
    fn load(&self, group_key: &str) -> Result<Snapshot, GatewayError> {
        self.load_inner(group_key)
            .map_err(|e| GatewayError::LoadFailure(e.to_string()))
    }

    fn save(&self, group_key: &str, payload: &SyncPayload) -> Result<(), GatewayError> {
        if payload.is_empty() {
            return Ok(());
        }
        self.save_inner(group_key, payload)
            .map_err(|e| GatewayError::SaveFailure(e.to_string()))
    }
}

fn ensure_remote_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS altar_servers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            group_name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_altar_servers_group ON altar_servers(group_name)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            server_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(date, server_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_server ON attendance_records(server_id)",
        [],
    )?;
    Ok(())
}
