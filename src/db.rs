use crate::model::{AttendanceStatus, RosterEntry, Snapshot};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const CACHE_FILE: &str = "rollcall.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(CACHE_FILE);
    let conn = Connection::open(db_path)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache_roster(
            id TEXT PRIMARY KEY,
            group_key TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cache_roster_group ON cache_roster(group_key, sort_order)",
        [],
    )?;

    // Attendance rows are keyed by group too so a cleared or orphaned row
    // never leaks into another leader's cache.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cache_attendance(
            group_key TEXT NOT NULL,
            date TEXT NOT NULL,
            entry_id TEXT NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY(group_key, date, entry_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cache_attendance_entry ON cache_attendance(entry_id)",
        [],
    )?;

    Ok(conn)
}

/// Last cached snapshot of a group; empty when nothing was ever written.
pub fn read_cache(conn: &Connection, group_key: &str) -> anyhow::Result<Snapshot> {
    let mut snapshot = Snapshot::default();

    let mut stmt = conn.prepare(
        "SELECT id, name, group_key
         FROM cache_roster
         WHERE group_key = ?
         ORDER BY sort_order",
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
        "SELECT date, entry_id, status
         FROM cache_attendance
         WHERE group_key = ?",
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
    for (date, entry_id, status) in rows {
        // Unknown codes from a newer build are skipped rather than failing the load.
        match AttendanceStatus::parse(&status) {
            Some(AttendanceStatus::Unset) | None => continue,
            Some(s) => {
                snapshot
                    .attendance
                    .entry(date)
                    .or_default()
                    .insert(entry_id, s);
            }
        }
    }

    Ok(snapshot)
}

/// Replaces the cached snapshot of a group in one transaction.
pub fn write_cache(conn: &Connection, group_key: &str, snapshot: &Snapshot) -> anyhow::Result<()> {
    let tx = conn
        .unchecked_transaction()
        .context("failed to start cache transaction")?;
    tx.execute("DELETE FROM cache_roster WHERE group_key = ?", [group_key])?;
    tx.execute("DELETE FROM cache_attendance WHERE group_key = ?", [group_key])?;
    {
        let mut insert_entry = tx.prepare(
            "INSERT OR REPLACE INTO cache_roster(id, group_key, name, sort_order)
             VALUES(?, ?, ?, ?)",
        )?;
        for (i, e) in snapshot.roster.iter().enumerate() {
            insert_entry.execute((&e.id, group_key, &e.name, i as i64))?;
        }
        let mut insert_status = tx.prepare(
            "INSERT OR REPLACE INTO cache_attendance(group_key, date, entry_id, status)
             VALUES(?, ?, ?, ?)",
        )?;
        for (date, bucket) in &snapshot.attendance {
            for (entry_id, status) in bucket {
                if *status == AttendanceStatus::Unset {
                    continue;
                }
                insert_status.execute((group_key, date, entry_id, status.as_str()))?;
            }
        }
    }
    tx.commit().context("failed to commit cache")?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("settings {key} is not valid json"))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn sample(group: &str) -> Snapshot {
        let mut snap = Snapshot {
            roster: vec![
                RosterEntry {
                    id: format!("{group}-1"),
                    name: "Ana".into(),
                    group_key: group.into(),
                },
                RosterEntry {
                    id: format!("{group}-2"),
                    name: "Ben".into(),
                    group_key: group.into(),
                },
            ],
            ..Snapshot::default()
        };
        snap.attendance
            .entry("2024-05-05".into())
            .or_default()
            .insert(format!("{group}-1"), AttendanceStatus::Late);
        snap.attendance
            .entry("2024-05-12".into())
            .or_default()
            .insert(format!("{group}-2"), AttendanceStatus::Absent);
        snap
    }

    #[test]
    fn cache_roundtrip_through_a_fresh_connection() {
        let ws = temp_dir("rollcall-cache-roundtrip");
        let written = sample("8am");
        {
            let conn = open_db(&ws).expect("open");
            write_cache(&conn, "8am", &written).expect("write");
        }
        let conn = open_db(&ws).expect("reopen");
        assert_eq!(read_cache(&conn, "8am").expect("read"), written);

        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn groups_do_not_see_each_other() {
        let ws = temp_dir("rollcall-cache-groups");
        let conn = open_db(&ws).expect("open");
        write_cache(&conn, "8am", &sample("8am")).expect("write 8am");
        write_cache(&conn, "4pm", &sample("4pm")).expect("write 4pm");
        write_cache(&conn, "8am", &Snapshot::default()).expect("clear 8am");

        assert!(read_cache(&conn, "8am").expect("read").is_empty());
        assert_eq!(read_cache(&conn, "4pm").expect("read"), sample("4pm"));
        assert!(read_cache(&conn, "10am").expect("read").is_empty());

        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn settings_roundtrip() {
        let ws = temp_dir("rollcall-settings");
        let conn = open_db(&ws).expect("open");
        assert!(settings_get_json(&conn, "setup.sync").unwrap().is_none());
        let v = serde_json::json!({ "debounceMs": 40 });
        settings_set_json(&conn, "setup.sync", &v).unwrap();
        assert_eq!(settings_get_json(&conn, "setup.sync").unwrap(), Some(v));

        let _ = std::fs::remove_dir_all(ws);
    }
}
