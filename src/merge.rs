use crate::model::Snapshot;
use std::collections::HashSet;

/// Reconciles the cached snapshot with the remote one.
///
/// Roster: local entries first, then remote, first occurrence of an id wins.
/// Attendance: remote buckets first, then every local date bucket replaces
/// the remote bucket for that date as a whole (last writer wins per date,
/// never per entry).
pub fn merge_snapshots(local: &Snapshot, remote: &Snapshot) -> Snapshot {
    let mut seen: HashSet<&str> = HashSet::new();
    let roster = local
        .roster
        .iter()
        .chain(remote.roster.iter())
        .filter(|e| seen.insert(e.id.as_str()))
        .cloned()
        .collect();

    let mut attendance = remote.attendance.clone();
    for (date, bucket) in &local.attendance {
        attendance.insert(date.clone(), bucket.clone());
    }

    Snapshot { roster, attendance }
}
