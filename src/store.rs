use crate::error::StoreError;
use crate::merge::merge_snapshots;
use crate::model::{
    compare_names, is_valid_date, AttendanceMap, AttendanceStatus, MarkAllScope, RosterEntry,
    Snapshot, StatusFilter, Summary, SyncPayload,
};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Uninitialized,
    Loading,
    Ready,
}

impl Readiness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
        }
    }
}

/// Mutations not yet confirmed upstream. Each key remembers the store
/// revision that last touched it.
#[derive(Debug, Clone, Default)]
struct DirtySet {
    created: BTreeMap<String, (RosterEntry, u64)>,
    attendance: BTreeMap<String, BTreeMap<String, (AttendanceStatus, u64)>>,
    removed: BTreeMap<String, u64>,
    cleared: BTreeMap<String, u64>,
}

impl DirtySet {
    fn len(&self) -> usize {
        self.created.len()
            + self.attendance.values().map(|b| b.len()).sum::<usize>()
            + self.removed.len()
            + self.cleared.len()
    }

    fn forget_entry(&mut self, id: &str) {
        self.created.remove(id);
        for bucket in self.attendance.values_mut() {
            bucket.remove(id);
        }
        self.attendance.retain(|_, bucket| !bucket.is_empty());
    }
}

/// A frozen copy of the dirty set handed to the gateway. Clearing it later
/// only drops keys whose revision did not move in the meantime.
#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub payload: SyncPayload,
    created: Vec<(String, u64)>,
    attendance: Vec<(String, String, u64)>,
    removed: Vec<(String, u64)>,
    cleared: Vec<(String, u64)>,
}

impl SyncBatch {
    pub fn key_count(&self) -> usize {
        self.created.len() + self.attendance.len() + self.removed.len() + self.cleared.len()
    }
}

/// Roster and attendance state of one group for the active session.
#[derive(Debug, Clone)]
pub struct AttendanceStore {
    group_key: String,
    readiness: Readiness,
    roster: Vec<RosterEntry>,
    attendance: AttendanceMap,
    dirty: DirtySet,
    revision: u64,
}

impl AttendanceStore {
    pub fn new(group_key: impl Into<String>) -> Self {
        Self {
            group_key: group_key.into(),
            readiness: Readiness::Uninitialized,
            roster: Vec::new(),
            attendance: AttendanceMap::new(),
            dirty: DirtySet::default(),
            revision: 0,
        }
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    pub fn attendance(&self) -> &AttendanceMap {
        &self.attendance
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            roster: self.roster.clone(),
            attendance: self.attendance.clone(),
        }
    }

    /// Monotonic counter bumped by every mutation that marks something dirty.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    pub fn has_dirty(&self) -> bool {
        self.dirty.len() > 0
    }

    pub fn begin_load(&mut self) {
        self.readiness = Readiness::Loading;
    }

    /// Merges the cached and remote snapshots and becomes `Ready`.
    pub fn finish_load(&mut self, local: &Snapshot, remote: &Snapshot) -> Result<(), StoreError> {
        if self.readiness != Readiness::Loading {
            return Err(StoreError::NotReady);
        }
        let merged = merge_snapshots(local, remote);

        let mut roster: Vec<RosterEntry> = merged
            .roster
            .into_iter()
            .filter(|e| e.group_key == self.group_key)
            .collect();
        roster.sort_by(|a, b| compare_names(&a.name, &b.name));
        let known: HashSet<&str> = roster.iter().map(|e| e.id.as_str()).collect();

        let mut attendance = merged.attendance;
        for bucket in attendance.values_mut() {
            bucket.retain(|id, status| known.contains(id.as_str()) && *status != AttendanceStatus::Unset);
        }
        attendance.retain(|_, bucket| !bucket.is_empty());

        for bucket in self.dirty.attendance.values_mut() {
            bucket.retain(|id, _| known.contains(id.as_str()));
        }
        self.dirty.attendance.retain(|_, bucket| !bucket.is_empty());
        self.dirty.created.retain(|id, _| known.contains(id.as_str()));

        self.roster = roster;
        self.attendance = attendance;
        self.readiness = Readiness::Ready;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), StoreError> {
        if self.readiness == Readiness::Ready {
            Ok(())
        } else {
            Err(StoreError::NotReady)
        }
    }

    fn ensure_date(date: &str) -> Result<(), StoreError> {
        if is_valid_date(date) {
            Ok(())
        } else {
            Err(StoreError::InvalidDate(date.to_string()))
        }
    }

    fn ensure_entry(&self, id: &str) -> Result<(), StoreError> {
        if self.roster.iter().any(|e| e.id == id) {
            Ok(())
        } else {
            Err(StoreError::UnknownEntry(id.to_string()))
        }
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Adds a roster entry to the session's group. Blank names are ignored
    /// and yield `Ok(None)`.
    pub fn add_entry(&mut self, name: &str) -> Result<Option<RosterEntry>, StoreError> {
        self.ensure_ready()?;
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let lowered = trimmed.to_lowercase();
        let duplicate = self
            .roster
            .iter()
            .any(|e| e.group_key == self.group_key && e.name.to_lowercase() == lowered);
        if duplicate {
            return Err(StoreError::DuplicateName {
                name: trimmed.to_string(),
            });
        }

        let entry = RosterEntry {
            id: Uuid::new_v4().to_string(),
            name: trimmed.to_string(),
            group_key: self.group_key.clone(),
        };
        let pos = self
            .roster
            .iter()
            .position(|e| compare_names(&e.name, &entry.name).is_gt())
            .unwrap_or(self.roster.len());
        self.roster.insert(pos, entry.clone());

        let rev = self.bump();
        self.dirty
            .created
            .insert(entry.id.clone(), (entry.clone(), rev));
        Ok(Some(entry))
    }

    /// Removes an entry and every attendance value that references it,
    /// including unflushed ones.
    pub fn remove_entry(&mut self, id: &str) -> Result<(), StoreError> {
        self.ensure_ready()?;
        self.ensure_entry(id)?;

        self.roster.retain(|e| e.id != id);
        for bucket in self.attendance.values_mut() {
            bucket.remove(id);
        }
        self.attendance.retain(|_, bucket| !bucket.is_empty());

        self.dirty.forget_entry(id);
        let rev = self.bump();
        self.dirty.removed.insert(id.to_string(), rev);
        Ok(())
    }

    /// Removes every roster entry with the same cascade as `remove_entry`.
    pub fn remove_all(&mut self) -> Result<usize, StoreError> {
        self.ensure_ready()?;
        let ids: Vec<String> = self.roster.iter().map(|e| e.id.clone()).collect();
        for id in &ids {
            self.remove_entry(id)?;
        }
        Ok(ids.len())
    }

    fn write_status(&mut self, date: &str, id: &str, status: AttendanceStatus, rev: u64) {
        if status == AttendanceStatus::Unset {
            if let Some(bucket) = self.attendance.get_mut(date) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.attendance.remove(date);
                }
            }
        } else {
            self.attendance
                .entry(date.to_string())
                .or_default()
                .insert(id.to_string(), status);
        }
        self.dirty
            .attendance
            .entry(date.to_string())
            .or_default()
            .insert(id.to_string(), (status, rev));
    }

    pub fn set_status(
        &mut self,
        date: &str,
        id: &str,
        status: AttendanceStatus,
    ) -> Result<(), StoreError> {
        self.ensure_ready()?;
        Self::ensure_date(date)?;
        self.ensure_entry(id)?;
        let rev = self.bump();
        self.write_status(date, id, status, rev);
        Ok(())
    }

    /// Advances the entry's value for `date` through present, absent, late.
    pub fn cycle_status(&mut self, date: &str, id: &str) -> Result<AttendanceStatus, StoreError> {
        let next = self
            .status_of(date, id)
            .unwrap_or(AttendanceStatus::Unset)
            .cycled();
        self.set_status(date, id, next)?;
        Ok(next)
    }

    /// "Mark all". `Group` replaces the whole date row; `Visible` only
    /// touches the entries the filter shows at call time.
    pub fn set_all_status(
        &mut self,
        date: &str,
        status: AttendanceStatus,
        scope: MarkAllScope,
    ) -> Result<usize, StoreError> {
        self.ensure_ready()?;
        Self::ensure_date(date)?;

        let ids: Vec<String> = match scope {
            MarkAllScope::Group => self
                .roster
                .iter()
                .filter(|e| e.group_key == self.group_key)
                .map(|e| e.id.clone())
                .collect(),
            MarkAllScope::Visible(filter) => self
                .visible_entries(date, filter)
                .into_iter()
                .map(|e| e.id.clone())
                .collect(),
        };

        let rev = self.bump();
        if scope == MarkAllScope::Group {
            self.attendance.remove(date);
            self.dirty.attendance.remove(date);
        }
        for id in &ids {
            self.write_status(date, id, status, rev);
        }
        Ok(ids.len())
    }

    pub fn clear_date(&mut self, date: &str) -> Result<(), StoreError> {
        self.ensure_ready()?;
        Self::ensure_date(date)?;
        self.attendance.remove(date);
        self.dirty.attendance.remove(date);
        let rev = self.bump();
        self.dirty.cleared.insert(date.to_string(), rev);
        Ok(())
    }

    pub fn status_of(&self, date: &str, id: &str) -> Option<AttendanceStatus> {
        self.attendance.get(date).and_then(|b| b.get(id)).copied()
    }

    pub fn date_row(&self, date: &str) -> BTreeMap<String, AttendanceStatus> {
        self.attendance.get(date).cloned().unwrap_or_default()
    }

    /// Counts stored statuses only; a missing value is never an absence here.
    pub fn summarize(&self, id: &str) -> Summary {
        let mut summary = Summary::default();
        for bucket in self.attendance.values() {
            match bucket.get(id) {
                Some(AttendanceStatus::Present) => summary.present += 1,
                Some(AttendanceStatus::Absent) => summary.absent += 1,
                Some(AttendanceStatus::Late) => summary.late += 1,
                Some(AttendanceStatus::Unset) | None => continue,
            }
            summary.total += 1;
        }
        summary
    }

    pub fn visible_entries(&self, date: &str, filter: StatusFilter) -> Vec<&RosterEntry> {
        self.roster
            .iter()
            .filter(|e| e.group_key == self.group_key)
            .filter(|e| filter.matches(self.status_of(date, &e.id)))
            .collect()
    }

    /// Freezes the current dirty set. `None` when there is nothing to send.
    pub fn take_batch(&self) -> Option<SyncBatch> {
        if !self.has_dirty() {
            return None;
        }
        let mut payload = SyncPayload::default();
        let mut batch_attendance = Vec::new();
        for (date, bucket) in &self.dirty.attendance {
            let row = payload.attendance.entry(date.clone()).or_default();
            for (id, (status, rev)) in bucket {
                row.insert(id.clone(), *status);
                batch_attendance.push((date.clone(), id.clone(), *rev));
            }
        }
        payload.roster = self
            .dirty
            .created
            .values()
            .map(|(entry, _)| entry.clone())
            .collect();
        payload.removed_entries = self.dirty.removed.keys().cloned().collect();
        payload.cleared_dates = self.dirty.cleared.keys().cloned().collect();

        Some(SyncBatch {
            payload,
            created: self
                .dirty
                .created
                .iter()
                .map(|(id, (_, rev))| (id.clone(), *rev))
                .collect(),
            attendance: batch_attendance,
            removed: self
                .dirty
                .removed
                .iter()
                .map(|(id, rev)| (id.clone(), *rev))
                .collect(),
            cleared: self
                .dirty
                .cleared
                .iter()
                .map(|(date, rev)| (date.clone(), *rev))
                .collect(),
        })
    }

    /// Clears the keys of a successfully written batch. Returns how many
    /// keys were dropped.
    pub fn acknowledge(&mut self, batch: &SyncBatch) -> usize {
        let mut cleared = 0;
        for (id, rev) in &batch.created {
            if self.dirty.created.get(id).map(|(_, r)| r) == Some(rev) {
                self.dirty.created.remove(id);
                cleared += 1;
            }
        }
        for (date, id, rev) in &batch.attendance {
            let Some(bucket) = self.dirty.attendance.get_mut(date) else {
                continue;
            };
            if bucket.get(id).map(|(_, r)| r) == Some(rev) {
                bucket.remove(id);
                cleared += 1;
            }
            if bucket.is_empty() {
                self.dirty.attendance.remove(date);
            }
        }
        for (id, rev) in &batch.removed {
            if self.dirty.removed.get(id) == Some(rev) {
                self.dirty.removed.remove(id);
                cleared += 1;
            }
        }
        for (date, rev) in &batch.cleared {
            if self.dirty.cleared.get(date) == Some(rev) {
                self.dirty.cleared.remove(date);
                cleared += 1;
            }
        }
        cleared
    }
}
