use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A trackable person (altar server) belonging to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub group_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Unset,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            "unset" | "" => Some(Self::Unset),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Unset => "unset",
        }
    }

    /// Next value of the row toggle. `Unset` only enters the cycle, it is
    /// never returned.
    pub fn cycled(self) -> Self {
        match self {
            Self::Unset => Self::Present,
            Self::Present => Self::Absent,
            Self::Absent => Self::Late,
            Self::Late => Self::Present,
        }
    }
}

/// `date -> entryId -> status`. Stored maps never contain `Unset`.
pub type AttendanceMap = BTreeMap<String, BTreeMap<String, AttendanceStatus>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub roster: Vec<RosterEntry>,
    #[serde(default)]
    pub attendance: AttendanceMap,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.roster.is_empty() && self.attendance.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub present: u32,
    pub absent: u32,
    pub late: u32,
    pub total: u32,
}

/// Upstream half of one flush. `attendance` may carry `Unset`, which asks
/// the remote store to delete that `(date, entryId)` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub roster: Vec<RosterEntry>,
    pub attendance: AttendanceMap,
    pub removed_entries: Vec<String>,
    pub cleared_dates: Vec<String>,
}

impl SyncPayload {
    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
            && self.attendance.is_empty()
            && self.removed_entries.is_empty()
            && self.cleared_dates.is_empty()
    }
}

/// Display filter for the roster table of one date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Present,
    Absent,
    Late,
}

impl StatusFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Some(Self::All),
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "late" => Some(Self::Late),
            _ => None,
        }
    }

    /// A missing value counts as absent here, unlike in summaries.
    pub fn matches(self, value: Option<AttendanceStatus>) -> bool {
        match self {
            Self::All => true,
            Self::Present => value == Some(AttendanceStatus::Present),
            Self::Late => value == Some(AttendanceStatus::Late),
            Self::Absent => matches!(value, None | Some(AttendanceStatus::Absent)),
        }
    }
}

/// Which entries a "mark all" touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkAllScope {
    Group,
    Visible(StatusFilter),
}

impl MarkAllScope {
    pub fn parse(s: &str, filter: StatusFilter) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "group" => Some(Self::Group),
            "visible" => Some(Self::Visible(filter)),
            _ => None,
        }
    }
}

/// Accepts only canonical `YYYY-MM-DD` strings naming a real calendar day.
pub fn is_valid_date(date: &str) -> bool {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(d) => d.format("%Y-%m-%d").to_string() == date,
        Err(_) => false,
    }
}

pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_validation_requires_canonical_calendar_dates() {
        assert!(is_valid_date("2024-01-01"));
        assert!(is_valid_date("2024-02-29"));
        assert!(!is_valid_date("2023-02-29"));
        assert!(!is_valid_date("2024-1-1"));
        assert!(!is_valid_date("01/02/2024"));
        assert!(!is_valid_date(""));
    }

    #[test]
    fn absent_filter_includes_missing_values() {
        assert!(StatusFilter::Absent.matches(None));
        assert!(StatusFilter::Absent.matches(Some(AttendanceStatus::Absent)));
        assert!(!StatusFilter::Absent.matches(Some(AttendanceStatus::Late)));
        assert!(!StatusFilter::Present.matches(None));
        assert!(StatusFilter::All.matches(None));
    }

    #[test]
    fn cycle_never_lands_on_unset() {
        let mut s = AttendanceStatus::Unset;
        let mut seen = Vec::new();
        for _ in 0..4 {
            s = s.cycled();
            seen.push(s);
        }
        assert_eq!(
            seen,
            vec![
                AttendanceStatus::Present,
                AttendanceStatus::Absent,
                AttendanceStatus::Late,
                AttendanceStatus::Present
            ]
        );
    }

    #[test]
    fn name_order_ignores_case_first() {
        assert_eq!(compare_names("alice", "Bob"), Ordering::Less);
        assert_eq!(compare_names("Bob", "bob"), Ordering::Less);
        assert_eq!(compare_names("Zed", "zed"), "Zed".cmp("zed"));
    }
}
