use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Event,
    Task,
    Session,
    Reminder,
    Deadline,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Event => "event",
            ItemKind::Task => "task",
            ItemKind::Session => "session",
            ItemKind::Reminder => "reminder",
            ItemKind::Deadline => "deadline",
        }
    }

    /// Reminders and deadlines mark a moment, not a block of time.
    pub fn is_point_in_time(self) -> bool {
        matches!(self, ItemKind::Reminder | ItemKind::Deadline)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    High,
    Medium,
    Low,
    #[default]
    None,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
            Priority::None => "",
        }
    }
}

/// How an item occupies the calendar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Timing {
    /// A concrete `[start, end]` interval that may span several days.
    Timed,
    /// Date-only visibility. `until` is exclusive.
    AllDay {
        first: NaiveDate,
        until: Option<NaiveDate>,
    },
    /// Visible only on the local date of `start`.
    PointInTime,
}

/// The kind of source record an item was derived from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Event,
    StudySession,
    Reminder,
    Deadline,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Event => "event",
            EntityKind::StudySession => "study_session",
            EntityKind::Reminder => "reminder",
            EntityKind::Deadline => "deadline",
        }
    }
}

/// Handle back to the snapshot record that produced an item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRef {
    pub entity: EntityKind,
    /// Index into the snapshot collection for `entity`.
    pub position: usize,
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Task time-slot index.
    #[serde(default)]
    pub slot: Option<usize>,
    /// Recurrence instance number, 0 for the base instance.
    #[serde(default)]
    pub occurrence: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarItem {
    pub id: Option<String>,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timing: Timing,
    pub kind: ItemKind,
    pub priority: Priority,
    pub source: SourceRef,
}

impl CalendarItem {
    pub fn is_all_day(&self) -> bool {
        matches!(self.timing, Timing::AllDay { .. })
    }

    pub fn is_point_in_time(&self) -> bool {
        matches!(self.timing, Timing::PointInTime)
    }

    pub fn id_str(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    /// Half-open overlap: back-to-back items do not overlap.
    pub fn overlaps(&self, other: &CalendarItem) -> bool {
        self.start < other.end && self.end > other.start
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn timed(id: &str, start_hour: u32, minutes: i64) -> CalendarItem {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 8, start_hour, 0, 0)
            .single()
            .expect("valid start");
        CalendarItem {
            id: Some(id.to_string()),
            title: id.to_string(),
            start,
            end: start + Duration::minutes(minutes),
            timing: Timing::Timed,
            kind: ItemKind::Event,
            priority: Priority::None,
            source: SourceRef {
                entity: EntityKind::Event,
                position: 0,
                entity_id: Some(id.to_string()),
                slot: None,
                occurrence: 0,
            },
        }
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = timed("a", 9, 90);
        let b = timed("b", 10, 60);
        let c = timed("c", 12, 30);

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn back_to_back_items_do_not_overlap() {
        let a = timed("a", 9, 60);
        let b = timed("b", 10, 60);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn empty_id_counts_as_missing() {
        let mut item = timed("a", 9, 60);
        item.id = Some(String::new());
        assert_eq!(item.id_str(), None);
    }
}
