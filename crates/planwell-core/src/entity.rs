//! Source records as the sync layer hands them over.
//!
//! Timestamps are kept as raw text here; parsing happens during
//! normalization so a bad value costs one item instead of the batch.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::datetime::end_date_serde;
use crate::item::Priority;
use crate::recurrence::{Frequency, RecurrencePattern, RecurrenceType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    #[default]
    Manual,
    GoogleCalendar,
    GoogleTasks,
    #[serde(rename = "auto-scheduler")]
    AutoScheduler,
    #[serde(other)]
    Other,
}

impl ItemSource {
    /// Imported from an external calendar provider.
    pub fn is_vendor(self) -> bool {
        matches!(self, ItemSource::GoogleCalendar | ItemSource::GoogleTasks)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    #[serde(default, alias = "start", deserialize_with = "raw_text")]
    pub start_date: Option<String>,
    #[serde(default, alias = "end", deserialize_with = "raw_text")]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, deserialize_with = "raw_text")]
    pub id: Option<String>,

    pub title: String,

    #[serde(default, deserialize_with = "raw_text")]
    pub priority: Option<String>,

    #[serde(default, deserialize_with = "raw_text")]
    pub deadline: Option<String>,

    #[serde(default, deserialize_with = "lenient_records")]
    pub time_slots: Vec<TimeSlot>,

    #[serde(default)]
    pub source: ItemSource,

    #[serde(default, deserialize_with = "lenient_recurrence")]
    pub recurrence: Option<RecurrencePattern>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default, deserialize_with = "raw_text")]
    pub id: Option<String>,

    #[serde(alias = "title")]
    pub name: String,

    #[serde(default, alias = "start", deserialize_with = "raw_text")]
    pub start_time: Option<String>,

    #[serde(default, alias = "end", deserialize_with = "raw_text")]
    pub end_time: Option<String>,

    #[serde(default, alias = "allDay", deserialize_with = "lenient_flag")]
    pub is_all_day: bool,

    #[serde(default, deserialize_with = "raw_text")]
    pub priority: Option<String>,

    #[serde(default)]
    pub source: ItemSource,

    #[serde(default, deserialize_with = "lenient_recurrence")]
    pub recurrence: Option<RecurrencePattern>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    #[serde(default, deserialize_with = "raw_text")]
    pub id: Option<String>,

    #[serde(alias = "title")]
    pub subject: String,

    #[serde(default, alias = "startTime", deserialize_with = "raw_text")]
    pub scheduled_for: Option<String>,

    /// Minutes. Numbers and numeric strings are accepted.
    #[serde(default, deserialize_with = "lenient_minutes")]
    pub duration: Option<f64>,

    #[serde(default, deserialize_with = "raw_text")]
    pub priority: Option<String>,

    #[serde(default, deserialize_with = "lenient_recurrence")]
    pub recurrence: Option<RecurrencePattern>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReminderFrequency {
    Once,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRecurrence {
    pub frequency: ReminderFrequency,
    #[serde(default)]
    pub interval: Option<i64>,
    #[serde(default, deserialize_with = "raw_text")]
    pub end_date: Option<String>,
}

impl ReminderRecurrence {
    /// Reminder repeats are always expanded eagerly. An end date that
    /// cannot be read is an error rather than an unbounded repeat.
    pub fn to_pattern(&self) -> Result<RecurrencePattern, String> {
        let frequency = match self.frequency {
            ReminderFrequency::Once => Frequency::None,
            ReminderFrequency::Daily => Frequency::Daily,
            ReminderFrequency::Weekly => Frequency::Weekly,
            ReminderFrequency::Monthly => Frequency::Monthly,
            ReminderFrequency::Yearly => Frequency::Yearly,
            ReminderFrequency::Unknown => Frequency::Unsupported,
        };
        let mut pattern = RecurrencePattern::new(
            RecurrenceType::PreGenerated,
            frequency,
            self.interval.unwrap_or(1),
        );
        if let Some(raw) = self.end_date.as_deref().filter(|raw| !raw.trim().is_empty()) {
            let end = end_date_serde::parse(raw)
                .ok_or_else(|| format!("unreadable end date {raw}"))?;
            pattern.end_date = Some(end);
        }
        Ok(pattern)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    #[serde(default, deserialize_with = "raw_text")]
    pub id: Option<String>,

    pub title: String,

    #[serde(default, alias = "time", deserialize_with = "raw_text")]
    pub reminder_time: Option<String>,

    #[serde(default, deserialize_with = "lenient_recurrence")]
    pub recurring: Option<ReminderRecurrence>,

    #[serde(default, deserialize_with = "raw_text")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Deadline {
    #[serde(default, deserialize_with = "raw_text")]
    pub id: Option<String>,

    pub title: String,

    #[serde(default, alias = "deadline", deserialize_with = "raw_text")]
    pub due_date: Option<String>,

    #[serde(default, deserialize_with = "raw_text")]
    pub priority: Option<String>,
}

/// One consistent read of every collection the calendar draws from.
///
/// Records that cannot be read at all are logged and left out; the rest
/// of the collection survives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, deserialize_with = "lenient_records")]
    pub tasks: Vec<Task>,
    #[serde(default, deserialize_with = "lenient_records")]
    pub events: Vec<Event>,
    #[serde(default, alias = "studySessions", deserialize_with = "lenient_records")]
    pub sessions: Vec<StudySession>,
    #[serde(default, deserialize_with = "lenient_records")]
    pub reminders: Vec<Reminder>,
    #[serde(default, deserialize_with = "lenient_records")]
    pub deadlines: Vec<Deadline>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.events.is_empty()
            && self.sessions.is_empty()
            && self.reminders.is_empty()
            && self.deadlines.is_empty()
    }
}

/// Case-insensitive priority label; anything unrecognised is `None`.
pub fn parse_priority(raw: Option<&str>) -> Option<Priority> {
    match raw?.trim().to_ascii_lowercase().as_str() {
        "high" | "h" => Some(Priority::High),
        "medium" | "m" => Some(Priority::Medium),
        "low" | "l" => Some(Priority::Low),
        _ => None,
    }
}

/// Accepts any JSON scalar. Strings pass through, other non-null values
/// keep their JSON text so they surface later as malformed.
fn raw_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_recurrence<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    match serde_json::from_value::<T>(value) {
        Ok(pattern) => Ok(Some(pattern)),
        Err(err) => {
            warn!(error = %err, "ignoring malformed recurrence pattern");
            Ok(None)
        }
    }
}

/// Reads an array record by record, leaving out the ones that fail.
/// A missing, null or non-array value reads as empty.
fn lenient_records<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let records = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(records)) => records,
        Some(other) => {
            warn!(found = %other, "expected an array of records; ignoring it");
            return Ok(Vec::new());
        }
    };

    let mut out = Vec::with_capacity(records.len());
    for (position, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<T>(record) {
            Ok(parsed) => out.push(parsed),
            Err(error) => warn!(position, %error, "skipping unreadable record"),
        }
    }
    Ok(out)
}

/// `true`, or the string `"true"`; anything else is `false`.
fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(flag)) => flag,
        Some(Value::String(text)) => text.trim().eq_ignore_ascii_case("true"),
        None | Some(Value::Null) => false,
        Some(other) => {
            warn!(found = %other, "expected a boolean flag; reading it as false");
            false
        }
    })
}

fn lenient_minutes<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => match text.trim().parse::<f64>() {
            Ok(minutes) => Some(minutes),
            Err(_) => {
                warn!(found = %text, "unreadable duration; using the default");
                None
            }
        },
        None | Some(Value::Null) => None,
        Some(other) => {
            warn!(found = %other, "unreadable duration; using the default");
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_accepts_sparse_records() {
        let snapshot: Snapshot = serde_json::from_str(
            r#"{
                "tasks": [{"id": "t1", "title": "Essay", "timeSlots": [{"startDate": "2024-01-08T09:00"}]}],
                "events": [{"id": "e1", "title": "Lecture", "startTime": "2024-01-08T10:00", "allDay": false}],
                "studySessions": [{"subject": "Math", "scheduledFor": "2024-01-08T14:00", "duration": 45}],
                "reminders": [{"title": "Call", "reminderTime": 1704700800000}],
                "deadlines": [{"title": "Report", "deadline": "2024-01-09"}]
            }"#,
        )
        .expect("parse snapshot");

        assert_eq!(snapshot.tasks[0].time_slots.len(), 1);
        assert_eq!(snapshot.tasks[0].time_slots[0].end_date, None);
        assert_eq!(snapshot.events[0].name, "Lecture");
        assert_eq!(snapshot.sessions[0].duration, Some(45.0));
        assert_eq!(
            snapshot.reminders[0].reminder_time.as_deref(),
            Some("1704700800000")
        );
        assert_eq!(snapshot.deadlines[0].due_date.as_deref(), Some("2024-01-09"));
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn unknown_source_and_bad_recurrence_do_not_fail_the_record() {
        let event: Event = serde_json::from_str(
            r#"{"name": "Sync", "source": "outlook", "recurrence": {"interval": "weekly"}}"#,
        )
        .expect("parse event");
        assert_eq!(event.source, ItemSource::Other);
        assert!(!event.source.is_vendor());
        assert_eq!(event.recurrence, None);
    }

    #[test]
    fn vendor_sources_are_recognised() {
        let task: Task =
            serde_json::from_str(r#"{"title": "Imported", "source": "google_tasks"}"#)
                .expect("parse task");
        assert!(task.source.is_vendor());
    }

    #[test]
    fn reminder_once_maps_to_non_repeating_pattern() {
        let recurring = ReminderRecurrence {
            frequency: ReminderFrequency::Once,
            interval: None,
            end_date: None,
        };
        let pattern = recurring.to_pattern().expect("once pattern");
        assert_eq!(pattern.kind, RecurrenceType::PreGenerated);
        assert_eq!(pattern.frequency, Frequency::None);
        assert_eq!(pattern.interval, 1);

        let weekly = ReminderRecurrence {
            frequency: ReminderFrequency::Weekly,
            interval: Some(2),
            end_date: Some("2024-03-01".to_string()),
        };
        let pattern = weekly.to_pattern().expect("weekly pattern");
        assert_eq!(pattern.frequency, Frequency::Weekly);
        assert!(pattern.end_date.is_some());
    }

    #[test]
    fn unreadable_reminder_end_date_is_an_error() {
        let recurring = ReminderRecurrence {
            frequency: ReminderFrequency::Daily,
            interval: Some(1),
            end_date: Some("2024-01-10-garbage".to_string()),
        };
        let err = recurring.to_pattern().expect_err("bad end date");
        assert!(err.contains("2024-01-10-garbage"));

        let blank = ReminderRecurrence {
            end_date: Some("  ".to_string()),
            ..recurring
        };
        assert_eq!(blank.to_pattern().expect("blank end").end_date, None);
    }

    #[test]
    fn one_bad_record_leaves_its_neighbours_alone() {
        let snapshot: Snapshot = serde_json::from_str(
            r#"{
                "events": [
                    {"id": "good", "name": "Lecture", "startTime": "2024-01-08T10:00:00Z"},
                    {"id": 7, "name": "Numbered", "startTime": "2024-01-08T11:00:00Z", "isAllDay": null},
                    {"startTime": "2024-01-08T12:00:00Z"}
                ],
                "studySessions": [
                    {"id": "s1", "subject": "Math", "scheduledFor": "2024-01-08T14:00", "duration": "45"},
                    {"id": "s2", "subject": "Art", "scheduledFor": "2024-01-08T16:00", "duration": {"minutes": 5}}
                ],
                "reminders": [
                    {"id": "r1", "title": "Call", "reminderTime": "2024-01-08T09:00:00Z", "recurring": {"interval": 2}, "status": 3}
                ],
                "deadlines": {"not": "an array"},
                "tasks": [{"id": "t1", "title": "Essay", "timeSlots": ["junk", {"startDate": "2024-01-08T09:00"}]}]
            }"#,
        )
        .expect("parse snapshot");

        let ids: Vec<_> = snapshot.events.iter().filter_map(|e| e.id.as_deref()).collect();
        assert_eq!(ids, vec!["good", "7"]);
        assert!(!snapshot.events[1].is_all_day);

        assert_eq!(snapshot.sessions[0].duration, Some(45.0));
        assert_eq!(snapshot.sessions[1].duration, None);

        assert_eq!(snapshot.reminders.len(), 1);
        assert_eq!(snapshot.reminders[0].recurring, None);
        assert_eq!(snapshot.reminders[0].status.as_deref(), Some("3"));

        assert!(snapshot.deadlines.is_empty());
        assert_eq!(snapshot.tasks[0].time_slots.len(), 1);
    }

    #[test]
    fn all_day_flag_accepts_text() {
        let event: Event =
            serde_json::from_str(r#"{"name": "Holiday", "allDay": "TRUE"}"#).expect("parse event");
        assert!(event.is_all_day);
    }

    #[test]
    fn priority_labels_are_case_insensitive() {
        assert_eq!(parse_priority(Some("HIGH")), Some(Priority::High));
        assert_eq!(parse_priority(Some(" medium ")), Some(Priority::Medium));
        assert_eq!(parse_priority(Some("urgent")), None);
        assert_eq!(parse_priority(None), None);
    }
}
