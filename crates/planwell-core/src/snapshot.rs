//! Reading entity snapshots and conflict resolutions from disk, and the
//! sync-side holder that hides transient empty reads.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, anyhow};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::conflict::{IgnoreSet, ResolutionRecord};
use crate::entity::Snapshot;

pub fn load_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    debug!(file = %path.display(), "loading snapshot");
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let snapshot: Snapshot = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing snapshot {}", path.display()))?;
    debug!(
        tasks = snapshot.tasks.len(),
        events = snapshot.events.len(),
        sessions = snapshot.sessions.len(),
        reminders = snapshot.reminders.len(),
        deadlines = snapshot.deadlines.len(),
        "loaded snapshot"
    );
    Ok(snapshot)
}

/// Resolution records as a JSON array or one JSON object per line.
pub fn load_resolutions(path: &Path) -> anyhow::Result<Vec<ResolutionRecord>> {
    debug!(file = %path.display(), "loading conflict resolutions");
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;

    if raw.trim_start().starts_with('[') {
        return serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", path.display()));
    }

    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: ResolutionRecord = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }
    Ok(out)
}

pub fn load_ignore_set(path: &Path, user_id: &str) -> anyhow::Result<IgnoreSet> {
    let records = load_resolutions(path)?;
    Ok(IgnoreSet::from_resolutions(&records, user_id))
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    debug!(file = %path.display(), "writing json atomically");

    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed creating temp file in {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

/// Keeps the last non-empty read of each collection.
///
/// Realtime listeners briefly report empty collections while they
/// reconnect. An empty read only replaces held data once the caller
/// confirms it with [`LastGoodSnapshot::confirm_empty`].
#[derive(Debug, Clone, Default)]
pub struct LastGoodSnapshot {
    current: Snapshot,
}

impl LastGoodSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Merges a fresh read and returns the snapshot to render.
    pub fn update(&mut self, incoming: Snapshot) -> &Snapshot {
        let Snapshot {
            tasks,
            events,
            sessions,
            reminders,
            deadlines,
        } = incoming;

        keep_non_empty(&mut self.current.tasks, tasks, "tasks");
        keep_non_empty(&mut self.current.events, events, "events");
        keep_non_empty(&mut self.current.sessions, sessions, "sessions");
        keep_non_empty(&mut self.current.reminders, reminders, "reminders");
        keep_non_empty(&mut self.current.deadlines, deadlines, "deadlines");
        &self.current
    }

    /// Accepts that a collection really is empty now.
    pub fn confirm_empty(&mut self, collection: Collection) {
        info!(collection = collection.as_str(), "collection confirmed empty");
        match collection {
            Collection::Tasks => self.current.tasks.clear(),
            Collection::Events => self.current.events.clear(),
            Collection::Sessions => self.current.sessions.clear(),
            Collection::Reminders => self.current.reminders.clear(),
            Collection::Deadlines => self.current.deadlines.clear(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Tasks,
    Events,
    Sessions,
    Reminders,
    Deadlines,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Tasks => "tasks",
            Collection::Events => "events",
            Collection::Sessions => "sessions",
            Collection::Reminders => "reminders",
            Collection::Deadlines => "deadlines",
        }
    }
}

fn keep_non_empty<T>(held: &mut Vec<T>, incoming: Vec<T>, name: &str) {
    if incoming.is_empty() {
        if !held.is_empty() {
            debug!(collection = name, held = held.len(), "empty read, keeping last good data");
        }
        return;
    }
    *held = incoming;
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::conflict::{ConflictIgnoreKey, ResolutionType};
    use crate::entity::Reminder;

    fn reminder(id: &str) -> Reminder {
        Reminder {
            id: Some(id.to_string()),
            title: id.to_string(),
            reminder_time: Some("2024-01-08T09:00:00Z".to_string()),
            recurring: None,
            status: None,
        }
    }

    #[test]
    fn loads_snapshot_from_disk() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("snapshot.json");
        fs::write(
            &path,
            r#"{"reminders": [{"id": "r1", "title": "Call", "reminderTime": "2024-01-08T09:00:00Z"}]}"#,
        )
        .expect("write snapshot");

        let snapshot = load_snapshot(&path).expect("load snapshot");
        assert_eq!(snapshot.reminders.len(), 1);
        assert!(snapshot.tasks.is_empty());
    }

    #[test]
    fn wrongly_typed_record_does_not_sink_the_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("snapshot.json");
        fs::write(
            &path,
            r#"{
                "events": [
                    {"id": "e1", "name": "Lecture", "startTime": "2024-01-08T10:00:00Z", "isAllDay": null},
                    {"id": 7, "name": "Lab", "startTime": "2024-01-08T12:00:00Z"}
                ],
                "studySessions": [{"id": "s1", "subject": "Math", "scheduledFor": "2024-01-08T14:00:00Z", "duration": "45"}],
                "reminders": [
                    {"id": "r1", "title": "Call", "reminderTime": "2024-01-08T09:00:00Z", "recurring": {"interval": 2}},
                    {"id": "r2", "reminderTime": "2024-01-08T09:30:00Z"}
                ]
            }"#,
        )
        .expect("write snapshot");

        let snapshot = load_snapshot(&path).expect("load snapshot");
        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.events[1].id.as_deref(), Some("7"));
        assert_eq!(snapshot.sessions[0].duration, Some(45.0));
        assert_eq!(snapshot.reminders, vec![Reminder {
            id: Some("r1".to_string()),
            title: "Call".to_string(),
            ..reminder("r1")
        }]);
    }

    #[test]
    fn bad_snapshot_reports_the_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write snapshot");

        let err = load_snapshot(&path).expect_err("should fail");
        assert!(format!("{err:#}").contains("broken.json"));
    }

    #[test]
    fn resolutions_load_from_array_and_lines() {
        let dir = tempdir().expect("tempdir");
        let array = dir.path().join("array.json");
        fs::write(
            &array,
            r#"[{"userId": "u1", "item1Id": "b", "item2Id": "a", "resolutionType": "ignored"}]"#,
        )
        .expect("write array");
        let lines = dir.path().join("lines.jsonl");
        fs::write(
            &lines,
            concat!(
                r#"{"userId": "u1", "item1Id": "c", "item2Id": "d", "resolutionType": "ai_applied"}"#,
                "\n\n",
                r#"{"userId": "u1", "item1Id": "e", "item2Id": "f", "resolutionType": "ignored"}"#,
                "\n"
            ),
        )
        .expect("write lines");

        let ignore = load_ignore_set(&array, "u1").expect("array");
        assert!(ignore.contains(&ConflictIgnoreKey::new("u1", "a", "b")));

        let records = load_resolutions(&lines).expect("lines");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].resolution_type, ResolutionType::AiApplied);
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.json");
        fs::write(&path, "stale").expect("seed");

        write_json_atomic(&path, &vec![1, 2, 3]).expect("write");
        let written: Vec<i32> =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(written, vec![1, 2, 3]);
    }

    #[test]
    fn empty_reads_keep_last_good_data() {
        let mut holder = LastGoodSnapshot::new();
        holder.update(Snapshot {
            reminders: vec![reminder("r1")],
            ..Snapshot::default()
        });

        let shown = holder.update(Snapshot::default());
        assert_eq!(shown.reminders.len(), 1);

        let shown = holder.update(Snapshot {
            reminders: vec![reminder("r2"), reminder("r3")],
            ..Snapshot::default()
        });
        assert_eq!(shown.reminders.len(), 2);

        holder.confirm_empty(Collection::Reminders);
        assert!(holder.current().reminders.is_empty());
    }
}
