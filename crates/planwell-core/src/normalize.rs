//! Turns source entities into [`CalendarItem`]s.
//!
//! Every rejected item produces exactly one [`Diagnostic`]; the rest of
//! the entity is still normalized.

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, instrument, trace};

use crate::datetime::{
    is_local_midnight, parse_date_part, parse_instant, resolve_local_lenient, start_of_local_day,
};
use crate::diagnostic::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::entity::{Deadline, Event, Reminder, Snapshot, StudySession, Task, parse_priority};
use crate::item::{CalendarItem, EntityKind, ItemKind, Priority, SourceRef, Timing};
use crate::recurrence::{Frequency, RecurrencePattern, RecurrenceType, generate_occurrences};

pub const DEFAULT_BLOCK_MINUTES: i64 = 60;
pub const POINT_IN_TIME_MINUTES: i64 = 30;

/// Where an item came from, threaded through diagnostics and `SourceRef`.
#[derive(Debug, Clone, Copy)]
pub struct Origin<'e> {
    pub entity: EntityKind,
    pub id: Option<&'e str>,
    pub position: usize,
}

impl Origin<'_> {
    fn source_ref(&self, slot: Option<usize>) -> SourceRef {
        SourceRef {
            entity: self.entity,
            position: self.position,
            entity_id: self.id.map(str::to_string),
            slot,
            occurrence: 0,
        }
    }

    fn item_id(&self) -> Option<String> {
        self.id.map(str::to_string)
    }
}

/// A repeat rule that was present but could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableRecurrence {
    pub field: &'static str,
    pub raw_value: String,
    pub reason: String,
}

/// A snapshot record that can be laid out on the calendar.
pub trait SourceEntity {
    const KIND: EntityKind;

    fn entity_id(&self) -> Option<&str>;

    fn recurrence(&self) -> Result<Option<RecurrencePattern>, UnreadableRecurrence>;

    /// Items for the base instance, before any recurrence expansion.
    fn base_items(&self, origin: &Origin<'_>, cx: &mut Normalizer<'_>) -> Vec<CalendarItem>;
}

pub struct Normalizer<'s> {
    tz: Tz,
    occurrence_limit: usize,
    sink: &'s mut dyn DiagnosticSink,
}

impl<'s> Normalizer<'s> {
    pub fn new(tz: Tz, occurrence_limit: usize, sink: &'s mut dyn DiagnosticSink) -> Self {
        Self {
            tz,
            occurrence_limit,
            sink,
        }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Normalizes one entity, expanding pre-generated recurrences.
    pub fn normalize<E: SourceEntity>(&mut self, position: usize, entity: &E) -> Vec<CalendarItem> {
        let origin = Origin {
            entity: E::KIND,
            id: entity.entity_id(),
            position,
        };
        let base = entity.base_items(&origin, self);

        let pattern = match entity.recurrence() {
            Ok(Some(pattern)) => pattern,
            Ok(None) => return base,
            Err(unreadable) => {
                self.report(
                    &origin,
                    unreadable.field,
                    unreadable.raw_value,
                    DiagnosticKind::InvalidRecurrence {
                        reason: unreadable.reason,
                    },
                );
                return base;
            }
        };

        if let Some(reason) = pattern.defect() {
            self.report(
                &origin,
                "recurrence",
                format!("{:?} every {}", pattern.frequency, pattern.interval),
                DiagnosticKind::InvalidRecurrence { reason },
            );
            return base;
        }

        if pattern.kind != RecurrenceType::PreGenerated || pattern.frequency == Frequency::None {
            return base;
        }

        self.expand(&base, &pattern)
    }

    /// Normalizes every collection in a fixed order: tasks, events,
    /// sessions, reminders, deadlines.
    #[instrument(skip_all, fields(tz = %self.tz))]
    pub fn snapshot(&mut self, snapshot: &Snapshot) -> Vec<CalendarItem> {
        let mut items = Vec::new();
        for (position, task) in snapshot.tasks.iter().enumerate() {
            items.extend(self.normalize(position, task));
        }
        for (position, event) in snapshot.events.iter().enumerate() {
            items.extend(self.normalize(position, event));
        }
        for (position, session) in snapshot.sessions.iter().enumerate() {
            items.extend(self.normalize(position, session));
        }
        for (position, reminder) in snapshot.reminders.iter().enumerate() {
            items.extend(self.normalize(position, reminder));
        }
        for (position, deadline) in snapshot.deadlines.iter().enumerate() {
            items.extend(self.normalize(position, deadline));
        }
        debug!(count = items.len(), "normalized snapshot");
        items
    }

    fn expand(&mut self, base: &[CalendarItem], pattern: &RecurrencePattern) -> Vec<CalendarItem> {
        let Some(anchor) = base.iter().map(|item| item.start).min() else {
            return Vec::new();
        };
        let local_anchor = anchor.with_timezone(&self.tz);
        let occurrences = generate_occurrences(&local_anchor, pattern, self.occurrence_limit);

        let mut items = base.to_vec();
        for (n, occurrence) in occurrences.iter().enumerate().skip(1) {
            let days = (occurrence.date_naive() - local_anchor.date_naive()).num_days();
            items.extend(
                base.iter()
                    .filter_map(|item| shift_item(item, days, n, self.tz)),
            );
        }
        trace!(
            instances = occurrences.len(),
            items = items.len(),
            "expanded recurring entity"
        );
        items
    }

    fn report(&mut self, origin: &Origin<'_>, field: &str, raw_value: String, kind: DiagnosticKind) {
        self.sink.report(Diagnostic {
            entity: origin.entity,
            entity_id: origin.item_id(),
            field: field.to_string(),
            raw_value,
            kind,
        });
    }

    /// Parses a required timestamp, reporting a missing or malformed value.
    fn required(
        &mut self,
        origin: &Origin<'_>,
        field: &str,
        raw: Option<&str>,
    ) -> Option<DateTime<Utc>> {
        match raw.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => self.parse(origin, field, value),
            None => {
                self.report(
                    origin,
                    field,
                    String::new(),
                    DiagnosticKind::MissingTimestamp,
                );
                None
            }
        }
    }

    fn parse(&mut self, origin: &Origin<'_>, field: &str, raw: &str) -> Option<DateTime<Utc>> {
        match parse_instant(raw, self.tz) {
            Ok(instant) => Some(instant),
            Err(reason) => {
                self.report(
                    origin,
                    field,
                    raw.to_string(),
                    DiagnosticKind::MalformedTimestamp { reason },
                );
                None
            }
        }
    }

    /// End of an interval: the explicit value when present, otherwise
    /// `start + default_minutes`. Rejects inverted intervals.
    fn end_or_default(
        &mut self,
        origin: &Origin<'_>,
        field: &str,
        raw: Option<&str>,
        start: DateTime<Utc>,
        default_minutes: i64,
    ) -> Option<DateTime<Utc>> {
        let end = match raw.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => self.parse(origin, field, value)?,
            None => start + Duration::minutes(default_minutes),
        };
        if end < start {
            self.report(
                origin,
                field,
                raw.unwrap_or_default().to_string(),
                DiagnosticKind::InvertedInterval,
            );
            return None;
        }
        Some(end)
    }

    fn point_in_time(
        &mut self,
        origin: &Origin<'_>,
        field: &str,
        raw: Option<&str>,
        title: &str,
        kind: ItemKind,
        priority: Priority,
    ) -> Option<CalendarItem> {
        let start = self.required(origin, field, raw)?;
        Some(CalendarItem {
            id: origin.item_id(),
            title: title.to_string(),
            start,
            end: start + Duration::minutes(POINT_IN_TIME_MINUTES),
            timing: Timing::PointInTime,
            kind,
            priority,
            source: origin.source_ref(None),
        })
    }
}

/// Moves an item `days` local calendar days forward, keeping wall-clock
/// times, and tags it as recurrence instance `n`.
fn shift_item(item: &CalendarItem, days: i64, n: usize, tz: Tz) -> Option<CalendarItem> {
    let mut shifted = item.clone();
    shifted.start = shift_local_days(item.start, days, tz)?;
    shifted.end = shift_local_days(item.end, days, tz)?;
    if let Timing::AllDay { first, until } = &item.timing {
        shifted.timing = Timing::AllDay {
            first: shift_date(*first, days)?,
            until: match until {
                Some(date) => Some(shift_date(*date, days)?),
                None => None,
            },
        };
    }
    shifted.id = item.id.as_ref().map(|id| format!("{id}#{n}"));
    shifted.source.occurrence = n;
    Some(shifted)
}

fn shift_date(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    let step = Days::new(days.unsigned_abs());
    if days >= 0 {
        date.checked_add_days(step)
    } else {
        date.checked_sub_days(step)
    }
}

fn shift_local_days(instant: DateTime<Utc>, days: i64, tz: Tz) -> Option<DateTime<Utc>> {
    let local = instant.with_timezone(&tz).naive_local();
    let moved = shift_date(local.date(), days)?.and_time(local.time());
    resolve_local_lenient(&tz, &moved).map(|dt| dt.with_timezone(&Utc))
}

impl SourceEntity for Task {
    const KIND: EntityKind = EntityKind::Task;

    fn entity_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn recurrence(&self) -> Result<Option<RecurrencePattern>, UnreadableRecurrence> {
        Ok(self.recurrence.clone())
    }

    fn base_items(&self, origin: &Origin<'_>, cx: &mut Normalizer<'_>) -> Vec<CalendarItem> {
        let priority = parse_priority(self.priority.as_deref()).unwrap_or_default();

        // Imported tasks due at local midnight have no meaningful time.
        if self.source.is_vendor()
            && let Some(raw) = self.deadline.as_deref()
            && let Ok(due) = parse_instant(raw, cx.tz)
            && is_local_midnight(due, cx.tz)
        {
            let first = parse_date_part(raw).unwrap_or_else(|_| due.with_timezone(&cx.tz).date_naive());
            let start = start_of_local_day(first, cx.tz);
            return vec![CalendarItem {
                id: origin.item_id(),
                title: self.title.clone(),
                start,
                end: start_of_local_day(first.succ_opt().unwrap_or(first), cx.tz),
                timing: Timing::AllDay { first, until: None },
                kind: ItemKind::Task,
                priority,
                source: origin.source_ref(None),
            }];
        }

        if self.time_slots.is_empty() {
            if self.deadline.is_none() {
                return Vec::new();
            }
            return cx
                .point_in_time(
                    origin,
                    "deadline",
                    self.deadline.as_deref(),
                    &self.title,
                    ItemKind::Deadline,
                    priority,
                )
                .into_iter()
                .collect();
        }

        let mut items = Vec::with_capacity(self.time_slots.len());
        for (index, slot) in self.time_slots.iter().enumerate() {
            let start_field = format!("timeSlots[{index}].startDate");
            let end_field = format!("timeSlots[{index}].endDate");
            let Some(start) = cx.required(origin, &start_field, slot.start_date.as_deref()) else {
                continue;
            };
            let Some(end) = cx.end_or_default(
                origin,
                &end_field,
                slot.end_date.as_deref(),
                start,
                DEFAULT_BLOCK_MINUTES,
            ) else {
                continue;
            };
            items.push(CalendarItem {
                id: origin.id.map(|id| format!("{id}:{index}")),
                title: self.title.clone(),
                start,
                end,
                timing: Timing::Timed,
                kind: ItemKind::Task,
                priority,
                source: origin.source_ref(Some(index)),
            });
        }
        items
    }
}

impl SourceEntity for Event {
    const KIND: EntityKind = EntityKind::Event;

    fn entity_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn recurrence(&self) -> Result<Option<RecurrencePattern>, UnreadableRecurrence> {
        Ok(self.recurrence.clone())
    }

    fn base_items(&self, origin: &Origin<'_>, cx: &mut Normalizer<'_>) -> Vec<CalendarItem> {
        let priority = parse_priority(self.priority.as_deref()).unwrap_or(Priority::Low);

        if self.is_all_day {
            return all_day_event(self, origin, cx, priority).into_iter().collect();
        }

        let Some(start) = cx.required(origin, "startTime", self.start_time.as_deref()) else {
            return Vec::new();
        };
        let Some(end) = cx.end_or_default(
            origin,
            "endTime",
            self.end_time.as_deref(),
            start,
            DEFAULT_BLOCK_MINUTES,
        ) else {
            return Vec::new();
        };
        vec![CalendarItem {
            id: origin.item_id(),
            title: self.name.clone(),
            start,
            end,
            timing: Timing::Timed,
            kind: ItemKind::Event,
            priority,
            source: origin.source_ref(None),
        }]
    }
}

/// All-day dates are the literal date written in the record; the end
/// date is exclusive.
fn all_day_event(
    event: &Event,
    origin: &Origin<'_>,
    cx: &mut Normalizer<'_>,
    priority: Priority,
) -> Option<CalendarItem> {
    let Some(raw_start) = event.start_time.as_deref().filter(|raw| !raw.trim().is_empty()) else {
        cx.report(origin, "startTime", String::new(), DiagnosticKind::MissingTimestamp);
        return None;
    };
    let first = match parse_date_part(raw_start) {
        Ok(date) => date,
        Err(reason) => {
            cx.report(
                origin,
                "startTime",
                raw_start.to_string(),
                DiagnosticKind::MalformedTimestamp { reason },
            );
            return None;
        }
    };

    let until = match event.end_time.as_deref().filter(|raw| !raw.trim().is_empty()) {
        None => None,
        Some(raw_end) => match parse_date_part(raw_end) {
            Ok(last) if last < first => {
                cx.report(
                    origin,
                    "endTime",
                    raw_end.to_string(),
                    DiagnosticKind::InvertedInterval,
                );
                return None;
            }
            Ok(last) if last == first => None,
            Ok(last) => Some(last),
            Err(reason) => {
                cx.report(
                    origin,
                    "endTime",
                    raw_end.to_string(),
                    DiagnosticKind::MalformedTimestamp { reason },
                );
                return None;
            }
        },
    };

    let tz = cx.tz;
    let end_day = until.or_else(|| first.succ_opt()).unwrap_or(first);
    Some(CalendarItem {
        id: origin.item_id(),
        title: event.name.clone(),
        start: start_of_local_day(first, tz),
        end: start_of_local_day(end_day, tz),
        timing: Timing::AllDay { first, until },
        kind: ItemKind::Event,
        priority,
        source: origin.source_ref(None),
    })
}

impl SourceEntity for StudySession {
    const KIND: EntityKind = EntityKind::StudySession;

    fn entity_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn recurrence(&self) -> Result<Option<RecurrencePattern>, UnreadableRecurrence> {
        Ok(self.recurrence.clone())
    }

    fn base_items(&self, origin: &Origin<'_>, cx: &mut Normalizer<'_>) -> Vec<CalendarItem> {
        let Some(start) = cx.required(origin, "scheduledFor", self.scheduled_for.as_deref()) else {
            return Vec::new();
        };
        let Some(end) = Duration::try_minutes(session_minutes(self.duration))
            .and_then(|span| start.checked_add_signed(span))
        else {
            cx.report(
                origin,
                "duration",
                self.duration.map(|minutes| minutes.to_string()).unwrap_or_default(),
                DiagnosticKind::DurationOutOfRange,
            );
            return Vec::new();
        };
        vec![CalendarItem {
            id: origin.item_id(),
            title: self.subject.clone(),
            start,
            end,
            timing: Timing::Timed,
            kind: ItemKind::Session,
            priority: parse_priority(self.priority.as_deref()).unwrap_or(Priority::Medium),
            source: origin.source_ref(None),
        }]
    }
}

/// Session length in whole minutes, at least one. Absent or non-positive
/// means an hour.
pub fn session_minutes(duration: Option<f64>) -> i64 {
    match duration {
        Some(minutes) if minutes.is_finite() && minutes > 0.0 => (minutes.round() as i64).max(1),
        _ => DEFAULT_BLOCK_MINUTES,
    }
}

impl SourceEntity for Reminder {
    const KIND: EntityKind = EntityKind::Reminder;

    fn entity_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn recurrence(&self) -> Result<Option<RecurrencePattern>, UnreadableRecurrence> {
        let Some(recurring) = self.recurring.as_ref() else {
            return Ok(None);
        };
        recurring
            .to_pattern()
            .map(Some)
            .map_err(|reason| UnreadableRecurrence {
                field: "recurring.endDate",
                raw_value: recurring.end_date.clone().unwrap_or_default(),
                reason,
            })
    }

    fn base_items(&self, origin: &Origin<'_>, cx: &mut Normalizer<'_>) -> Vec<CalendarItem> {
        cx.point_in_time(
            origin,
            "reminderTime",
            self.reminder_time.as_deref(),
            &self.title,
            ItemKind::Reminder,
            Priority::Medium,
        )
        .into_iter()
        .collect()
    }
}

impl SourceEntity for Deadline {
    const KIND: EntityKind = EntityKind::Deadline;

    fn entity_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn recurrence(&self) -> Result<Option<RecurrencePattern>, UnreadableRecurrence> {
        Ok(None)
    }

    fn base_items(&self, origin: &Origin<'_>, cx: &mut Normalizer<'_>) -> Vec<CalendarItem> {
        cx.point_in_time(
            origin,
            "dueDate",
            self.due_date.as_deref(),
            &self.title,
            ItemKind::Deadline,
            parse_priority(self.priority.as_deref()).unwrap_or_default(),
        )
        .into_iter()
        .collect()
    }
}

/// Normalizes a whole snapshot, reporting rejected items to `sink`.
pub fn normalize_snapshot(
    snapshot: &Snapshot,
    tz: Tz,
    occurrence_limit: usize,
    sink: &mut dyn DiagnosticSink,
) -> Vec<CalendarItem> {
    Normalizer::new(tz, occurrence_limit, sink).snapshot(snapshot)
}
