//! Per-item problems found while materializing a calendar.
//!
//! Nothing here aborts a render pass: the offending item is dropped and
//! a [`Diagnostic`] is handed to the caller's [`DiagnosticSink`].

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::item::EntityKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticKind {
    #[error("timestamp could not be parsed: {reason}")]
    MalformedTimestamp { reason: String },

    #[error("end precedes start")]
    InvertedInterval,

    #[error("recurrence ignored: {reason}")]
    InvalidRecurrence { reason: String },

    #[error("required timestamp is missing")]
    MissingTimestamp,

    #[error("duration does not fit on the calendar")]
    DurationOutOfRange,
}

impl DiagnosticKind {
    /// Whether the item was left out. A bad recurrence keeps the base
    /// instance.
    pub fn drops_item(&self) -> bool {
        !matches!(self, DiagnosticKind::InvalidRecurrence { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub entity: EntityKind,
    pub entity_id: Option<String>,
    pub field: String,
    pub raw_value: String,
    pub kind: DiagnosticKind,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} field `{}` ({:?}): {}",
            self.entity.as_str(),
            self.entity_id.as_deref().unwrap_or("<no id>"),
            self.field,
            self.raw_value,
            self.kind
        )
    }
}

pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// Logs every diagnostic at `warn` and keeps counts.
#[derive(Debug, Default)]
pub struct TracingSink {
    pub reported: usize,
    /// Diagnostics that cost an item.
    pub dropped: usize,
}

impl DiagnosticSink for TracingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.reported += 1;
        let message = if diagnostic.kind.drops_item() {
            self.dropped += 1;
            "skipping calendar item"
        } else {
            "keeping calendar item despite bad source data"
        };
        warn!(
            entity = diagnostic.entity.as_str(),
            entity_id = diagnostic.entity_id.as_deref().unwrap_or(""),
            field = %diagnostic.field,
            raw = %diagnostic.raw_value,
            kind = %diagnostic.kind,
            "{}",
            message
        );
    }
}

/// One-line stderr summary of a run's diagnostics, or `None` when there
/// were none.
pub fn summary(reported: usize, dropped: usize) -> Option<String> {
    if reported == 0 {
        return None;
    }
    Some(format!(
        "{reported} problem(s) in source data, {dropped} item(s) skipped; \
         run with -v for details"
    ))
}

/// Forwards to two sinks.
pub struct Tee<'a, A: DiagnosticSink, B: DiagnosticSink> {
    pub first: &'a mut A,
    pub second: &'a mut B,
}

impl<A: DiagnosticSink, B: DiagnosticSink> DiagnosticSink for Tee<'_, A, B> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.first.report(diagnostic.clone());
        self.second.report(diagnostic);
    }
}
