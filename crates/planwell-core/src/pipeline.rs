//! End-to-end materialization of one calendar view.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;

use crate::bucket::items_for_day;
use crate::columns::{
  Column,
  SlotLayout,
  layout_for_day,
  pack_columns
};
use crate::conflict::{
  ConflictReport,
  IgnoreSet,
  detect_conflicts
};
use crate::diagnostic::DiagnosticSink;
use crate::entity::Snapshot;
use crate::item::CalendarItem;
use crate::normalize::normalize_snapshot;
use crate::recurrence::DEFAULT_OCCURRENCE_LIMIT;
use crate::window::{
  ViewType,
  Window,
  resolve_window
};

#[derive(Debug, Clone)]
pub struct ViewRequest {
  pub view:             ViewType,
  pub anchor:           NaiveDate,
  pub tz:               Tz,
  pub user_id:          String,
  pub occurrence_limit: usize
}

impl ViewRequest {
  pub fn new(
    view: ViewType,
    anchor: NaiveDate,
    tz: Tz
  ) -> Self {
    Self {
      view,
      anchor,
      tz,
      user_id: String::new(),
      occurrence_limit:
        DEFAULT_OCCURRENCE_LIMIT
    }
  }

  #[must_use]
  pub fn for_user(
    mut self,
    user_id: impl Into<String>
  ) -> Self {
    self.user_id = user_id.into();
    self
  }
}

#[derive(
  Debug, Clone, PartialEq, Serialize,
)]
pub struct DayView {
  pub date:      NaiveDate,
  pub all_day:   Vec<CalendarItem>,
  /// The whole bucket in start order.
  pub items:     Vec<CalendarItem>,
  pub conflicts: ConflictReport,
  pub columns:   Vec<Column>,
  pub layout:    BTreeMap<String, SlotLayout>
}

impl DayView {
  /// Assembles one day from already-normalized items.
  pub fn build(
    date: NaiveDate,
    normalized: &[CalendarItem],
    tz: Tz,
    ignore: &IgnoreSet,
    user_id: &str
  ) -> Self {
    let items =
      items_for_day(date, normalized, tz);
    let conflicts = detect_conflicts(
      &items, ignore, user_id
    );

    let (all_day, timed): (
      Vec<CalendarItem>,
      Vec<CalendarItem>
    ) = items
      .iter()
      .cloned()
      .partition(|item| item.is_all_day());

    let columns = pack_columns(&timed);
    let layout =
      layout_for_day(&columns, date, tz);

    Self {
      date,
      all_day,
      items,
      conflicts,
      columns,
      layout
    }
  }
}

#[derive(
  Debug, Clone, PartialEq, Serialize,
)]
pub struct CalendarView {
  pub window: Window,
  pub days:   Vec<DayView>
}

impl CalendarView {
  pub fn conflict_count(&self) -> usize {
    self
      .days
      .iter()
      .map(|day| day.conflicts.pairs().len())
      .sum()
  }

  pub fn item_count(&self) -> usize {
    self
      .days
      .iter()
      .map(|day| day.items.len())
      .sum()
  }
}

/// Runs the whole engine over one snapshot. Never fails: bad records
/// are reported to `sink` and left out.
#[tracing::instrument(
  skip(snapshot, ignore, sink),
  fields(
    view = %request.view,
    anchor = %request.anchor,
    tz = %request.tz
  )
)]
pub fn materialize(
  snapshot: &Snapshot,
  request: &ViewRequest,
  ignore: &IgnoreSet,
  sink: &mut dyn DiagnosticSink
) -> CalendarView {
  let window = resolve_window(
    request.view,
    request.anchor
  );
  let normalized = normalize_snapshot(
    snapshot,
    request.tz,
    request.occurrence_limit,
    sink
  );

  let days: Vec<DayView> = window
    .days
    .iter()
    .map(|date| {
      DayView::build(
        *date,
        &normalized,
        request.tz,
        ignore,
        &request.user_id
      )
    })
    .collect();

  tracing::info!(
    days = days.len(),
    items = normalized.len(),
    "materialized calendar view"
  );

  CalendarView { window, days }
}
