//! Recurrence expansion.
//!
//! Pre-generated patterns expand eagerly into a bounded list of
//! occurrence instants. On-completion patterns never expand here; the
//! caller asks [`should_generate_next`] once the current instance is
//! finished and creates the follow-up itself.

use chrono::{
  DateTime,
  Days,
  Months,
  TimeZone,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};

use crate::datetime::resolve_local_lenient;

pub const DEFAULT_OCCURRENCE_LIMIT: usize =
  10;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RecurrenceType {
  PreGenerated,
  OnCompletion
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
  None,
  Daily,
  Weekly,
  Monthly,
  Yearly,
  #[serde(other)]
  Unsupported
}

#[derive(
  Debug,
  Clone,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct RecurrencePattern {
  #[serde(rename = "type")]
  pub kind:          RecurrenceType,
  pub frequency:     Frequency,
  #[serde(
    default = "default_interval"
  )]
  pub interval:      i64,
  #[serde(
    default,
    with = "crate::datetime::end_date_serde"
  )]
  pub end_date:      Option<DateTime<Utc>>,
  #[serde(default)]
  pub days_of_week:  Option<Vec<u8>>,
  #[serde(default)]
  pub day_of_month:  Option<u32>,
  #[serde(default)]
  pub month_of_year: Option<u32>,
  #[serde(default)]
  pub parent_id:     Option<String>
}

fn default_interval() -> i64 {
  1
}

impl RecurrencePattern {
  pub fn new(
    kind: RecurrenceType,
    frequency: Frequency,
    interval: i64
  ) -> Self {
    Self {
      kind,
      frequency,
      interval,
      end_date: None,
      days_of_week: None,
      day_of_month: None,
      month_of_year: None,
      parent_id: None
    }
  }

  #[must_use]
  pub fn until(
    mut self,
    end_date: DateTime<Utc>
  ) -> Self {
    self.end_date = Some(end_date);
    self
  }

  /// Why this pattern can never produce a further occurrence, if it
  /// is structurally broken. `Frequency::None` is not broken.
  pub fn defect(
    &self
  ) -> Option<String> {
    if self.interval <= 0 {
      return Some(format!(
        "interval must be positive, \
         got {}",
        self.interval
      ));
    }
    if self.frequency
      == Frequency::Unsupported
    {
      return Some(
        "unsupported frequency"
          .to_string()
      );
    }
    None
  }
}

/// Steps `date` forward by one interval of the pattern.
///
/// Returns `None` for non-repeating or broken patterns and when the
/// step lands after `end_date`. Day and week steps keep the local
/// wall-clock time; month and year steps clamp to the last day of a
/// shorter month.
pub fn next_occurrence<Z: TimeZone>(
  date: &DateTime<Z>,
  pattern: &RecurrencePattern
) -> Option<DateTime<Z>> {
  if pattern.defect().is_some() {
    return None;
  }
  let interval =
    u32::try_from(pattern.interval)
      .ok()?;

  let local = date.naive_local();
  let stepped = match pattern.frequency
  {
    | Frequency::Daily => {
      local.checked_add_days(
        Days::new(u64::from(interval))
      )?
    }
    | Frequency::Weekly => {
      local.checked_add_days(
        Days::new(
          u64::from(interval) * 7
        )
      )?
    }
    | Frequency::Monthly => {
      local.checked_add_months(
        Months::new(interval)
      )?
    }
    | Frequency::Yearly => {
      local.checked_add_months(
        Months::new(
          interval.checked_mul(12)?
        )
      )?
    }
    | Frequency::None
    | Frequency::Unsupported => {
      return None;
    }
  };

  let next = resolve_local_lenient(
    &date.timezone(),
    &stepped
  )?;

  if let Some(end) = pattern.end_date
    && next > end
  {
    return None;
  }

  Some(next)
}

/// Expands a pre-generated pattern into at most `limit` instants,
/// always starting with `start`. Other pattern types yield `[start]`.
#[tracing::instrument(skip(start, pattern), fields(frequency = ?pattern.frequency, interval = pattern.interval))]
pub fn generate_occurrences<
  Z: TimeZone
>(
  start: &DateTime<Z>,
  pattern: &RecurrencePattern,
  limit: usize
) -> Vec<DateTime<Z>> {
  let mut occurrences =
    vec![start.clone()];

  if pattern.kind
    != RecurrenceType::PreGenerated
  {
    return occurrences;
  }

  if let Some(reason) = pattern.defect()
  {
    tracing::debug!(
      reason = %reason,
      "recurrence cannot expand"
    );
    return occurrences;
  }

  let mut current = start.clone();
  while occurrences.len() < limit {
    let Some(next) =
      next_occurrence(&current, pattern)
    else {
      break;
    };
    occurrences.push(next.clone());
    current = next;
  }

  tracing::trace!(
    count = occurrences.len(),
    "expanded recurrence"
  );
  occurrences
}

/// Whether an on-completion recurrence should spawn its next instance
/// now that the instance at `current` has been completed. Broken
/// patterns never do.
pub fn should_generate_next<
  Z: TimeZone
>(
  pattern: &RecurrencePattern,
  current: &DateTime<Z>
) -> bool {
  if pattern.kind
    != RecurrenceType::OnCompletion
    || pattern.frequency
      == Frequency::None
    || pattern.defect().is_some()
  {
    return false;
  }

  match pattern.end_date {
    | Some(end) => *current <= end,
    | None => true
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::*;

  fn utc(
    y: i32,
    m: u32,
    d: u32
  ) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(y, m, d, 9, 0, 0)
      .single()
      .expect("valid instant")
  }

  fn dates(
    occurrences: &[DateTime<Utc>]
  ) -> Vec<NaiveDate> {
    occurrences
      .iter()
      .map(|dt| dt.date_naive())
      .collect()
  }

  fn ymd(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn weekly_expansion_stops_at_limit() {
    let pattern = RecurrencePattern::new(
      RecurrenceType::PreGenerated,
      Frequency::Weekly,
      1
    );
    let occurrences =
      generate_occurrences(
        &utc(2024, 1, 1),
        &pattern,
        4
      );
    assert_eq!(
      dates(&occurrences),
      vec![
        ymd(2024, 1, 1),
        ymd(2024, 1, 8),
        ymd(2024, 1, 15),
        ymd(2024, 1, 22)
      ]
    );
  }

  #[test]
  fn expansion_stops_at_end_date() {
    let pattern = RecurrencePattern::new(
      RecurrenceType::PreGenerated,
      Frequency::Daily,
      2
    )
    .until(utc(2024, 1, 6));
    let occurrences =
      generate_occurrences(
        &utc(2024, 1, 1),
        &pattern,
        DEFAULT_OCCURRENCE_LIMIT
      );
    assert_eq!(
      dates(&occurrences),
      vec![
        ymd(2024, 1, 1),
        ymd(2024, 1, 3),
        ymd(2024, 1, 5)
      ]
    );
  }

  #[test]
  fn on_completion_patterns_do_not_expand() {
    let pattern = RecurrencePattern::new(
      RecurrenceType::OnCompletion,
      Frequency::Daily,
      1
    );
    let start = utc(2024, 1, 1);
    assert_eq!(
      generate_occurrences(
        &start, &pattern, 10
      ),
      vec![start]
    );
    assert!(should_generate_next(
      &pattern, &start
    ));
  }

  #[test]
  fn should_generate_next_respects_end_and_type() {
    let pattern = RecurrencePattern::new(
      RecurrenceType::OnCompletion,
      Frequency::Weekly,
      1
    )
    .until(utc(2024, 2, 1));
    assert!(should_generate_next(
      &pattern,
      &utc(2024, 2, 1)
    ));
    assert!(!should_generate_next(
      &pattern,
      &utc(2024, 2, 2)
    ));

    let never = RecurrencePattern::new(
      RecurrenceType::OnCompletion,
      Frequency::None,
      1
    );
    assert!(!should_generate_next(
      &never,
      &utc(2024, 1, 1)
    ));

    let eager = RecurrencePattern::new(
      RecurrenceType::PreGenerated,
      Frequency::Daily,
      1
    );
    assert!(!should_generate_next(
      &eager,
      &utc(2024, 1, 1)
    ));
  }

  #[test]
  fn broken_on_completion_pattern_never_asks_for_more() {
    let current = utc(2024, 1, 1);
    let zero_interval =
      RecurrencePattern::new(
        RecurrenceType::OnCompletion,
        Frequency::Weekly,
        0
      );
    let unsupported =
      RecurrencePattern::new(
        RecurrenceType::OnCompletion,
        Frequency::Unsupported,
        1
      );
    for pattern in
      [zero_interval, unsupported]
    {
      assert!(!should_generate_next(
        &pattern, &current
      ));
      assert_eq!(
        next_occurrence(
          &current, &pattern
        ),
        None
      );
    }
  }

  #[test]
  fn invalid_patterns_yield_no_next_occurrence() {
    let start = utc(2024, 1, 1);
    for pattern in [
      RecurrencePattern::new(
        RecurrenceType::PreGenerated,
        Frequency::Daily,
        0
      ),
      RecurrencePattern::new(
        RecurrenceType::PreGenerated,
        Frequency::Daily,
        -3
      ),
      RecurrencePattern::new(
        RecurrenceType::PreGenerated,
        Frequency::Unsupported,
        1
      ),
      RecurrencePattern::new(
        RecurrenceType::PreGenerated,
        Frequency::None,
        1
      )
    ] {
      assert_eq!(
        next_occurrence(
          &start, &pattern
        ),
        None
      );
      assert_eq!(
        generate_occurrences(
          &start, &pattern, 5
        ),
        vec![start]
      );
    }
  }

  #[test]
  fn monthly_steps_clamp_to_month_end() {
    let pattern = RecurrencePattern::new(
      RecurrenceType::PreGenerated,
      Frequency::Monthly,
      1
    );
    let next = next_occurrence(
      &utc(2024, 1, 31),
      &pattern
    )
    .expect("next month");
    assert_eq!(
      next.date_naive(),
      ymd(2024, 2, 29)
    );

    let yearly = RecurrencePattern::new(
      RecurrenceType::PreGenerated,
      Frequency::Yearly,
      1
    );
    let next = next_occurrence(
      &utc(2024, 2, 29),
      &yearly
    )
    .expect("next year");
    assert_eq!(
      next.date_naive(),
      ymd(2025, 2, 28)
    );
  }

  #[test]
  fn daily_steps_keep_wall_clock_across_dst() {
    let tz = chrono_tz::Europe::Berlin;
    let start = tz
      .with_ymd_and_hms(
        2024, 3, 30, 9, 0, 0
      )
      .single()
      .expect("valid local");
    let pattern = RecurrencePattern::new(
      RecurrenceType::PreGenerated,
      Frequency::Daily,
      1
    );
    let next = next_occurrence(
      &start, &pattern
    )
    .expect("next day");
    assert_eq!(
      next
        .naive_local()
        .format("%Y-%m-%d %H:%M")
        .to_string(),
      "2024-03-31 09:00"
    );
    assert_eq!(
      (next - start).num_hours(),
      23
    );
  }

  #[test]
  fn deserializes_wire_pattern() {
    let pattern: RecurrencePattern =
      serde_json::from_str(
        r#"{"type":"pre-generated","frequency":"fortnightly","interval":2,"endDate":"2024-06-30"}"#
      )
      .expect("parse pattern");
    assert_eq!(
      pattern.frequency,
      Frequency::Unsupported
    );
    assert_eq!(pattern.interval, 2);
    assert!(pattern.end_date.is_some());
    assert!(pattern.defect().is_some());
  }
}
