use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};

use crate::datetime::start_of_local_day;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
  Day,
  #[default]
  Week,
  Month,
  Schedule
}

impl ViewType {
  pub fn as_str(self) -> &'static str {
    match self {
      | ViewType::Day => "day",
      | ViewType::Week => "week",
      | ViewType::Month => "month",
      | ViewType::Schedule => {
        "schedule"
      }
    }
  }
}

impl std::fmt::Display for ViewType {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>
  ) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ViewType {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "day" => Ok(ViewType::Day),
      | "week" => Ok(ViewType::Week),
      | "month" => Ok(ViewType::Month),
      | "schedule" | "agenda" => {
        Ok(ViewType::Schedule)
      }
      | other => {
        Err(anyhow!(
          "unknown view `{other}`; \
           expected day, week, month \
           or schedule"
        ))
      }
    }
  }
}

/// The days a view renders, in order, plus their inclusive bounds.
#[derive(
  Debug, Clone, PartialEq, Eq, Serialize,
)]
pub struct Window {
  pub view:   ViewType,
  pub anchor: NaiveDate,
  pub days:   Vec<NaiveDate>,
  pub first:  NaiveDate,
  pub last:   NaiveDate
}

impl Window {
  /// Half-open instant range covering every rendered day in `tz`,
  /// for fetching only entities that can show up.
  #[must_use]
  pub fn bounds(
    &self,
    tz: Tz
  ) -> (DateTime<Utc>, DateTime<Utc>) {
    (
      start_of_local_day(
        self.first, tz
      ),
      start_of_local_day(
        add_days(self.last, 1),
        tz
      )
    )
  }

  pub fn contains(
    &self,
    day: NaiveDate
  ) -> bool {
    self.first <= day
      && day <= self.last
  }
}

#[tracing::instrument]
pub fn resolve_window(
  view: ViewType,
  anchor: NaiveDate
) -> Window {
  let (first, last) = match view {
    | ViewType::Day
    | ViewType::Schedule => {
      (anchor, anchor)
    }
    | ViewType::Week => {
      let start = start_of_week(
        anchor,
        Weekday::Mon
      );
      (start, add_days(start, 6))
    }
    | ViewType::Month => {
      let month_start =
        first_day_of_month(
          anchor.year(),
          anchor.month()
        );
      let month_end = last_day_of_month(
        anchor.year(),
        anchor.month()
      );
      let grid_start = start_of_week(
        month_start,
        Weekday::Mon
      );
      let grid_end = add_days(
        start_of_week(
          month_end,
          Weekday::Mon
        ),
        6
      );
      (grid_start, grid_end)
    }
  };

  let days: Vec<NaiveDate> = first
    .iter_days()
    .take_while(|day| *day <= last)
    .collect();

  tracing::debug!(
    first = %first,
    last = %last,
    count = days.len(),
    "resolved calendar window"
  );

  Window {
    view,
    anchor,
    days,
    first,
    last
  }
}

/// Previous/next navigation. Month steps clamp the day of month.
pub fn shift_anchor(
  view: ViewType,
  anchor: NaiveDate,
  step: i64
) -> NaiveDate {
  match view {
    | ViewType::Month => {
      shift_months(
        anchor,
        i32::try_from(step)
          .unwrap_or(0)
      )
    }
    | ViewType::Week => {
      add_days(anchor, step * 7)
    }
    | ViewType::Day
    | ViewType::Schedule => {
      add_days(anchor, step)
    }
  }
}

fn shift_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  let mut year = date.year();
  let mut month =
    date.month() as i32 + months;

  while month < 1 {
    month += 12;
    year = year.saturating_sub(1);
  }
  while month > 12 {
    month -= 12;
    year = year.saturating_add(1);
  }

  let month = month as u32;
  let day = date
    .day()
    .min(days_in_month(year, month));
  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .unwrap_or(date)
}

pub fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

pub fn last_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
}

fn days_in_month(
  year: i32,
  month: u32
) -> u32 {
  last_day_of_month(year, month).day()
}

pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

pub fn start_of_week(
  day: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  let day_idx = day
    .weekday()
    .num_days_from_monday()
    as i64;
  let start_idx = week_start
    .num_days_from_monday()
    as i64;
  let diff =
    (7 + day_idx - start_idx) % 7;
  add_days(day, -diff)
}
