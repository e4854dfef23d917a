use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::datetime::{
  day_bounds,
  local_date
};
use crate::item::{
  CalendarItem,
  Timing
};

/// Whether `item` shows up on the local calendar `day`.
///
/// Timed items use the spanning rule so overnight blocks appear on
/// both days they touch. All-day ranges are end-exclusive. Reminders
/// and deadlines only appear on their own local date.
pub fn visible_on(
  item: &CalendarItem,
  day: NaiveDate,
  tz: Tz
) -> bool {
  match &item.timing {
    | Timing::Timed => {
      let (start_of_day, end_of_day) =
        day_bounds(day, tz);
      item.start < end_of_day
        && item.end >= start_of_day
    }
    | Timing::AllDay {
      first,
      until: Some(until)
    } => *first <= day && day < *until,
    | Timing::AllDay {
      first,
      until: None
    } => *first == day,
    | Timing::PointInTime => {
      local_date(item.start, tz) == day
    }
  }
}

/// Items visible on `day`, sorted by start. Equal starts keep their
/// input order.
#[tracing::instrument(skip(items), fields(candidates = items.len()))]
pub fn items_for_day(
  day: NaiveDate,
  items: &[CalendarItem],
  tz: Tz
) -> Vec<CalendarItem> {
  let mut visible: Vec<CalendarItem> =
    items
      .iter()
      .filter(|item| {
        visible_on(item, day, tz)
      })
      .cloned()
      .collect();
  visible.sort_by_key(|item| item.start);

  tracing::trace!(
    day = %day,
    count = visible.len(),
    "bucketed day"
  );
  visible
}
