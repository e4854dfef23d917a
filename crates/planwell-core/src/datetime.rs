use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Timelike,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

const LOCAL_FORMATS: [&str; 5] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M:%S",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%d %H:%M"
];

/// Maps a local wall-clock time onto the timeline.
///
/// Ambiguous times (clock set back) resolve to the earliest instant.
/// Times that fall into a gap (clock set forward) yield `None`.
pub fn resolve_local<Z: TimeZone>(
  tz: &Z,
  local_naive: &NaiveDateTime
) -> Option<DateTime<Z>> {
  match tz.from_local_datetime(
    local_naive
  ) {
    | LocalResult::Single(dt) => {
      Some(dt)
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::trace!(
        local = %local_naive,
        "ambiguous local datetime; using earliest"
      );
      if first <= second {
        Some(first)
      } else {
        Some(second)
      }
    }
    | LocalResult::None => None
  }
}

/// Like [`resolve_local`], but a time inside a gap moves forward by
/// the usual one-hour shift.
pub fn resolve_local_lenient<
  Z: TimeZone
>(
  tz: &Z,
  local_naive: &NaiveDateTime
) -> Option<DateTime<Z>> {
  resolve_local(tz, local_naive)
    .or_else(|| {
      let shifted = local_naive
        .checked_add_signed(
          Duration::hours(1)
        )?;
      resolve_local(tz, &shifted)
    })
}

#[must_use]
pub fn local_date(
  instant: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  instant
    .with_timezone(&tz)
    .date_naive()
}

#[must_use]
pub fn is_local_midnight(
  instant: DateTime<Utc>,
  tz: Tz
) -> bool {
  let local =
    instant.with_timezone(&tz);
  local.hour() == 0
    && local.minute() == 0
}

/// First instant of `day` in `tz`.
#[must_use]
pub fn start_of_local_day(
  day: NaiveDate,
  tz: Tz
) -> DateTime<Utc> {
  let midnight =
    day.and_time(NaiveTime::MIN);
  match resolve_local_lenient(
    &tz, &midnight
  ) {
    | Some(dt) => {
      dt.with_timezone(&Utc)
    }
    | None => {
      tracing::warn!(
        day = %day,
        timezone = %tz,
        "no local midnight; falling back to UTC midnight"
      );
      midnight.and_utc()
    }
  }
}

/// Half-open `[start, end)` bounds of a local day.
#[must_use]
pub fn day_bounds(
  day: NaiveDate,
  tz: Tz
) -> (DateTime<Utc>, DateTime<Utc>) {
  let next = day
    .succ_opt()
    .unwrap_or(day);
  (
    start_of_local_day(day, tz),
    start_of_local_day(next, tz)
  )
}

/// Parses a source timestamp.
///
/// RFC 3339 values carry their own offset; everything else is local
/// wall time in `tz`, and a bare date means local midnight.
pub fn parse_instant(
  raw: &str,
  tz: Tz
) -> Result<DateTime<Utc>, String> {
  let token = raw.trim();
  if token.is_empty() {
    return Err(
      "empty timestamp".to_string()
    );
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  for fmt in LOCAL_FORMATS {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return local_to_utc(&ndt, tz);
    }
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return local_to_utc(
      &date.and_time(NaiveTime::MIN),
      tz
    );
  }

  Err(format!(
    "unrecognized timestamp format: \
     {token}"
  ))
}

fn local_to_utc(
  ndt: &NaiveDateTime,
  tz: Tz
) -> Result<DateTime<Utc>, String> {
  resolve_local(&tz, ndt)
    .map(|dt| dt.with_timezone(&Utc))
    .ok_or_else(|| {
      format!(
        "local time {ndt} does not \
         exist in {tz}"
      )
    })
}

/// Calendar date written in a raw value, ignoring any time of day.
///
/// `2024-03-01` and `2024-03-01T00:00:00Z` both give March 1st; no
/// timezone shift is applied.
pub fn parse_date_part(
  raw: &str
) -> Result<NaiveDate, String> {
  let token = raw.trim();
  let date_text = token
    .split(['T', ' '])
    .next()
    .unwrap_or(token);
  NaiveDate::parse_from_str(
    date_text, "%Y-%m-%d"
  )
  .map_err(|err| {
    format!(
      "invalid calendar date \
       {token}: {err}"
    )
  })
}

/// Resolves a user-supplied anchor date relative to `today`.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_anchor_date(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" | "now" => {
      return Ok(today);
    }
    | "tomorrow" => {
      return today
        .succ_opt()
        .ok_or_else(|| {
          anyhow!(
            "date out of range"
          )
        });
    }
    | "yesterday" => {
      return today
        .pred_opt()
        .ok_or_else(|| {
          anyhow!(
            "date out of range"
          )
        });
    }
    | _ => {}
  }

  if let Some(target) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, target
    ));
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let days = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("w") => num * 7,
      | _ => num
    };
    let signed = match caps
      .name("sign")
      .map(|m| m.as_str())
    {
      | Some("-") => -days,
      | _ => days
    };
    return today
      .checked_add_signed(
        Duration::days(signed)
      )
      .ok_or_else(|| {
        anyhow!(
          "relative date out of \
           range: {input}"
        )
      });
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(date);
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, \
     weekday names (e.g. monday), \
     +Nd/-Nd, +Nw/-Nw, YYYY-MM-DD"
  })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

/// Recurrence end dates: RFC 3339, or a bare date meaning the end of
/// that day in UTC. Unparsable values are dropped with a warning.
pub mod end_date_serde {
  use chrono::{
    DateTime,
    NaiveDate,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn parse(
    raw: &str
  ) -> Option<DateTime<Utc>> {
    let token = raw.trim();
    if let Ok(dt) =
      DateTime::parse_from_rfc3339(
        token
      )
    {
      return Some(
        dt.with_timezone(&Utc)
      );
    }
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
    .ok()
    .and_then(|date| {
      date.and_hms_opt(23, 59, 59)
    })
    .map(|ndt| ndt.and_utc())
  }

  pub fn serialize<S>(
    dt: &Option<DateTime<Utc>>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match dt {
      | Some(value) => {
        serializer.serialize_str(
          &value.to_rfc3339()
        )
      }
      | None => {
        serializer.serialize_none()
      }
    }
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<
    Option<DateTime<Utc>>,
    D::Error
  >
  where
    D: Deserializer<'de>
  {
    let opt =
      Option::<String>::deserialize(
        deserializer
      )?;
    Ok(opt.and_then(|raw| {
      let parsed = parse(&raw);
      if parsed.is_none() {
        tracing::warn!(
          raw = %raw,
          "ignoring unparsable recurrence end date"
        );
      }
      parsed
    }))
  }
}
