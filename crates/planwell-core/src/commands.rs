use std::io::{
  self,
  Write
};

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use tracing::{
  debug,
  info,
  instrument
};

use crate::cli::{
  Command,
  ConflictArgs,
  OccurrenceArgs,
  ViewArgs,
  WindowArgs
};
use crate::config::{
  Config,
  today_in
};
use crate::conflict::IgnoreSet;
use crate::datetime::{
  end_date_serde,
  parse_anchor_date,
  parse_instant,
  start_of_local_day
};
use crate::diagnostic::{
  Diagnostic,
  Tee,
  TracingSink,
  summary
};
use crate::normalize::normalize_snapshot;
use crate::pipeline::{
  CalendarView,
  DayView,
  ViewRequest,
  materialize
};
use crate::recurrence::{
  Frequency,
  RecurrencePattern,
  RecurrenceType,
  generate_occurrences,
  should_generate_next
};
use crate::render::Renderer;
use crate::snapshot::{
  load_ignore_set,
  load_snapshot,
  write_json_atomic
};
use crate::window::{
  ViewType,
  resolve_window
};

#[instrument(skip_all)]
pub fn dispatch(
  cfg: &Config,
  renderer: &Renderer,
  command: Command
) -> anyhow::Result<()> {
  let tz = cfg.resolve_timezone();
  let today = today_in(tz);
  debug!(timezone = %tz, today = %today, "resolved command context");

  let stdout = io::stdout();
  let mut out = stdout.lock();

  match command {
    | Command::View(args) => {
      cmd_view(
        cfg, renderer, &args, tz, today,
        &mut out
      )
    }
    | Command::Occurrences(args) => {
      cmd_occurrences(
        cfg, renderer, &args, tz,
        today, &mut out
      )
    }
    | Command::Window(args) => {
      cmd_window(
        cfg, renderer, &args, tz, today,
        &mut out
      )
    }
    | Command::Conflicts(args) => {
      cmd_conflicts(
        cfg, renderer, &args, tz, today,
        &mut out
      )
    }
  }
}

fn resolve_view(
  cfg: &Config,
  raw: Option<&str>
) -> anyhow::Result<ViewType> {
  match raw {
    | Some(text) => text.parse(),
    | None => Ok(cfg.default_view())
  }
}

fn resolve_user(
  cfg: &Config,
  raw: Option<&str>
) -> String {
  raw
    .map(str::to_string)
    .unwrap_or_else(|| {
      cfg.user_id().to_string()
    })
}

fn load_ignore(
  path: Option<&std::path::Path>,
  user_id: &str
) -> anyhow::Result<IgnoreSet> {
  match path {
    | Some(path) => {
      load_ignore_set(path, user_id)
        .with_context(|| {
          format!(
            "failed to load conflict \
             resolutions from {}",
            path.display()
          )
        })
    }
    | None => Ok(IgnoreSet::new())
  }
}

#[instrument(skip(cfg, renderer, out))]
pub fn cmd_view<W: Write>(
  cfg: &Config,
  renderer: &Renderer,
  args: &ViewArgs,
  tz: Tz,
  today: NaiveDate,
  out: &mut W
) -> anyhow::Result<()> {
  let view =
    resolve_view(cfg, args.view.as_deref())?;
  let anchor =
    parse_anchor_date(&args.date, today)?;
  let user_id =
    resolve_user(cfg, args.user.as_deref());

  let snapshot =
    load_snapshot(&args.snapshot)?;
  let ignore = load_ignore(
    args.ignore.as_deref(),
    &user_id
  )?;

  let mut request =
    ViewRequest::new(view, anchor, tz)
      .for_user(user_id);
  request.occurrence_limit =
    cfg.calendar.occurrence_limit;

  let mut collected: Vec<Diagnostic> =
    Vec::new();
  let mut logged = TracingSink::default();
  let calendar = {
    let mut sink = Tee {
      first:  &mut collected,
      second: &mut logged
    };
    materialize(
      &snapshot, &request, &ignore,
      &mut sink
    )
  };

  if let Some(path) = &args.output {
    write_json_atomic(path, &calendar)
      .with_context(|| {
        format!(
          "failed to write {}",
          path.display()
        )
      })?;
    info!(file = %path.display(), "wrote calendar json");
  }

  if args.json {
    write_view_json(out, &calendar)?;
  } else {
    renderer
      .write_calendar(&mut *out, &calendar, tz)?;
  }

  report_diagnostics(&collected);
  Ok(())
}

fn write_view_json<W: Write>(
  out: &mut W,
  calendar: &CalendarView
) -> anyhow::Result<()> {
  serde_json::to_writer_pretty(
    &mut *out, calendar
  )?;
  writeln!(out)?;
  Ok(())
}

fn report_diagnostics(
  diagnostics: &[Diagnostic]
) {
  let dropped = diagnostics
    .iter()
    .filter(|diagnostic| {
      diagnostic.kind.drops_item()
    })
    .count();
  if let Some(line) =
    summary(diagnostics.len(), dropped)
  {
    eprintln!("{line}");
  }
}

#[instrument(skip(cfg, renderer, out))]
pub fn cmd_occurrences<W: Write>(
  cfg: &Config,
  renderer: &Renderer,
  args: &OccurrenceArgs,
  tz: Tz,
  today: NaiveDate,
  out: &mut W
) -> anyhow::Result<()> {
  let start =
    parse_start(&args.start, tz, today)?;
  let pattern = build_pattern(args)?;
  let limit = args
    .limit
    .unwrap_or(
      cfg.calendar.occurrence_limit
    );

  let occurrences = generate_occurrences(
    &start.with_timezone(&tz),
    &pattern,
    limit
  );
  renderer.write_occurrences(
    &mut *out,
    &occurrences
  )?;

  if pattern.kind
    == RecurrenceType::OnCompletion
  {
    writeln!(
      out,
      "on completion: next instance \
       {}",
      if should_generate_next(
        &pattern, &start
      ) {
        "would be generated"
      } else {
        "would not be generated"
      }
    )?;
  }
  Ok(())
}

/// An instant, or a date expression meaning its local midnight.
fn parse_start(
  raw: &str,
  tz: Tz,
  today: NaiveDate
) -> anyhow::Result<DateTime<Utc>> {
  if let Ok(instant) =
    parse_instant(raw, tz)
  {
    return Ok(instant);
  }
  let date =
    parse_anchor_date(raw, today)
      .with_context(|| {
        format!(
          "invalid start `{raw}`"
        )
      })?;
  Ok(start_of_local_day(date, tz))
}

fn build_pattern(
  args: &OccurrenceArgs
) -> anyhow::Result<RecurrencePattern> {
  let kind = match args
    .kind
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "pre-generated"
    | "pregenerated" => {
      RecurrenceType::PreGenerated
    }
    | "on-completion"
    | "oncompletion" => {
      RecurrenceType::OnCompletion
    }
    | other => {
      return Err(anyhow!(
        "unknown recurrence type \
         `{other}`; expected \
         pre-generated or \
         on-completion"
      ));
    }
  };

  let frequency = match args
    .frequency
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "none" | "once" => Frequency::None,
    | "daily" => Frequency::Daily,
    | "weekly" => Frequency::Weekly,
    | "monthly" => Frequency::Monthly,
    | "yearly" => Frequency::Yearly,
    | other => {
      return Err(anyhow!(
        "unknown frequency `{other}`"
      ));
    }
  };

  let mut pattern = RecurrencePattern::new(
    kind,
    frequency,
    args.interval
  );
  if let Some(raw_end) = &args.end {
    pattern.end_date = Some(
      end_date_serde::parse(raw_end)
        .ok_or_else(|| {
          anyhow!(
            "invalid end date \
             `{raw_end}`"
          )
        })?
    );
  }
  if let Some(reason) = pattern.defect()
  {
    return Err(anyhow!(
      "invalid recurrence: {reason}"
    ));
  }
  Ok(pattern)
}

#[instrument(skip(cfg, renderer, out))]
pub fn cmd_window<W: Write>(
  cfg: &Config,
  renderer: &Renderer,
  args: &WindowArgs,
  tz: Tz,
  today: NaiveDate,
  out: &mut W
) -> anyhow::Result<()> {
  let view =
    resolve_view(cfg, args.view.as_deref())?;
  let anchor =
    parse_anchor_date(&args.date, today)?;
  let window =
    resolve_window(view, anchor);
  renderer.write_window(
    &mut *out, &window, tz
  )
}

#[instrument(skip(cfg, renderer, out))]
pub fn cmd_conflicts<W: Write>(
  cfg: &Config,
  renderer: &Renderer,
  args: &ConflictArgs,
  tz: Tz,
  today: NaiveDate,
  out: &mut W
) -> anyhow::Result<()> {
  let date =
    parse_anchor_date(&args.date, today)?;
  let user_id =
    resolve_user(cfg, args.user.as_deref());
  let snapshot =
    load_snapshot(&args.snapshot)?;
  let ignore = load_ignore(
    args.ignore.as_deref(),
    &user_id
  )?;

  let mut logged = TracingSink::default();
  let items = normalize_snapshot(
    &snapshot,
    tz,
    cfg.calendar.occurrence_limit,
    &mut logged
  );
  let day = DayView::build(
    date, &items, tz, &ignore, &user_id
  );

  renderer.write_conflicts(
    &mut *out,
    date,
    &day.conflicts,
    &user_id
  )?;
  if let Some(line) = summary(
    logged.reported,
    logged.dropped
  ) {
    eprintln!("{line}");
  }
  Ok(())
}
