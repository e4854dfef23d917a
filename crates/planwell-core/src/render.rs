use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::conflict::{ConflictIgnoreKey, ConflictReport};
use crate::config::Config;
use crate::item::{CalendarItem, ItemKind, Priority, Timing};
use crate::pipeline::{CalendarView, DayView};
use crate::window::Window;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> Self {
        Self {
            color: cfg.calendar.color,
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Agenda tables, one per day.
    #[tracing::instrument(skip_all, fields(days = view.days.len()))]
    pub fn write_calendar<W: Write>(
        &self,
        mut out: W,
        view: &CalendarView,
        tz: Tz,
    ) -> anyhow::Result<()> {
        writeln!(
            out,
            "{} view {} .. {} ({tz})",
            view.window.view, view.window.first, view.window.last
        )?;
        for day in &view.days {
            writeln!(out)?;
            self.write_day(&mut out, day, tz)?;
        }
        Ok(())
    }

    fn write_day<W: Write>(&self, out: &mut W, day: &DayView, tz: Tz) -> anyhow::Result<()> {
        let heading = day.date.format("%a %Y-%m-%d").to_string();
        writeln!(out, "{}", self.paint(&heading, "1"))?;
        if day.items.is_empty() {
            writeln!(out, "  (nothing scheduled)")?;
            return Ok(());
        }

        let headers = vec![
            "Time".to_string(),
            "Kind".to_string(),
            "Title".to_string(),
            "Pri".to_string(),
            "Lane".to_string(),
            "Conflicts".to_string(),
        ];

        let mut rows = Vec::with_capacity(day.items.len());
        for item in &day.items {
            let lane = item
                .id_str()
                .and_then(|id| day.layout.get(id))
                .map(|slot| format!("{}/{}", slot.column + 1, slot.column_count))
                .unwrap_or_default();
            let conflicts = conflict_cell(&day.conflicts, item);
            let conflicts = if conflicts.is_empty() {
                conflicts
            } else {
                self.paint(&conflicts, "31")
            };
            rows.push(vec![
                time_cell(item, day.date, tz),
                self.paint(item.kind.as_str(), kind_color(item.kind)),
                item.title.clone(),
                priority_cell(item.priority),
                lane,
                conflicts,
            ]);
        }

        write_table(&mut *out, headers, rows)
    }

    pub fn write_window<W: Write>(&self, mut out: W, window: &Window, tz: Tz) -> anyhow::Result<()> {
        let (start, end) = window.bounds(tz);
        writeln!(out, "view:   {}", window.view)?;
        writeln!(out, "anchor: {}", window.anchor)?;
        writeln!(out, "range:  {} .. {}", window.first, window.last)?;
        writeln!(out, "bounds: {} .. {}", start.to_rfc3339(), end.to_rfc3339())?;
        for week in window.days.chunks(7) {
            let line = week
                .iter()
                .map(|day| day.format("%a %d").to_string())
                .collect::<Vec<_>>()
                .join("  ");
            writeln!(out, "  {line}")?;
        }
        Ok(())
    }

    pub fn write_occurrences<W: Write>(
        &self,
        mut out: W,
        occurrences: &[DateTime<Tz>],
    ) -> anyhow::Result<()> {
        let headers = vec!["#".to_string(), "Occurrence".to_string()];
        let rows = occurrences
            .iter()
            .enumerate()
            .map(|(idx, at)| {
                vec![
                    self.paint(&(idx + 1).to_string(), "33"),
                    at.format("%a %Y-%m-%d %H:%M %Z").to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    pub fn write_conflicts<W: Write>(
        &self,
        mut out: W,
        date: NaiveDate,
        report: &ConflictReport,
        user_id: &str,
    ) -> anyhow::Result<()> {
        let pairs = report.pairs();
        if pairs.is_empty() {
            writeln!(out, "no conflicts on {date}")?;
            return Ok(());
        }
        writeln!(out, "{} conflict(s) on {date}", pairs.len())?;
        let headers = vec!["First".to_string(), "Second".to_string(), "Ignore key".to_string()];
        let rows = pairs
            .into_iter()
            .map(|(low, high)| {
                let key = ConflictIgnoreKey::new(user_id, &low, &high).to_string();
                vec![self.paint(&low, "31"), self.paint(&high, "31"), key]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn kind_color(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Event => "34",
        ItemKind::Task => "32",
        ItemKind::Session => "35",
        ItemKind::Reminder => "33",
        ItemKind::Deadline => "31",
    }
}

fn priority_cell(priority: Priority) -> String {
    match priority {
        Priority::High => "H",
        Priority::Medium => "M",
        Priority::Low => "L",
        Priority::None => "",
    }
    .to_string()
}

fn time_cell(item: &CalendarItem, day: NaiveDate, tz: Tz) -> String {
    match &item.timing {
        Timing::AllDay { .. } => "all day".to_string(),
        Timing::PointInTime => local_clock(item.start, day, tz),
        Timing::Timed => format!(
            "{}-{}",
            local_clock(item.start, day, tz),
            local_clock(item.end, day, tz)
        ),
    }
}

/// `HH:MM` on `day`, with the date prefixed when it falls elsewhere.
fn local_clock(instant: DateTime<Utc>, day: NaiveDate, tz: Tz) -> String {
    let local = instant.with_timezone(&tz);
    if local.date_naive() == day {
        local.format("%H:%M").to_string()
    } else {
        local.format("%m-%d %H:%M").to_string()
    }
}

fn conflict_cell(report: &ConflictReport, item: &CalendarItem) -> String {
    item.id_str()
        .and_then(|id| report.groups.get(id))
        .map(|others| {
            others
                .iter()
                .map(|other| other.title.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "  {header:width$}")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "  {:-<width$}", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "  {}{}", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
