//! Side-by-side lanes for overlapping items in day and week grids.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;

use crate::datetime::day_bounds;
use crate::item::CalendarItem;

/// Minimum rendered height of a block, in minutes of grid time.
pub const MIN_SLOT_MINUTES: i64 = 24;

/// One display lane. Items are in start order and never overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Column {
    pub items: Vec<CalendarItem>,
}

impl Column {
    fn accepts(&self, item: &CalendarItem) -> bool {
        self.items.last().is_none_or(|last| !last.overlaps(item))
    }
}

/// Greedy first-fit lane assignment over start-sorted items.
///
/// Sorting is stable, so items with equal starts keep their input
/// order and the result is deterministic.
pub fn pack_columns(items: &[CalendarItem]) -> Vec<Column> {
    let mut sorted: Vec<&CalendarItem> = items.iter().collect();
    sorted.sort_by_key(|item| item.start);

    let mut columns: Vec<Column> = Vec::new();
    for item in sorted {
        match columns.iter_mut().find(|column| column.accepts(item)) {
            Some(column) => column.items.push(item.clone()),
            None => columns.push(Column {
                items: vec![item.clone()],
            }),
        }
    }
    columns
}

/// Placement of one item inside the day grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SlotLayout {
    pub column: usize,
    pub column_count: usize,
    pub width_percent: f64,
    pub left_percent: f64,
    /// Minutes after local midnight, clamped to the day.
    pub top_minutes: i64,
    pub height_minutes: i64,
}

/// Grid geometry for every packed item that has an id.
pub fn layout_for_day(
    columns: &[Column],
    day: NaiveDate,
    tz: Tz,
) -> BTreeMap<String, SlotLayout> {
    let (day_start, day_end) = day_bounds(day, tz);
    let day_minutes = (day_end - day_start).num_minutes().max(1);
    let column_count = columns.len().max(1);
    let width_percent = 100.0 / column_count as f64;

    let mut layout = BTreeMap::new();
    for (index, column) in columns.iter().enumerate() {
        for item in &column.items {
            let Some(id) = item.id_str() else {
                continue;
            };
            let top = (item.start - day_start).num_minutes().clamp(0, day_minutes);
            let bottom = (item.end - day_start).num_minutes().clamp(0, day_minutes);
            let height = (bottom - top).max(MIN_SLOT_MINUTES);
            layout.insert(
                id.to_string(),
                SlotLayout {
                    column: index,
                    column_count,
                    width_percent,
                    left_percent: index as f64 * width_percent,
                    top_minutes: top,
                    height_minutes: height,
                },
            );
        }
    }
    layout
}

/// Largest number of items overlapping at any single instant.
pub fn max_overlap_depth(items: &[CalendarItem]) -> usize {
    let mut edges: Vec<(chrono::DateTime<chrono::Utc>, i32)> = Vec::with_capacity(items.len() * 2);
    for item in items {
        if item.start < item.end {
            edges.push((item.start, 1));
            edges.push((item.end, -1));
        }
    }
    // Ends sort before starts at the same instant: back-to-back is not overlap.
    edges.sort();

    let mut depth = 0_i32;
    let mut deepest = 0_i32;
    for (_, delta) in edges {
        depth += delta;
        deepest = deepest.max(depth);
    }
    usize::try_from(deepest).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::item::{EntityKind, ItemKind, Priority, SourceRef, Timing};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, h, m, 0)
            .single()
            .expect("valid instant")
    }

    fn block(id: &str, start: (u32, u32), end: (u32, u32)) -> CalendarItem {
        CalendarItem {
            id: Some(id.to_string()),
            title: id.to_string(),
            start: at(start.0, start.1),
            end: at(end.0, end.1),
            timing: Timing::Timed,
            kind: ItemKind::Task,
            priority: Priority::None,
            source: SourceRef {
                entity: EntityKind::Task,
                position: 0,
                entity_id: Some(id.to_string()),
                slot: Some(0),
                occurrence: 0,
            },
        }
    }

    fn ids(column: &Column) -> Vec<&str> {
        column.items.iter().filter_map(|item| item.id_str()).collect()
    }

    fn sample() -> Vec<CalendarItem> {
        vec![
            block("d", (11, 0), (12, 0)),
            block("a", (9, 0), (10, 30)),
            block("b", (9, 30), (10, 0)),
            block("c", (10, 0), (11, 30)),
            block("e", (9, 45), (10, 15)),
        ]
    }

    #[test]
    fn packs_first_fit_in_start_order() {
        let columns = pack_columns(&sample());
        assert_eq!(columns.len(), 3);
        assert_eq!(ids(&columns[0]), vec!["a", "d"]);
        assert_eq!(ids(&columns[1]), vec!["b", "c"]);
        assert_eq!(ids(&columns[2]), vec!["e"]);
    }

    #[test]
    fn columns_never_hold_overlapping_items() {
        for column in pack_columns(&sample()) {
            for (i, first) in column.items.iter().enumerate() {
                for second in &column.items[i + 1..] {
                    assert!(!first.overlaps(second));
                }
            }
        }
    }

    #[test]
    fn column_count_matches_overlap_depth() {
        let items = sample();
        assert_eq!(max_overlap_depth(&items), 3);
        assert_eq!(pack_columns(&items).len(), max_overlap_depth(&items));

        let chain = vec![
            block("x", (8, 0), (9, 0)),
            block("y", (9, 0), (10, 0)),
            block("z", (10, 0), (11, 0)),
        ];
        assert_eq!(max_overlap_depth(&chain), 1);
        assert_eq!(pack_columns(&chain).len(), 1);
    }

    #[test]
    fn empty_input_has_no_columns() {
        assert!(pack_columns(&[]).is_empty());
        assert_eq!(max_overlap_depth(&[]), 0);
    }

    #[test]
    fn layout_splits_width_and_enforces_minimum_height() {
        let items = vec![block("long", (9, 0), (11, 0)), block("short", (9, 0), (9, 5))];
        let columns = pack_columns(&items);
        let day = NaiveDate::from_ymd_opt(2024, 1, 8).expect("valid date");
        let layout = layout_for_day(&columns, day, chrono_tz::UTC);

        let long = layout.get("long").expect("long slot");
        let short = layout.get("short").expect("short slot");
        assert_eq!(long.column_count, 2);
        assert_eq!(long.width_percent, 50.0);
        assert_eq!(long.left_percent, 0.0);
        assert_eq!(short.left_percent, 50.0);
        assert_eq!(long.top_minutes, 9 * 60);
        assert_eq!(long.height_minutes, 120);
        assert_eq!(short.height_minutes, MIN_SLOT_MINUTES);
    }

    #[test]
    fn layout_clamps_items_from_the_previous_day() {
        let mut overnight = block("late", (0, 0), (1, 0));
        overnight.start = Utc
            .with_ymd_and_hms(2024, 1, 7, 22, 0, 0)
            .single()
            .expect("valid instant");
        let columns = pack_columns(&[overnight]);
        let day = NaiveDate::from_ymd_opt(2024, 1, 8).expect("valid date");
        let layout = layout_for_day(&columns, day, chrono_tz::UTC);
        let slot = layout.get("late").expect("slot");
        assert_eq!(slot.top_minutes, 0);
        assert_eq!(slot.height_minutes, 60);
    }
}
