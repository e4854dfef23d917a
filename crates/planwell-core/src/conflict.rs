use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::item::CalendarItem;

/// Order-independent identity of a dismissed conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConflictIgnoreKey {
    pub user_id: String,
    pub low: String,
    pub high: String,
}

impl ConflictIgnoreKey {
    pub fn new(user_id: &str, a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            user_id: user_id.to_string(),
            low: low.to_string(),
            high: high.to_string(),
        }
    }
}

impl fmt::Display for ConflictIgnoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.user_id, self.low, self.high)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    Ignored,
    AiApplied,
    Rescheduled,
    Deleted,
}

/// A persisted decision about one conflicting pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRecord {
    pub user_id: String,
    pub item1_id: String,
    pub item2_id: String,
    pub resolution_type: ResolutionType,
}

/// Read-only set of dismissed conflicts, loaded per call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    keys: HashSet<ConflictIgnoreKey>,
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only `ignored` records that belong to `user_id`.
    pub fn from_resolutions<'a>(
        records: impl IntoIterator<Item = &'a ResolutionRecord>,
        user_id: &str,
    ) -> Self {
        let keys: HashSet<ConflictIgnoreKey> = records
            .into_iter()
            .filter(|record| {
                record.user_id == user_id && record.resolution_type == ResolutionType::Ignored
            })
            .map(|record| ConflictIgnoreKey::new(user_id, &record.item1_id, &record.item2_id))
            .collect();
        debug!(user = %user_id, count = keys.len(), "loaded ignored conflicts");
        Self { keys }
    }

    pub fn insert(&mut self, key: ConflictIgnoreKey) -> bool {
        self.keys.insert(key)
    }

    pub fn contains(&self, key: &ConflictIgnoreKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<ConflictIgnoreKey> for IgnoreSet {
    fn from_iter<I: IntoIterator<Item = ConflictIgnoreKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Conflicts found in one day's bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    /// Every id involved in at least one conflict.
    pub conflicted: BTreeSet<String>,
    /// For each conflicted id, the other items it overlaps with, in
    /// discovery order.
    pub groups: BTreeMap<String, Vec<CalendarItem>>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.conflicted.is_empty()
    }

    pub fn has_conflict(&self, id: &str) -> bool {
        self.conflicted.contains(id)
    }

    /// Each unordered pair once, low id first.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (id, others) in &self.groups {
            for other in others {
                if let Some(other_id) = other.id_str()
                    && id.as_str() < other_id
                {
                    pairs.push((id.clone(), other_id.to_string()));
                }
            }
        }
        pairs
    }

    fn link(&mut self, from: &str, to: &CalendarItem) {
        let group = self.groups.entry(from.to_string()).or_default();
        if !group.iter().any(|existing| existing.id == to.id) {
            group.push(to.clone());
        }
    }
}

fn is_candidate(item: &CalendarItem) -> bool {
    !item.is_all_day() && !item.kind.is_point_in_time() && item.id_str().is_some()
}

/// Pairwise overlap check over a day's items.
///
/// All-day items, reminders, deadlines and items without an id never
/// conflict. A pair whose key is in `ignore` is skipped in both
/// directions. An empty `user_id` matches no ignore keys.
#[tracing::instrument(skip(items, ignore), fields(items = items.len(), ignored = ignore.len()))]
pub fn detect_conflicts(
    items: &[CalendarItem],
    ignore: &IgnoreSet,
    user_id: &str,
) -> ConflictReport {
    let candidates: Vec<&CalendarItem> = items.iter().filter(|item| is_candidate(item)).collect();
    let mut report = ConflictReport::default();

    for (i, first) in candidates.iter().enumerate() {
        for second in &candidates[i + 1..] {
            let (Some(a), Some(b)) = (first.id_str(), second.id_str()) else {
                continue;
            };
            if a == b || !first.overlaps(second) {
                continue;
            }
            if !user_id.is_empty() && ignore.contains(&ConflictIgnoreKey::new(user_id, a, b)) {
                trace!(first = %a, second = %b, "conflict ignored");
                continue;
            }

            report.conflicted.insert(a.to_string());
            report.conflicted.insert(b.to_string());
            report.link(a, second);
            report.link(b, first);
        }
    }

    if !report.is_empty() {
        debug!(conflicted = report.conflicted.len(), "conflicts detected");
    }
    report
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

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
            kind: ItemKind::Event,
            priority: Priority::None,
            source: SourceRef {
                entity: EntityKind::Event,
                position: 0,
                entity_id: Some(id.to_string()),
                slot: None,
                occurrence: 0,
            },
        }
    }

    fn group_ids(report: &ConflictReport, id: &str) -> Vec<String> {
        report
            .groups
            .get(id)
            .map(|items| items.iter().filter_map(|item| item.id.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn key_is_order_independent() {
        let ab = ConflictIgnoreKey::new("u1", "a", "b");
        let ba = ConflictIgnoreKey::new("u1", "b", "a");
        assert_eq!(ab, ba);
        assert_eq!(ab.to_string(), "u1_a_b");
    }

    #[test]
    fn overlapping_pair_is_reported_both_ways() {
        let items = vec![block("a", (9, 0), (10, 0)), block("b", (9, 30), (11, 0))];
        let report = detect_conflicts(&items, &IgnoreSet::new(), "u1");

        assert!(report.has_conflict("a"));
        assert!(report.has_conflict("b"));
        assert_eq!(group_ids(&report, "a"), vec!["b"]);
        assert_eq!(group_ids(&report, "b"), vec!["a"]);
        assert_eq!(report.pairs(), vec![("a".to_string(), "b".to_string())]);
    }

    #[test]
    fn back_to_back_is_not_a_conflict() {
        let items = vec![block("a", (9, 0), (10, 0)), block("b", (10, 0), (11, 0))];
        assert!(detect_conflicts(&items, &IgnoreSet::new(), "u1").is_empty());
    }

    #[test]
    fn ignored_pair_is_suppressed_in_both_directions() {
        let items = vec![
            block("a", (9, 0), (10, 0)),
            block("b", (9, 30), (11, 0)),
            block("c", (9, 45), (9, 50)),
        ];
        let ignore: IgnoreSet = [ConflictIgnoreKey::new("u1", "b", "a")].into_iter().collect();
        let report = detect_conflicts(&items, &ignore, "u1");

        assert!(!group_ids(&report, "a").contains(&"b".to_string()));
        assert!(!group_ids(&report, "b").contains(&"a".to_string()));
        assert_eq!(group_ids(&report, "c"), vec!["a", "b"]);
    }

    #[test]
    fn ignore_keys_are_per_user() {
        let items = vec![block("a", (9, 0), (10, 0)), block("b", (9, 30), (11, 0))];
        let ignore: IgnoreSet = [ConflictIgnoreKey::new("u1", "a", "b")].into_iter().collect();

        assert!(detect_conflicts(&items, &ignore, "u1").is_empty());
        assert!(!detect_conflicts(&items, &ignore, "u2").is_empty());
        assert!(!detect_conflicts(&items, &ignore, "").is_empty());
    }

    #[test]
    fn non_candidates_never_conflict() {
        let mut all_day = block("all", (0, 0), (23, 0));
        all_day.timing = Timing::AllDay {
            first: NaiveDate::from_ymd_opt(2024, 1, 8).expect("valid date"),
            until: None,
        };
        let mut reminder = block("ping", (9, 15), (9, 45));
        reminder.kind = ItemKind::Reminder;
        reminder.timing = Timing::PointInTime;
        let mut anonymous = block("anon", (9, 0), (10, 0));
        anonymous.id = None;

        let items = vec![block("a", (9, 0), (10, 0)), all_day, reminder, anonymous];
        assert!(detect_conflicts(&items, &IgnoreSet::new(), "u1").is_empty());
    }

    #[test]
    fn resolutions_keep_only_ignored_records_of_the_user() {
        let records = vec![
            ResolutionRecord {
                user_id: "u1".to_string(),
                item1_id: "b".to_string(),
                item2_id: "a".to_string(),
                resolution_type: ResolutionType::Ignored,
            },
            ResolutionRecord {
                user_id: "u1".to_string(),
                item1_id: "c".to_string(),
                item2_id: "d".to_string(),
                resolution_type: ResolutionType::Rescheduled,
            },
            ResolutionRecord {
                user_id: "u2".to_string(),
                item1_id: "e".to_string(),
                item2_id: "f".to_string(),
                resolution_type: ResolutionType::Ignored,
            },
        ];
        let ignore = IgnoreSet::from_resolutions(&records, "u1");
        assert_eq!(ignore.len(), 1);
        assert!(ignore.contains(&ConflictIgnoreKey::new("u1", "a", "b")));
    }

    #[test]
    fn groups_are_deduplicated() {
        let mut report = ConflictReport::default();
        let b = block("b", (9, 0), (10, 0));
        report.link("a", &b);
        report.link("a", &b);
        assert_eq!(group_ids(&report, "a"), vec!["b"]);
    }
}
