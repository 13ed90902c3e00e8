//! Degradation tiers applied when a recipe write does not fit the quota.
//!
//! Each tier is a pure function of the stored record set (newest first) and
//! the incoming record id. It describes which records lose their primary
//! image and which are evicted; the repository applies the plan and retries
//! the write. Tiers are cumulative: a later tier includes everything an
//! earlier one would have done.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    /// Previously stored records that keep their primary image in tier A.
    pub keep_full_newest: usize,
    /// Previously stored records that survive tier C.
    pub truncate_to: usize,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            keep_full_newest: 3,
            truncate_to: 5,
        }
    }
}

/// What the planner needs to know about one stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    pub id: String,
    pub saved_at: i64,
    pub has_primary_image: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Degradation {
    /// Stored records whose primary image is dropped (thumbnail kept).
    pub strip_primary: Vec<String>,
    /// Stored records deleted outright.
    pub evict: Vec<String>,
    /// Whether the record being written loses its primary image.
    pub strip_incoming_primary: bool,
}

impl Degradation {
    pub fn is_noop(&self) -> bool {
        self.strip_primary.is_empty() && self.evict.is_empty() && !self.strip_incoming_primary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// A: strip primary images from older records, keep the newest few intact.
    KeepNewestFull,
    /// B: A, plus strip the incoming record's primary image.
    DropIncomingPrimary,
    /// C: keep only the newest few records, all without primary images.
    Truncate,
}

impl Tier {
    pub const ORDER: [Tier; 3] = [Tier::KeepNewestFull, Tier::DropIncomingPrimary, Tier::Truncate];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::KeepNewestFull => "keep_newest_full",
            Tier::DropIncomingPrimary => "drop_incoming_primary",
            Tier::Truncate => "truncate",
        }
    }

    pub fn plan(
        self,
        records: &[RecordMeta],
        incoming_id: &str,
        policy: &QuotaPolicy,
    ) -> Degradation {
        let previous = newest_first(records, incoming_id);
        match self {
            Tier::KeepNewestFull => Degradation {
                strip_primary: stripped_after(&previous, policy.keep_full_newest),
                ..Degradation::default()
            },
            Tier::DropIncomingPrimary => Degradation {
                strip_primary: stripped_after(&previous, policy.keep_full_newest),
                strip_incoming_primary: true,
                ..Degradation::default()
            },
            Tier::Truncate => {
                let keep = policy.truncate_to.min(previous.len());
                Degradation {
                    strip_primary: stripped_after(&previous[..keep], 0),
                    evict: previous[keep..].iter().map(|r| r.id.clone()).collect(),
                    strip_incoming_primary: true,
                }
            }
        }
    }
}

/// Stored records other than the incoming one, newest first. Ties on
/// `saved_at` are broken by id so the order is total.
fn newest_first<'a>(records: &'a [RecordMeta], incoming_id: &str) -> Vec<&'a RecordMeta> {
    let mut previous: Vec<&RecordMeta> = records.iter().filter(|r| r.id != incoming_id).collect();
    previous.sort_by(|a, b| b.saved_at.cmp(&a.saved_at).then_with(|| b.id.cmp(&a.id)));
    previous
}

fn stripped_after(previous: &[&RecordMeta], keep: usize) -> Vec<String> {
    previous
        .iter()
        .skip(keep)
        .filter(|r| r.has_primary_image)
        .map(|r| r.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, saved_at: i64, has_primary_image: bool) -> RecordMeta {
        RecordMeta {
            id: id.to_string(),
            saved_at,
            has_primary_image,
        }
    }

    fn sample() -> Vec<RecordMeta> {
        vec![
            meta("a", 100, true),
            meta("b", 200, true),
            meta("c", 300, false),
            meta("d", 400, true),
            meta("e", 500, true),
        ]
    }

    #[test]
    fn tier_a_strips_oldest_beyond_keep_count() {
        let policy = QuotaPolicy {
            keep_full_newest: 2,
            truncate_to: 5,
        };
        let plan = Tier::KeepNewestFull.plan(&sample(), "new", &policy);
        // e and d are kept; c has nothing to strip.
        assert_eq!(plan.strip_primary, vec!["b".to_string(), "a".to_string()]);
        assert!(plan.evict.is_empty());
        assert!(!plan.strip_incoming_primary);
    }

    #[test]
    fn tier_b_adds_incoming_record() {
        let plan = Tier::DropIncomingPrimary.plan(&sample(), "new", &QuotaPolicy::default());
        assert_eq!(plan.strip_primary, vec!["b".to_string(), "a".to_string()]);
        assert!(plan.strip_incoming_primary);
        assert!(plan.evict.is_empty());
    }

    #[test]
    fn tier_c_evicts_oldest_and_strips_survivors() {
        let policy = QuotaPolicy {
            keep_full_newest: 3,
            truncate_to: 2,
        };
        let plan = Tier::Truncate.plan(&sample(), "new", &policy);
        assert_eq!(plan.evict, vec!["c".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(plan.strip_primary, vec!["e".to_string(), "d".to_string()]);
        assert!(plan.strip_incoming_primary);
    }

    #[test]
    fn incoming_record_is_never_planned_against() {
        let plan = Tier::Truncate.plan(
            &sample(),
            "a",
            &QuotaPolicy {
                keep_full_newest: 0,
                truncate_to: 0,
            },
        );
        assert!(!plan.evict.contains(&"a".to_string()));
        assert!(!plan.strip_primary.contains(&"a".to_string()));
        assert_eq!(plan.evict.len(), 4);
    }

    #[test]
    fn ties_on_saved_at_are_ordered_by_id() {
        let records = vec![meta("x", 10, true), meta("y", 10, true), meta("z", 10, true)];
        let plan = Tier::KeepNewestFull.plan(
            &records,
            "new",
            &QuotaPolicy {
                keep_full_newest: 1,
                truncate_to: 5,
            },
        );
        assert_eq!(plan.strip_primary, vec!["y".to_string(), "x".to_string()]);
    }

    #[test]
    fn small_record_sets_produce_noop_tier_a() {
        let plan = Tier::KeepNewestFull.plan(&sample()[..2], "new", &QuotaPolicy::default());
        assert!(plan.is_noop());
    }
}
