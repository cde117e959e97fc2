//! Delete candidate ordering: eligibility filter + pluggable comparator.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::catalog::Recording;

/// Built-in candidate orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Oldest scheduled start first.
    #[default]
    Age,
    /// Lowest category delete order first, oldest first within a category.
    Category,
}

impl DeletePolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Category => "category",
        }
    }
}

impl fmt::Display for DeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "age" => Ok(Self::Age),
            "category" => Ok(Self::Category),
            other => Err(format!("expected age or category, got {other:?}")),
        }
    }
}

/// Comparator deciding which of two eligible recordings goes first.
///
/// Implementations only express the policy key; the engine applies the
/// watched-first partition before it and a deterministic tie-break after it.
pub trait CandidateOrder: Send + Sync {
    fn compare(&self, left: &Recording, right: &Recording) -> Ordering;
}

impl CandidateOrder for DeletePolicy {
    fn compare(&self, left: &Recording, right: &Recording) -> Ordering {
        match self {
            Self::Age => left.start_time().cmp(&right.start_time()),
            Self::Category => left
                .settings
                .delete_order
                .cmp(&right.settings.delete_order)
                .then_with(|| left.start_time().cmp(&right.start_time())),
        }
    }
}

/// Pure ranking over catalog snapshots.
#[derive(Debug, Clone, Copy)]
pub struct DeletePolicyEngine<O = DeletePolicy> {
    order: O,
    watched_first: bool,
}

impl DeletePolicyEngine<DeletePolicy> {
    #[must_use]
    pub const fn new(policy: DeletePolicy, watched_first: bool) -> Self {
        Self {
            order: policy,
            watched_first,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> DeletePolicy {
        self.order
    }
}

impl<O: CandidateOrder> DeletePolicyEngine<O> {
    #[must_use]
    pub const fn with_order(order: O, watched_first: bool) -> Self {
        Self {
            order,
            watched_first,
        }
    }

    #[must_use]
    pub const fn watched_first(&self) -> bool {
        self.watched_first
    }

    fn compare(&self, left: &Recording, right: &Recording) -> Ordering {
        let partition = if self.watched_first {
            right.watched.cmp(&left.watched)
        } else {
            Ordering::Equal
        };
        partition
            .then_with(|| self.order.compare(left, right))
            .then_with(|| left.start_time().cmp(&right.start_time()))
            .then_with(|| left.device_id.cmp(&right.device_id))
            .then_with(|| left.id().cmp(right.id()))
    }

    /// Eligible recordings, best victim first. Protected ones never appear.
    #[must_use]
    pub fn rank<'a>(&self, recordings: impl IntoIterator<Item = &'a Recording>) -> Vec<&'a Recording> {
        let mut ranked: Vec<&Recording> = recordings
            .into_iter()
            .filter(|rec| !rec.protected)
            .collect();
        ranked.sort_by(|left, right| self.compare(left, right));
        ranked
    }

    /// Every recording in delete order, protected ones trailing.
    #[must_use]
    pub fn listing<'a>(&self, recordings: impl IntoIterator<Item = &'a Recording>) -> Vec<&'a Recording> {
        let mut all: Vec<&Recording> = recordings.into_iter().collect();
        all.sort_by(|left, right| {
            left.protected
                .cmp(&right.protected)
                .then_with(|| self.compare(left, right))
        });
        all
    }

    /// The single next recording to delete, if any is eligible.
    #[must_use]
    pub fn next_victim<'a>(&self, recordings: impl IntoIterator<Item = &'a Recording>) -> Option<&'a Recording> {
        recordings
            .into_iter()
            .filter(|rec| !rec.protected)
            .min_by(|left, right| self.compare(left, right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Category;
    use crate::core::settings::EffectiveSettings;
    use crate::device::gateway::RawRecording;
    use proptest::prelude::*;

    fn recording(id: &str, start: i64, category: Category, watched: bool) -> Recording {
        Recording {
            device_id: "dvr".to_string(),
            raw: RawRecording {
                id: id.to_string(),
                title: id.to_string(),
                start_time: start,
                ..RawRecording::default()
            },
            category,
            settings: EffectiveSettings::for_category(category),
            watched,
            playing: false,
            recording: false,
            protected: false,
            age_secs: 0,
        }
    }

    fn ids(ranked: &[&Recording]) -> Vec<String> {
        ranked.iter().map(|rec| rec.id().to_string()).collect()
    }

    #[test]
    fn age_policy_is_oldest_first() {
        let recs = vec![
            recording("new", 300, Category::News, false),
            recording("old", 100, Category::Movie, false),
            recording("mid", 200, Category::Series, false),
        ];
        let engine = DeletePolicyEngine::new(DeletePolicy::Age, false);
        assert_eq!(ids(&engine.rank(&recs)), vec!["old", "mid", "new"]);
        assert_eq!(engine.next_victim(&recs).map(Recording::id), Some("old"));
    }

    #[test]
    fn category_policy_orders_by_delete_order_then_age() {
        let recs = vec![
            recording("movie-old", 100, Category::Movie, false),
            recording("news-new", 300, Category::News, false),
            recording("news-old", 200, Category::News, false),
            recording("series", 50, Category::Series, false),
        ];
        let engine = DeletePolicyEngine::new(DeletePolicy::Category, false);
        assert_eq!(
            ids(&engine.rank(&recs)),
            vec!["news-old", "news-new", "series", "movie-old"]
        );
    }

    #[test]
    fn configured_delete_order_overrides_default() {
        let mut movie = recording("movie", 100, Category::Movie, false);
        movie.settings.delete_order = -1;
        let recs = vec![recording("news", 50, Category::News, false), movie];
        let engine = DeletePolicyEngine::new(DeletePolicy::Category, false);
        assert_eq!(ids(&engine.rank(&recs)), vec!["movie", "news"]);
    }

    #[test]
    fn watched_first_partitions_before_policy() {
        let recs = vec![
            recording("old-unwatched", 100, Category::News, false),
            recording("new-watched", 500, Category::Special, true),
            recording("mid-watched", 300, Category::Movie, true),
        ];
        let engine = DeletePolicyEngine::new(DeletePolicy::Age, true);
        assert_eq!(
            ids(&engine.rank(&recs)),
            vec!["mid-watched", "new-watched", "old-unwatched"]
        );
    }

    #[test]
    fn protected_and_active_are_excluded() {
        let mut protected = recording("protected", 1, Category::Sport, false);
        protected.protected = true;
        let mut playing = recording("playing", 2, Category::News, false);
        playing.playing = true;
        playing.protected = true;
        let recs = vec![protected, playing, recording("ok", 3, Category::News, false)];
        let engine = DeletePolicyEngine::new(DeletePolicy::Age, false);
        assert_eq!(ids(&engine.rank(&recs)), vec!["ok"]);
    }

    #[test]
    fn empty_rank_means_no_candidate() {
        let mut only = recording("only", 1, Category::News, false);
        only.protected = true;
        let recs = vec![only];
        let engine = DeletePolicyEngine::new(DeletePolicy::Category, true);
        assert!(engine.rank(&recs).is_empty());
        assert!(engine.next_victim(&recs).is_none());
    }

    #[test]
    fn listing_keeps_protected_at_the_end() {
        let mut protected = recording("protected", 1, Category::Sport, false);
        protected.protected = true;
        let recs = vec![protected, recording("b", 5, Category::News, false)];
        let engine = DeletePolicyEngine::new(DeletePolicy::Age, false);
        assert_eq!(ids(&engine.listing(&recs)), vec!["b", "protected"]);
    }

    struct NewestFirst;

    impl CandidateOrder for NewestFirst {
        fn compare(&self, left: &Recording, right: &Recording) -> Ordering {
            right.start_time().cmp(&left.start_time())
        }
    }

    #[test]
    fn custom_comparator_plugs_in() {
        let recs = vec![
            recording("a", 1, Category::News, false),
            recording("b", 2, Category::News, false),
        ];
        let engine = DeletePolicyEngine::with_order(NewestFirst, false);
        assert_eq!(ids(&engine.rank(&recs)), vec!["b", "a"]);
    }

    #[test]
    fn policy_parses() {
        assert_eq!("Category".parse::<DeletePolicy>(), Ok(DeletePolicy::Category));
        assert!("priority".parse::<DeletePolicy>().is_err());
    }

    // ──────────────────── property tests ────────────────────

    fn arb_category() -> impl Strategy<Value = Category> {
        prop::sample::select(Category::ALL.to_vec())
    }

    fn arb_recordings() -> impl Strategy<Value = Vec<Recording>> {
        prop::collection::vec(
            (
                0i64..1_000,
                arb_category(),
                -3i32..8,
                any::<bool>(),
                any::<bool>(),
                any::<bool>(),
                any::<bool>(),
            ),
            0..40,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (start, category, order, watched, protected, playing, recording_now))| {
                    let mut rec = recording(&format!("r{i}"), start, category, watched);
                    rec.settings.delete_order = order;
                    rec.settings.protected = protected;
                    rec.playing = playing;
                    rec.recording = recording_now;
                    rec.protected = protected || playing || recording_now;
                    rec
                })
                .collect()
        })
    }

    fn arb_policy() -> impl Strategy<Value = DeletePolicy> {
        prop_oneof![Just(DeletePolicy::Age), Just(DeletePolicy::Category)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Playing, recording or protected recordings never become candidates.
        #[test]
        fn active_recordings_never_ranked(
            recs in arb_recordings(),
            policy in arb_policy(),
            watched_first in any::<bool>(),
        ) {
            let engine = DeletePolicyEngine::new(policy, watched_first);
            for rec in engine.rank(&recs) {
                prop_assert!(!rec.playing && !rec.recording && !rec.settings.protected);
            }
            let eligible = recs.iter().filter(|rec| !rec.protected).count();
            prop_assert_eq!(engine.rank(&recs).len(), eligible);
        }

        /// Age output is non-decreasing in start time.
        #[test]
        fn age_order_is_monotonic(recs in arb_recordings()) {
            let ranked = DeletePolicyEngine::new(DeletePolicy::Age, false).rank(&recs);
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].start_time() <= pair[1].start_time());
            }
        }

        /// Category output is non-decreasing in (delete order, start time).
        #[test]
        fn category_order_is_monotonic(recs in arb_recordings()) {
            let ranked = DeletePolicyEngine::new(DeletePolicy::Category, false).rank(&recs);
            for pair in ranked.windows(2) {
                let left = (pair[0].settings.delete_order, pair[0].start_time());
                let right = (pair[1].settings.delete_order, pair[1].start_time());
                prop_assert!(left <= right);
            }
        }

        /// With watched-first, no unwatched candidate precedes a watched one.
        #[test]
        fn watched_precede_unwatched(recs in arb_recordings(), policy in arb_policy()) {
            let ranked = DeletePolicyEngine::new(policy, true).rank(&recs);
            let first_unwatched = ranked.iter().position(|rec| !rec.watched).unwrap_or(ranked.len());
            prop_assert!(ranked[first_unwatched..].iter().all(|rec| !rec.watched));
        }

        /// Ranking the same snapshot twice yields the same order.
        #[test]
        fn ranking_is_idempotent(
            recs in arb_recordings(),
            policy in arb_policy(),
            watched_first in any::<bool>(),
        ) {
            let engine = DeletePolicyEngine::new(policy, watched_first);
            prop_assert_eq!(ids(&engine.rank(&recs)), ids(&engine.rank(&recs)));
            prop_assert_eq!(
                engine.next_victim(&recs).map(|rec| rec.id().to_string()),
                engine.rank(&recs).first().map(|rec| rec.id().to_string())
            );
        }
    }
}
