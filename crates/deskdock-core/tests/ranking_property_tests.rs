//! Property-based tests for ranking, top-set selection and chunk planning
//!
//! These tests verify the invariants the sync worker relies on: ranking is a pure
//! function of its inputs, the top set is a duplicate-free prefix of the ranking, and a
//! chunked payload reassembles to the original bytes.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use deskdock_core::{
    detect_new_apps, rank, recency_score, top_set, AppEntry, ChunkPlan, RankingConfig, Registry,
};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn reference_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 8, 22)
        .unwrap()
        .and_hms_opt(18, 0, 0)
        .unwrap()
}

/// Generate an arbitrary friendly name
fn arb_name() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-zA-Z][a-zA-Z0-9 _]{0,15}").unwrap()
}

/// Generate an arbitrary entry; `last_run` is up to 30 days in the past, or absent
fn arb_entry() -> impl Strategy<Value = AppEntry> {
    (arb_name(), 0u64..500, prop::option::of(0i64..(30 * 24 * 60))).prop_map(
        |(name, times_run, minutes_ago)| AppEntry {
            exe_path: format!("/opt/{name}"),
            friendly_name: name.clone(),
            icon_bin: PathBuf::from(format!("{name}.bin")),
            icon_png: None,
            times_run,
            last_run: minutes_ago.map(|m| reference_now() - Duration::minutes(m)),
            score: 0.0,
        },
    )
}

fn arb_registry() -> impl Strategy<Value = Registry> {
    prop::collection::vec(arb_entry(), 0..40).prop_map(|entries| {
        let mut registry = Registry::new();
        for entry in entries {
            registry.insert(entry);
        }
        registry
    })
}

// ----------------------------------------------------------------------------
// Properties
// ----------------------------------------------------------------------------

proptest! {
    /// Property: ranking the same registry twice yields identical order and scores
    #[test]
    fn ranking_is_deterministic(registry in arb_registry()) {
        let config = RankingConfig::default();
        let first = rank(&registry, reference_now(), &config);
        let second = rank(&registry.clone(), reference_now(), &config);
        prop_assert_eq!(first, second);
    }

    /// Property: scores never increase along the ranking, equal scores are alphabetical
    #[test]
    fn ranking_is_sorted(registry in arb_registry()) {
        let ranked = rank(&registry, reference_now(), &RankingConfig::default());
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                prop_assert!(pair[0].friendly_name < pair[1].friendly_name);
            }
        }
    }

    /// Property: the top set has min(N, |registry|) distinct names, all from the registry
    #[test]
    fn top_set_is_bounded_subset(registry in arb_registry(), n in 0usize..20) {
        let ranked = rank(&registry, reference_now(), &RankingConfig::default());
        let top = top_set(&ranked, n);

        prop_assert_eq!(top.names.len(), n.min(registry.len()));
        let unique: HashSet<&String> = top.names.iter().collect();
        prop_assert_eq!(unique.len(), top.names.len());
        for name in &top.names {
            prop_assert!(registry.contains(name));
        }
    }

    /// Property: detection returns exactly the added keys, sorted
    #[test]
    fn detection_finds_added_keys(
        base in prop::collection::btree_set(arb_name(), 0..20),
        added in prop::collection::btree_set(arb_name(), 0..10),
    ) {
        let current: BTreeSet<String> = base.union(&added).cloned().collect();
        let expected: Vec<String> = added.difference(&base).cloned().collect();
        prop_assert_eq!(detect_new_apps(&base, &current), expected);
    }

    /// Property: concatenated chunks equal the payload and the count is ceil(len / size)
    #[test]
    fn chunks_reassemble_payload(
        payload in prop::collection::vec(any::<u8>(), 0..5000),
        chunk_size in 1usize..1024,
    ) {
        let plan = ChunkPlan::new(&payload, chunk_size);
        let reassembled: Vec<u8> = plan.chunks().flatten().copied().collect();

        prop_assert_eq!(&reassembled, &payload);
        prop_assert_eq!(plan.chunk_count(), payload.len().div_ceil(chunk_size));
        prop_assert_eq!(plan.chunks().count(), plan.chunk_count());
    }
}

// ----------------------------------------------------------------------------
// Boundary Cases
// ----------------------------------------------------------------------------

#[test]
fn test_exactly_one_day_scores_five() {
    let now = reference_now();
    assert_eq!(recency_score(Some(now - Duration::days(1)), now), 5.0);
    assert_eq!(
        recency_score(Some(now - Duration::days(1) + Duration::seconds(1)), now),
        10.0
    );
}

#[test]
fn test_top_set_of_small_registry() {
    let mut registry = Registry::new();
    for (name, runs) in [("code", 10), ("vlc", 3), ("gimp", 7)] {
        registry.insert(AppEntry {
            exe_path: format!("/usr/bin/{name}"),
            friendly_name: name.to_string(),
            icon_bin: PathBuf::from(format!("{name}.bin")),
            icon_png: None,
            times_run: runs,
            last_run: None,
            score: 0.0,
        });
    }

    let ranked = rank(&registry, reference_now(), &RankingConfig::default());
    let top = top_set(&ranked, 12);
    assert_eq!(top.names, vec!["code", "gimp", "vlc"]);
}
