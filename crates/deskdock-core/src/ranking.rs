//! Usage-based ranking
//!
//! Pure functions over a [`Registry`] snapshot. Given the same registry, weights and "now",
//! the result is identical on every call: scores sort descending and equal scores fall back
//! to the friendly name in ascending order.

use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::config::RankingConfig;
use crate::registry::{AppEntry, Registry, TopSet};

// ----------------------------------------------------------------------------
// Scoring
// ----------------------------------------------------------------------------

/// Recency bucket from whole days since `last_run`.
///
/// Less than 1 day scores 10, less than 3 scores 5, less than 7 scores 2, anything older
/// or a missing timestamp scores 0. A timestamp in the future counts as "today".
pub fn recency_score(last_run: Option<NaiveDateTime>, now: NaiveDateTime) -> f64 {
    let Some(last_run) = last_run else {
        return 0.0;
    };
    let days = (now - last_run).num_days();
    if days < 1 {
        10.0
    } else if days < 3 {
        5.0
    } else if days < 7 {
        2.0
    } else {
        0.0
    }
}

/// `times_run * alpha + recency * beta`
pub fn score(entry: &AppEntry, now: NaiveDateTime, config: &RankingConfig) -> f64 {
    entry.times_run as f64 * config.alpha + recency_score(entry.last_run, now) * config.beta
}

/// One registry entry with its derived score
#[derive(Debug, Clone, PartialEq)]
pub struct RankedApp {
    pub friendly_name: String,
    pub score: f64,
}

// ----------------------------------------------------------------------------
// Ranking
// ----------------------------------------------------------------------------

/// Rank every entry by score, highest first
pub fn rank(registry: &Registry, now: NaiveDateTime, config: &RankingConfig) -> Vec<RankedApp> {
    let mut ranked: Vec<RankedApp> = registry
        .entries()
        .map(|entry| RankedApp {
            friendly_name: entry.friendly_name.clone(),
            score: score(entry, now, config),
        })
        .collect();
    ranked.sort_by(compare_ranked);
    ranked
}

/// Rank and write each derived score back into its entry
pub fn rank_and_store(
    registry: &mut Registry,
    now: NaiveDateTime,
    config: &RankingConfig,
) -> Vec<RankedApp> {
    let ranked = rank(registry, now, config);
    for app in &ranked {
        registry.set_score(&app.friendly_name, app.score);
    }
    ranked
}

/// First `n` names of a ranking
pub fn top_set(ranked: &[RankedApp], n: usize) -> TopSet {
    TopSet::new(
        ranked
            .iter()
            .take(n)
            .map(|app| app.friendly_name.clone())
            .collect(),
    )
}

fn compare_ranked(a: &RankedApp, b: &RankedApp) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.friendly_name.cmp(&b.friendly_name))
}

// ----------------------------------------------------------------------------
// New-App Detection
// ----------------------------------------------------------------------------

/// Keys present in `current` but not in `previous`, in ascending order
pub fn detect_new_apps(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Vec<String> {
    current.difference(previous).cloned().collect()
}
