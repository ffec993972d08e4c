//! Cross-phase learning index.
//!
//! Aggregates derived from correlations, keyed by directed phase pair:
//! a histogram of correlation kinds, a bounded strength history and the
//! mean of that history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Correlation;

/// Strength samples retained per phase pair.
pub const STRENGTH_HISTORY_CAP: usize = 100;

/// Aggregates for one directed phase pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairStats {
    pub kind_histogram: BTreeMap<String, u64>,
    pub strength_history: Vec<f64>,
    pub mean_strength: f64,
    /// Correlations ever observed for the pair, including ones aged out of the history
    pub observations: u64,
}

impl PairStats {
    fn observe(&mut self, correlation: &Correlation) {
        *self
            .kind_histogram
            .entry(correlation.correlation_type.clone())
            .or_insert(0) += 1;

        self.strength_history.push(correlation.strength);
        if self.strength_history.len() > STRENGTH_HISTORY_CAP {
            let excess = self.strength_history.len() - STRENGTH_HISTORY_CAP;
            self.strength_history.drain(..excess);
        }

        self.mean_strength =
            self.strength_history.iter().sum::<f64>() / self.strength_history.len() as f64;
        self.observations += 1;
    }

    /// Drop the `count` oldest observations, whose kinds are `kinds`.
    ///
    /// Observations that already aged out of the strength history only
    /// reduce the counters.
    fn forget_oldest<'a>(&mut self, count: usize, kinds: impl IntoIterator<Item = &'a str>) {
        for kind in kinds {
            if let Some(n) = self.kind_histogram.get_mut(kind) {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    self.kind_histogram.remove(kind);
                }
            }
        }

        let aged_out = (self.observations as usize).saturating_sub(self.strength_history.len());
        let in_history = count.saturating_sub(aged_out).min(self.strength_history.len());
        self.strength_history.drain(..in_history);
        self.observations = self.observations.saturating_sub(count as u64);

        if !self.strength_history.is_empty() {
            self.mean_strength =
                self.strength_history.iter().sum::<f64>() / self.strength_history.len() as f64;
        }
    }

    /// Most frequent correlation kind (ties resolved alphabetically).
    pub fn dominant_kind(&self) -> Option<&str> {
        self.kind_histogram
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(kind, _)| kind.as_str())
    }
}

/// In-memory aggregates over every correlation seen by the model.
#[derive(Debug, Clone, Default)]
pub struct LearningIndex {
    pairs: BTreeMap<(String, String), PairStats>,
}

impl LearningIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted correlations (oldest first).
    pub fn from_correlations<'a>(correlations: impl IntoIterator<Item = &'a Correlation>) -> Self {
        let mut index = Self::new();
        for c in correlations {
            index.record(c);
        }
        index
    }

    pub fn record(&mut self, correlation: &Correlation) {
        self.pairs
            .entry((
                correlation.source_phase.clone(),
                correlation.target_phase.clone(),
            ))
            .or_default()
            .observe(correlation);
    }

    /// Remove purged correlations from the aggregates.
    ///
    /// Purges delete the oldest rows, so each pair drops its oldest
    /// observations. Pairs left without history are removed.
    pub fn forget(&mut self, correlations: &[Correlation]) {
        let mut by_pair: BTreeMap<(String, String), Vec<&str>> = BTreeMap::new();
        for c in correlations {
            by_pair
                .entry((c.source_phase.clone(), c.target_phase.clone()))
                .or_default()
                .push(c.correlation_type.as_str());
        }

        for (pair, kinds) in by_pair {
            if let Some(stats) = self.pairs.get_mut(&pair) {
                stats.forget_oldest(kinds.len(), kinds.iter().copied());
                if stats.strength_history.is_empty() || stats.observations == 0 {
                    self.pairs.remove(&pair);
                }
            }
        }
    }

    pub fn pair(&self, source: &str, target: &str) -> Option<&PairStats> {
        self.pairs.get(&(source.to_string(), target.to_string()))
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Pairs whose target is `target`, as (source phase, stats).
    pub fn pairs_ending_at<'a>(&'a self, target: &'a str) -> impl Iterator<Item = (&'a str, &'a PairStats)> + 'a {
        self.pairs
            .iter()
            .filter(move |((_, t), _)| t == target)
            .map(|((s, _), stats)| (s.as_str(), stats))
    }

    /// Combined kind histogram over every pair ending at `target`.
    pub fn kind_histogram_for_target(&self, target: &str) -> BTreeMap<String, u64> {
        let mut histogram = BTreeMap::new();
        for (_, stats) in self.pairs_ending_at(target) {
            for (kind, count) in &stats.kind_histogram {
                *histogram.entry(kind.clone()).or_insert(0) += count;
            }
        }
        histogram
    }

    /// Mean strength as a source → target → strength map.
    pub fn strength_map(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut map: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for ((source, target), stats) in &self.pairs {
            map.entry(source.clone())
                .or_default()
                .insert(target.clone(), stats.mean_strength);
        }
        map
    }
}
