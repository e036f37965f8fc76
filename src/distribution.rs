use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::Result;
use crate::position::Position;

/// How often each next move was played from one position.
///
/// Moves that were never played are absent, so an empty distribution means the
/// position has no recorded continuation. Ordered by move for deterministic
/// iteration and serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveDistribution {
    counts: BTreeMap<String, u64>,
}

impl MoveDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` more occurrences of `uci_move`. Zero counts are ignored.
    pub fn add(&mut self, uci_move: impl Into<String>, count: u64) {
        if count > 0 {
            *self.counts.entry(uci_move.into()).or_insert(0) += count;
        }
    }

    pub fn get(&self, uci_move: &str) -> u64 {
        self.counts.get(uci_move).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Fraction of all occurrences taken by `uci_move`, 0 for an empty distribution.
    pub fn share(&self, uci_move: &str) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.get(uci_move) as f64 / total as f64
        }
    }

    /// Moves by decreasing count, ties broken alphabetically.
    pub fn ranked(&self) -> Vec<(&str, u64)> {
        let mut ranked: Vec<(&str, u64)> = self
            .counts
            .iter()
            .map(|(mv, count)| (mv.as_str(), *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(mv, count)| (mv.as_str(), *count))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for MoveDistribution {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        let mut distribution = MoveDistribution::new();
        for (mv, count) in iter {
            distribution.add(mv, count);
        }
        distribution
    }
}

/// Source of next-move frequencies over a corpus of games.
///
/// Implementations may be slow (a database scan); callers cache the results.
pub trait MoveStatistics: Send + Sync {
    fn next_move_distribution(&self, position: &Position) -> Result<MoveDistribution>;
}
