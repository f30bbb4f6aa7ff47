//! Scoring
//!
//! Cumulative scores of every participant. Scores survive between rounds
//! and are dropped when a participant disconnects.

use std::collections::HashMap;

use itertools::Itertools;

use super::watcher::Id;

/// Cumulative score of every participant
#[derive(Debug, Default)]
pub struct Leaderboard {
    scores: HashMap<Id, u64>,
}

impl Leaderboard {
    /// Adds points to a participant's total
    pub fn add_points(&mut self, id: Id, points: u64) {
        let score = self.scores.entry(id).or_default();
        *score = score.saturating_add(points);
    }

    /// The participant's total, zero if it never scored
    pub fn score(&self, id: Id) -> u64 {
        self.scores.get(&id).copied().unwrap_or_default()
    }

    /// Forgets a participant's total
    pub fn remove(&mut self, id: Id) {
        self.scores.remove(&id);
    }

    /// All totals, highest first
    pub fn standings(&self) -> Vec<(Id, u64)> {
        self.scores
            .iter()
            .map(|(id, points)| (*id, *points))
            .sorted_by_key(|(_, points)| *points)
            .rev()
            .collect_vec()
    }
}
