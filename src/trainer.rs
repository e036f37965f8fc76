use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::backend::{AnalyzerFactory, BackendKind};
use crate::config::TrainerConfig;
use crate::coordinator::AnalysisPool;
use crate::distribution::{MoveDistribution, MoveStatistics};
use crate::evaluator::{Hint, MoveEvaluator};
use crate::errors::Result;
use crate::explorer::Explorer;
use crate::position::Position;

/// Answer to one training move: the opponent's reply and the verdict on the
/// player's last move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainerReply {
    /// `None` when the session is over
    pub sample_move: Option<String>,
    pub best_prev_moves: Vec<Hint>,
    pub prev_move_diff: Option<i32>,
}

impl TrainerReply {
    /// Terminal reply with no evaluation attached.
    pub fn finish() -> Self {
        Self {
            sample_move: None,
            best_prev_moves: Vec::new(),
            prev_move_diff: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.sample_move.is_none()
    }
}

/// Plays the corpus' replies against a player and grades their moves.
pub struct Trainer<'a, S: MoveStatistics, F: AnalyzerFactory> {
    explorer: &'a Explorer<S>,
    pool: &'a AnalysisPool<F>,
    config: TrainerConfig,
}

impl<'a, S, F> Trainer<'a, S, F>
where
    S: MoveStatistics + 'static,
    F: AnalyzerFactory + 'static,
{
    pub fn new(
        explorer: &'a Explorer<S>,
        pool: &'a AnalysisPool<F>,
        config: TrainerConfig,
    ) -> Self {
        Self {
            explorer,
            pool,
            config,
        }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Grade the player's last move in `position` and sample a reply.
    ///
    /// Moves up to the first `training_move` are not graded. The session
    /// finishes when the corpus has no reply or the sampled reply was played
    /// fewer than `min_occurrences` times.
    pub fn next_move(
        &self,
        position: &Position,
        backend: BackendKind,
        time_budget: Duration,
        training_move: u32,
    ) -> Result<TrainerReply> {
        let grade = training_move > 1;
        let mut evaluator = if grade {
            Some(
                MoveEvaluator::new(self.pool, position, backend, time_budget, self.config.n_hints)?
                    .with_instant_submit(true)?,
            )
        } else {
            None
        };

        // On failure the evaluator's jobs are released when it is dropped
        let distribution = self.explorer.submit_and_await(position)?;

        let (prev_move_diff, best_prev_moves) = match evaluator.as_mut() {
            Some(evaluator) => {
                let quality = evaluator.result()?;
                (quality.delta, quality.hints)
            }
            None => (None, Vec::new()),
        };

        let finish = TrainerReply {
            sample_move: None,
            best_prev_moves,
            prev_move_diff,
        };

        let Some((reply, occurrences)) =
            sample_move(&distribution, self.config.sample_threshold, &mut thread_rng())
        else {
            info!(position = %position, "No moves found, finishing game");
            return Ok(finish);
        };

        info!(position = %position, reply = %reply, occurrences, "Explorer move");
        if occurrences < self.config.min_occurrences {
            info!(position = %position, "Not enough occurrences, finishing game");
            return Ok(finish);
        }

        let next = position.push(&reply);
        match &evaluator {
            Some(evaluator) => evaluator.submit_jobs_in_advance(&next)?,
            None => {
                self.pool.submit(&next, backend, time_budget, self.config.n_hints)?;
                self.pool.submit(&next, backend, time_budget, 1)?;
            }
        }

        Ok(TrainerReply {
            sample_move: Some(reply),
            ..finish
        })
    }
}

/// Draw a move with probability proportional to its count.
///
/// Only moves holding at least `threshold` of all occurrences take part,
/// unless none does, in which case every move does. Returns the move and its
/// count, or `None` for an empty distribution.
pub fn sample_move<R: Rng + ?Sized>(
    distribution: &MoveDistribution,
    threshold: f64,
    rng: &mut R,
) -> Option<(String, u64)> {
    let total = distribution.total();
    if total == 0 {
        return None;
    }

    let mut candidates: Vec<(&str, u64)> = distribution
        .iter()
        .filter(|(_, count)| *count as f64 / total as f64 >= threshold)
        .collect();
    if candidates.is_empty() {
        candidates = distribution.iter().collect();
    }

    let weights = WeightedIndex::new(candidates.iter().map(|(_, count)| *count)).ok()?;
    let (mv, count) = candidates[weights.sample(rng)];
    Some((mv.to_string(), count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    #[test]
    fn test_sample_from_empty_distribution() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(sample_move(&MoveDistribution::new(), 0.05, &mut rng).is_none());
    }

    #[test]
    fn test_sample_respects_threshold() {
        let distribution: MoveDistribution = [("e2e4", 60), ("d2d4", 38), ("a2a3", 2)]
            .into_iter()
            .collect();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let (mv, count) = sample_move(&distribution, 0.05, &mut rng).unwrap();
            assert_ne!(mv, "a2a3");
            assert_eq!(count, distribution.get(&mv));
        }
    }

    #[test]
    fn test_sample_falls_back_to_all_moves() {
        let distribution: MoveDistribution = [("e2e4", 1), ("d2d4", 1)].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(1);
        let (mv, _) = sample_move(&distribution, 0.9, &mut rng).unwrap();
        assert!(mv == "e2e4" || mv == "d2d4");
    }

    #[test]
    fn test_finish_reply() {
        let reply = TrainerReply::finish();
        assert!(reply.is_finished());
        assert!(reply.best_prev_moves.is_empty());
        assert_eq!(reply.prev_move_diff, None);
    }
}
