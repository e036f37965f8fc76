use chess::{BoardStatus, Color};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::backend::{AnalysisResult, AnalyzerFactory, BackendKind, PovScore, Score};
use crate::backend_error;
use crate::coordinator::{AnalysisPool, JobId};
use crate::errors::{AnalysisError, Result};
use crate::position::Position;

/// A move the engine preferred, with its loss against the best line (≤ 0).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hint {
    pub uci: String,
    pub delta: i32,
}

/// How the played move compares to the engine's recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveQuality {
    /// Score lost by the played move, in centipawns from the mover's view; never
    /// positive. `None` when the move left the opening book from a book position,
    /// where there is no engine score to compare against.
    pub delta: Option<i32>,
    pub hints: Vec<Hint>,
}

struct EvaluationJobs {
    /// `None` when hints and baseline share one job (a single hint)
    hints: Option<JobId>,
    baseline: JobId,
    current: JobId,
}

/// Scores one played move by correlating three analysis jobs.
///
/// The previous position is analysed for hints and for the best achievable
/// score, the current position for the score actually reached. All scores
/// are read from the point of view of the player who made the move.
pub struct MoveEvaluator<'a, F: AnalyzerFactory> {
    pool: &'a AnalysisPool<F>,
    position: Position,
    previous: Position,
    played_move: String,
    pov: Color,
    backend: BackendKind,
    time_budget: Duration,
    n_hints: usize,
    jobs: Option<EvaluationJobs>,
}

impl<'a, F: AnalyzerFactory + 'static> MoveEvaluator<'a, F> {
    pub fn new(
        pool: &'a AnalysisPool<F>,
        position: &Position,
        backend: BackendKind,
        time_budget: Duration,
        n_hints: usize,
    ) -> Result<Self> {
        let (played_move, previous) = position.split_last().ok_or_else(|| {
            AnalysisError::InvalidPosition("no move has been played yet".to_string())
        })?;
        let pov = previous.side_to_move();

        Ok(Self {
            pool,
            position: position.clone(),
            previous,
            played_move,
            pov,
            backend,
            time_budget,
            n_hints,
            jobs: None,
        })
    }

    /// Submit the evaluation jobs right away instead of on first [`result`](Self::result).
    pub fn with_instant_submit(mut self, instant: bool) -> Result<Self> {
        if instant {
            self.submit_jobs()?;
        }
        Ok(self)
    }

    pub fn played_move(&self) -> &str {
        &self.played_move
    }

    pub fn previous_position(&self) -> &Position {
        &self.previous
    }

    /// Side whose move is being judged.
    pub fn point_of_view(&self) -> Color {
        self.pov
    }

    /// Submit the hint, baseline and current-position jobs. Idempotent until
    /// the result is taken.
    pub fn submit_jobs(&mut self) -> Result<()> {
        if self.jobs.is_some() {
            return Ok(());
        }

        let hints = self
            .pool
            .submit(&self.previous, self.backend, self.time_budget, self.n_hints)?;
        let baseline = match self.pool.submit(&self.previous, self.backend, self.time_budget, 1) {
            Ok(id) => id,
            Err(e) => {
                self.pool.discard(&hints);
                return Err(e);
            }
        };
        let current = match self.pool.submit(&self.position, self.backend, self.time_budget, 1) {
            Ok(id) => id,
            Err(e) => {
                self.pool.discard(&hints);
                self.pool.discard(&baseline);
                return Err(e);
            }
        };

        debug!(position = %self.position, played = %self.played_move, "Evaluation jobs submitted");
        self.jobs = Some(EvaluationJobs {
            hints: (hints != baseline).then_some(hints),
            baseline,
            current,
        });
        Ok(())
    }

    /// Pre-warm the pool for the position the player will move from next.
    pub fn submit_jobs_in_advance(&self, next: &Position) -> Result<()> {
        self.pool
            .submit(next, self.backend, self.time_budget, self.n_hints)?;
        self.pool.submit(next, self.backend, self.time_budget, 1)?;
        debug!(position = %next, "Evaluation jobs submitted in advance");
        Ok(())
    }

    /// Wait for the jobs and compute the move quality.
    ///
    /// Submits the jobs first if that has not happened yet. Every job is
    /// retrieved before any failure is reported, so nothing is left
    /// registered in the pool. Each call consumes the submitted jobs; a later
    /// call runs a fresh round.
    pub fn result(&mut self) -> Result<MoveQuality> {
        self.submit_jobs()?;
        let jobs = match self.jobs.take() {
            Some(jobs) => jobs,
            None => return Err(AnalysisError::JobNotFound(self.position.to_string())),
        };

        let baseline = self.pool.await_result(&jobs.baseline);
        let current = self.pool.await_result(&jobs.current);
        let hints = jobs.hints.as_ref().map(|id| self.pool.await_result(id));

        let baseline = baseline?;
        let current = current?;
        let hints = match hints {
            Some(hints) => hints?,
            None => baseline.clone(),
        };

        let best_score = best_score(&baseline, &self.previous, self.pov)?;
        let current_score = best_score_or_terminal(&current, &self.position, self.pov)?;

        let delta = match (current_score, best_score) {
            (Some(current), Some(best)) => Some((current - best).min(0)),
            // Book baseline: a book continuation is as good as the book gets
            _ if self.is_book_move() => Some(0),
            _ => None,
        };

        let hints = hints
            .candidates
            .iter()
            .map(|candidate| {
                let delta = match (candidate.score, best_score) {
                    (Some(score), Some(best)) => (score.pov(self.pov) - best).min(0),
                    _ => 0,
                };
                Hint {
                    uci: candidate.pv.first().cloned().unwrap_or_else(|| candidate.uci.clone()),
                    delta,
                }
            })
            .collect();

        Ok(MoveQuality { delta, hints })
    }

    /// Whether the opening book continues the previous position with the played move.
    fn is_book_move(&self) -> bool {
        self.pool
            .book()
            .is_some_and(|book| book.find(&self.previous).contains(&self.played_move))
    }
}

impl<F: AnalyzerFactory> Drop for MoveEvaluator<'_, F> {
    /// Jobs whose result was never taken are released from the pool.
    fn drop(&mut self) {
        if let Some(jobs) = self.jobs.take() {
            if let Some(hints) = &jobs.hints {
                self.pool.discard(hints);
            }
            self.pool.discard(&jobs.baseline);
            self.pool.discard(&jobs.current);
        }
    }
}

/// Best candidate's score from `pov`, `None` for unscored (book) results.
fn best_score(result: &AnalysisResult, position: &Position, pov: Color) -> Result<Option<i32>> {
    match result.best() {
        Some(candidate) => Ok(candidate.score.map(|score| score.pov(pov))),
        None => Err(backend_error!("no candidate moves for '{}'", position)),
    }
}

/// Like [`best_score`], but a finished game is scored from its outcome.
fn best_score_or_terminal(
    result: &AnalysisResult,
    position: &Position,
    pov: Color,
) -> Result<Option<i32>> {
    if !result.is_empty() {
        return best_score(result, position, pov);
    }
    match position.status()? {
        BoardStatus::Checkmate => {
            let mated = PovScore::new(position.side_to_move(), Score::Mate(0));
            Ok(Some(mated.pov(pov)))
        }
        BoardStatus::Stalemate => Ok(Some(0)),
        BoardStatus::Ongoing => Err(backend_error!("no candidate moves for '{}'", position)),
    }
}
