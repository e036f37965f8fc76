//! Deduplicated, concurrent execution of analysis requests.
//!
//! Callers submit requests and later await them by id, a future/promise
//! contract over a fixed worker pool. Requests with the same
//! [`JobKey`] share one job while it is registered, and each job's result is
//! handed out exactly once.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::{
    AnalysisResult, AnalyzerFactory, BackendKind, CandidateMove, EngineFactory, ResultSource,
};
use crate::config::AnalysisConfig;
use crate::config_error;
use crate::errors::{AnalysisError, Result};
use crate::opening_book::OpeningBook;
use crate::position::Position;
use crate::utils::{Promise, PromiseStatus, WorkerPool};

/// Deduplication identity of an analysis request.
///
/// The time budget is deliberately not part of the key: a request for the
/// same position, backend and breadth joins the registered job whatever its
/// budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub position: Position,
    pub backend: BackendKind,
    /// Number of top candidates requested
    pub breadth: usize,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.backend, self.breadth, self.position)
    }
}

/// Handle returned by [`AnalysisPool::submit`].
///
/// The serial distinguishes successive registrations of the same key, so an
/// id kept around after its result was retrieved never picks up a later job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
    key: JobKey,
    serial: u64,
}

impl JobId {
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.key, self.serial)
    }
}

/// Observable state of a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running,
    Completed,
    Failed,
}

struct Registered {
    serial: u64,
    promise: Promise<AnalysisResult>,
}

struct JobContext<F> {
    factory: F,
    book: Option<OpeningBook>,
}

/// Job coordinator: a fixed worker pool plus a registry of pending jobs.
pub struct AnalysisPool<F: AnalyzerFactory = EngineFactory> {
    context: Arc<JobContext<F>>,
    registry: DashMap<JobKey, Registered>,
    workers: WorkerPool,
    next_serial: AtomicU64,
}

impl AnalysisPool<EngineFactory> {
    /// Build a pool that launches real engine processes, loading the book if configured.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let book = config
            .book_path
            .as_ref()
            .map(OpeningBook::from_file)
            .transpose()?;
        Self::new(config.num_workers, book, EngineFactory::new(config))
    }
}

impl<F: AnalyzerFactory + 'static> AnalysisPool<F> {
    pub fn new(num_workers: usize, book: Option<OpeningBook>, factory: F) -> Result<Self> {
        let workers = WorkerPool::new("ChessWorker", num_workers)?;
        info!(
            workers = num_workers,
            book_lines = book.as_ref().map_or(0, OpeningBook::len),
            "Chess analysis pool initialized"
        );

        Ok(Self {
            context: Arc::new(JobContext { factory, book }),
            registry: DashMap::new(),
            workers,
            next_serial: AtomicU64::new(1),
        })
    }

    pub fn book(&self) -> Option<&OpeningBook> {
        self.context.book.as_ref()
    }

    pub fn factory(&self) -> &F {
        &self.context.factory
    }

    pub fn num_workers(&self) -> usize {
        self.workers.size()
    }

    /// Register a job, or join the one already registered for the same key.
    ///
    /// Never blocks on analysis. Invalid breadth or time budget is reported
    /// here, synchronously.
    pub fn submit(
        &self,
        position: &Position,
        backend: BackendKind,
        time_budget: Duration,
        breadth: usize,
    ) -> Result<JobId> {
        if breadth == 0 {
            return Err(config_error!("Breadth must be at least 1"));
        }
        if time_budget.is_zero() {
            return Err(config_error!("Time budget must be positive"));
        }

        let key = JobKey {
            position: position.clone(),
            backend,
            breadth,
        };

        match self.registry.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let id = JobId {
                    key,
                    serial: entry.get().serial,
                };
                debug!(job = %id, "Job already submitted, reusing it");
                Ok(id)
            }
            Entry::Vacant(entry) => {
                let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
                let context = Arc::clone(&self.context);
                let job_key = key.clone();
                let promise = self
                    .workers
                    .spawn(move || run_analysis(&context, &job_key, time_budget))?;
                entry.insert(Registered { serial, promise });

                let id = JobId { key, serial };
                debug!(job = %id, "Job submitted");
                Ok(id)
            }
        }
    }

    /// Block until the job completes, unregister it and return its result.
    ///
    /// A job's result is delivered once: a second call with the same id, or a
    /// call with an id that was never issued, fails with
    /// [`AnalysisError::JobNotFound`]. Backend failures are re-raised here.
    pub fn await_result(&self, id: &JobId) -> Result<AnalysisResult> {
        let promise = match self.registry.get(&id.key) {
            Some(registered) if registered.serial == id.serial => registered.promise.clone(),
            _ => return Err(AnalysisError::JobNotFound(id.to_string())),
        };

        promise.wait_finished();

        // Only the caller that unregisters the job receives its outcome
        if self
            .registry
            .remove_if(&id.key, |_, registered| registered.serial == id.serial)
            .is_none()
        {
            return Err(AnalysisError::JobNotFound(id.to_string()));
        }

        promise
            .try_take()
            .unwrap_or_else(|| Err(AnalysisError::JobNotFound(id.to_string())))
    }

    pub fn submit_and_await(
        &self,
        position: &Position,
        backend: BackendKind,
        time_budget: Duration,
        breadth: usize,
    ) -> Result<AnalysisResult> {
        let id = self.submit(position, backend, time_budget, breadth)?;
        self.await_result(&id)
    }

    /// Current state of a registered job, `None` once retrieved or if unknown.
    pub fn status(&self, id: &JobId) -> Option<JobState> {
        let registered = self.registry.get(&id.key)?;
        if registered.serial != id.serial {
            return None;
        }
        match registered.promise.status() {
            PromiseStatus::Queued => Some(JobState::Submitted),
            PromiseStatus::Running => Some(JobState::Running),
            PromiseStatus::Completed => Some(JobState::Completed),
            PromiseStatus::Failed => Some(JobState::Failed),
            PromiseStatus::Taken => None,
        }
    }

    /// Number of jobs registered and not yet retrieved.
    pub fn pending_jobs(&self) -> usize {
        self.registry.len()
    }

    /// Stop accepting work and wait for in-flight jobs. Idempotent.
    pub fn shutdown(&self) {
        self.workers.shutdown();
    }
}

impl<F: AnalyzerFactory> AnalysisPool<F> {
    /// Unregister a job whose result is no longer wanted.
    ///
    /// The job still runs to completion, but its outcome is dropped and a
    /// later submission of the same key starts a fresh job. Returns `false`
    /// when the id is unknown, stale or already retrieved.
    pub fn discard(&self, id: &JobId) -> bool {
        let removed = self
            .registry
            .remove_if(&id.key, |_, registered| registered.serial == id.serial)
            .is_some();
        if removed {
            debug!(job = %id, "Job discarded");
        }
        removed
    }
}

/// Job body: book first, then a freshly launched backend that is released
/// before the job completes.
fn run_analysis<F: AnalyzerFactory>(
    context: &JobContext<F>,
    key: &JobKey,
    time_budget: Duration,
) -> Result<AnalysisResult> {
    if let Some(book) = &context.book {
        let ranked = book.find_ranked(&key.position);
        if !ranked.is_empty() {
            let candidates: Vec<CandidateMove> = ranked
                .into_iter()
                .take(key.breadth)
                .map(|(mv, _)| CandidateMove::book(mv))
                .collect();
            let moves: Vec<&str> = candidates.iter().map(|c| c.uci.as_str()).collect();
            info!(job = %key, moves = ?moves, "Book moves");
            return Ok(AnalysisResult {
                candidates,
                source: ResultSource::Book,
            });
        }
    }

    // UCI engines skip illegal moves silently instead of rejecting them
    key.position.board()?;

    let mut analyzer = context.factory.create(key.backend)?;
    let outcome = analyzer.analyze(&key.position, time_budget, key.breadth);
    drop(analyzer);

    let mut result = outcome?;
    result.candidates.truncate(key.breadth);
    if let Some(best) = result.best() {
        info!(job = %key, best = %best.uci, "Engine move");
    }
    Ok(result)
}
