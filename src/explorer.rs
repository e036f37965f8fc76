//! Cache-backed exploration of move frequencies.
//!
//! [`DistributionCache`] maps positions to their [`MoveDistribution`] and
//! survives restarts. [`Explorer`] fills it by walking the tree of played
//! moves, expanding only branches that are played often enough.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::config::ExplorerConfig;
use crate::config_error;
use crate::distribution::{MoveDistribution, MoveStatistics};
use crate::errors::{AnalysisError, Result};
use crate::persistence::DistributionStore;
use crate::position::Position;
use crate::utils::{lock, CacheCounters, CacheStats, KeyedLocks, Promise, WorkerPool};

/// Position → distribution cache with an optional durable backing store.
///
/// Lookups are served from memory. Writes go to the store first, so anything
/// visible in memory is also on disk.
pub struct DistributionCache {
    entries: DashMap<Position, MoveDistribution>,
    store: Option<Mutex<DistributionStore>>,
    locks: KeyedLocks<Position>,
    counters: CacheCounters,
}

impl DistributionCache {
    /// Open (or create) a durable cache, loading every stored entry.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = DistributionStore::open(path.as_ref())?;
        let entries = DashMap::new();
        for (position, distribution) in store.load_all()? {
            entries.insert(position, distribution);
        }
        info!(
            path = %path.as_ref().display(),
            entries = entries.len(),
            "Distribution cache opened"
        );

        Ok(Self {
            entries,
            store: Some(Mutex::new(store)),
            locks: KeyedLocks::new(),
            counters: CacheCounters::default(),
        })
    }

    /// A cache that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            store: None,
            locks: KeyedLocks::new(),
            counters: CacheCounters::default(),
        }
    }

    pub fn get(&self, position: &Position) -> Option<MoveDistribution> {
        self.entries.get(position).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, position: &Position) -> bool {
        self.entries.contains_key(position)
    }

    pub fn insert(&self, position: &Position, distribution: &MoveDistribution) -> Result<()> {
        if let Some(store) = &self.store {
            lock(store).save(position, distribution)?;
        }
        self.entries.insert(position.clone(), distribution.clone());
        self.counters.record_store();
        Ok(())
    }

    /// Return the cached distribution, computing and storing it on a miss.
    ///
    /// Concurrent callers asking for the same uncached position wait for a
    /// single computation.
    pub fn get_or_compute<F>(&self, position: &Position, compute: F) -> Result<MoveDistribution>
    where
        F: FnOnce() -> Result<MoveDistribution>,
    {
        if let Some(distribution) = self.get(position) {
            self.counters.record_hit();
            return Ok(distribution);
        }

        let key_lock = self.locks.lock_for(position);
        let outcome = {
            let _guard = lock(&key_lock);
            self.compute_locked(position, compute)
        };
        drop(key_lock);
        self.locks.release(position);
        outcome
    }

    fn compute_locked<F>(&self, position: &Position, compute: F) -> Result<MoveDistribution>
    where
        F: FnOnce() -> Result<MoveDistribution>,
    {
        if let Some(distribution) = self.get(position) {
            self.counters.record_hit();
            return Ok(distribution);
        }

        self.counters.record_miss();
        let distribution = compute()?;
        self.insert(position, &distribution)?;
        Ok(distribution)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_durable(&self) -> bool {
        self.store.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.entries.len())
    }
}

struct Resolver<S> {
    statistics: S,
    cache: DistributionCache,
}

impl<S: MoveStatistics> Resolver<S> {
    fn resolve(&self, position: &Position) -> Result<MoveDistribution> {
        self.cache.get_or_compute(position, || {
            debug!(position = %position, "Querying move statistics");
            self.statistics.next_move_distribution(position)
        })
    }
}

/// Bounds of one exploration walk.
#[derive(Debug, Clone)]
pub struct ExploreOptions {
    pub max_depth: usize,
    /// Minimum share of a move among its siblings for its branch to be expanded
    pub stop_threshold: f64,
    pub show_progress: bool,
}

impl ExploreOptions {
    pub fn new(max_depth: usize, stop_threshold: f64) -> Self {
        Self {
            max_depth,
            stop_threshold,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

impl From<&ExplorerConfig> for ExploreOptions {
    fn from(config: &ExplorerConfig) -> Self {
        Self::new(config.max_depth, config.stop_threshold)
    }
}

/// What a walk touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExploreReport {
    /// Positions resolved, in visiting order
    pub visited: Vec<Position>,
    /// Positions whose children were scheduled
    pub expanded: usize,
    /// Child moves skipped for falling below the stop threshold
    pub pruned: usize,
    /// Greatest depth reached, relative to the start position
    pub deepest: usize,
}

struct Frame {
    position: Position,
    depth: usize,
}

/// Frequency walker over a statistics source, with its own worker pool.
pub struct Explorer<S: MoveStatistics> {
    resolver: Arc<Resolver<S>>,
    registry: DashMap<Position, Promise<MoveDistribution>>,
    workers: WorkerPool,
}

impl<S: MoveStatistics + 'static> Explorer<S> {
    pub fn new(statistics: S, cache: DistributionCache, num_workers: usize) -> Result<Self> {
        let workers = WorkerPool::new("ExplorerWorker", num_workers)?;
        Ok(Self {
            resolver: Arc::new(Resolver { statistics, cache }),
            registry: DashMap::new(),
            workers,
        })
    }

    /// Explorer over a durable cache when `cache_path` is set, in-memory otherwise.
    pub fn from_config(statistics: S, config: &ExplorerConfig) -> Result<Self> {
        let cache = match &config.cache_path {
            Some(path) => DistributionCache::open(path)?,
            None => DistributionCache::in_memory(),
        };
        Self::new(statistics, cache, config.num_workers)
    }

    pub fn cache(&self) -> &DistributionCache {
        &self.resolver.cache
    }

    pub fn statistics(&self) -> &S {
        &self.resolver.statistics
    }

    /// Get-or-compute on the calling thread.
    pub fn resolve(&self, position: &Position) -> Result<MoveDistribution> {
        self.resolver.resolve(position)
    }

    /// Schedule resolution of `position` on the worker pool.
    ///
    /// A position that is already scheduled and not yet awaited is not
    /// scheduled twice.
    pub fn submit(&self, position: &Position) -> Result<()> {
        match self.registry.entry(position.clone()) {
            Entry::Occupied(_) => {
                debug!(position = %position, "Position already scheduled");
                Ok(())
            }
            Entry::Vacant(entry) => {
                let resolver = Arc::clone(&self.resolver);
                let job_position = position.clone();
                let promise = self.workers.spawn(move || resolver.resolve(&job_position))?;
                entry.insert(promise);
                Ok(())
            }
        }
    }

    /// Wait for a scheduled position. Each submission is delivered once.
    pub fn await_result(&self, position: &Position) -> Result<MoveDistribution> {
        let (_, promise) = self
            .registry
            .remove(position)
            .ok_or_else(|| AnalysisError::JobNotFound(position.to_string()))?;
        promise
            .wait()
            .unwrap_or_else(|| Err(AnalysisError::JobNotFound(position.to_string())))
    }

    pub fn submit_and_await(&self, position: &Position) -> Result<MoveDistribution> {
        self.submit(position)?;
        self.await_result(position)
    }

    pub fn explore(
        &self,
        start: &Position,
        max_depth: usize,
        stop_threshold: f64,
    ) -> Result<ExploreReport> {
        self.explore_with(start, &ExploreOptions::new(max_depth, stop_threshold))
    }

    /// Depth-first walk from `start`.
    ///
    /// Every child of a position is scheduled before the first one is awaited,
    /// so sibling lookups overlap on the pool. A position whose distribution
    /// cannot be resolved aborts the walk with that error.
    pub fn explore_with(
        &self,
        start: &Position,
        options: &ExploreOptions,
    ) -> Result<ExploreReport> {
        if !(0.0..=1.0).contains(&options.stop_threshold) {
            return Err(config_error!(
                "Stop threshold must be within [0, 1], got {}",
                options.stop_threshold
            ));
        }

        let pb = if options.show_progress {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg} {pos} positions")
        {
            pb.set_style(style);
        }
        pb.set_message("Exploring");

        let mut report = ExploreReport::default();
        let mut stack = vec![Frame {
            position: start.clone(),
            depth: 0,
        }];
        self.submit(start)?;

        while let Some(frame) = stack.pop() {
            let distribution = match self.await_result(&frame.position) {
                Ok(distribution) => distribution,
                Err(e) => {
                    self.abandon(&stack);
                    pb.finish_and_clear();
                    return Err(e);
                }
            };
            pb.inc(1);
            report.deepest = report.deepest.max(frame.depth);
            report.visited.push(frame.position.clone());

            let total = distribution.total();
            if total == 0 || frame.depth + 1 > options.max_depth {
                continue;
            }

            let mut children = Vec::new();
            for (mv, count) in distribution.ranked() {
                if (count as f64 / total as f64) < options.stop_threshold {
                    report.pruned += 1;
                    continue;
                }
                children.push(frame.position.push(mv));
            }
            if children.is_empty() {
                continue;
            }
            report.expanded += 1;

            for child in &children {
                if let Err(e) = self.submit(child) {
                    self.abandon(&stack);
                    pb.finish_and_clear();
                    return Err(e);
                }
            }
            // Most played child on top of the stack
            stack.extend(children.into_iter().rev().map(|position| Frame {
                position,
                depth: frame.depth + 1,
            }));
        }

        pb.finish_and_clear();
        info!(
            start = %start,
            visited = report.visited.len(),
            expanded = report.expanded,
            pruned = report.pruned,
            deepest = report.deepest,
            "Exploration finished"
        );
        Ok(report)
    }

    /// Forget scheduled positions of an aborted walk; their jobs still finish
    /// and populate the cache.
    fn abandon(&self, stack: &[Frame]) {
        for frame in stack {
            self.registry.remove(&frame.position);
        }
    }

    /// Positions scheduled and not yet awaited.
    pub fn pending_jobs(&self) -> usize {
        self.registry.len()
    }

    pub fn shutdown(&self) {
        self.workers.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStatistics {
        calls: AtomicUsize,
    }

    impl MoveStatistics for CountingStatistics {
        fn next_move_distribution(&self, position: &Position) -> Result<MoveDistribution> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            if position.is_start() {
                Ok([("e2e4", 3), ("d2d4", 1)].into_iter().collect())
            } else {
                Ok(MoveDistribution::new())
            }
        }
    }

    fn explorer() -> Explorer<CountingStatistics> {
        let statistics = CountingStatistics {
            calls: AtomicUsize::new(0),
        };
        Explorer::new(statistics, DistributionCache::in_memory(), 4).unwrap()
    }

    #[test]
    fn test_resolve_caches_results() {
        let explorer = explorer();
        let first = explorer.resolve(&Position::start()).unwrap();
        let second = explorer.resolve(&Position::start()).unwrap();

        assert_eq!(first, second);
        assert_eq!(explorer.statistics().calls.load(Ordering::SeqCst), 1);

        let stats = explorer.cache().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_concurrent_resolve_computes_once() {
        let explorer = Arc::new(explorer());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let explorer = Arc::clone(&explorer);
                std::thread::spawn(move || explorer.resolve(&Position::start()).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().total(), 4);
        }
        assert_eq!(explorer.statistics().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_await_unknown_position() {
        let explorer = explorer();
        let result = explorer.await_result(&Position::new("e2e4"));
        assert!(matches!(result, Err(AnalysisError::JobNotFound(_))));
    }

    #[test]
    fn test_submit_and_await_is_exactly_once() {
        let explorer = explorer();
        let position = Position::start();
        explorer.submit(&position).unwrap();
        explorer.submit(&position).unwrap();
        assert_eq!(explorer.pending_jobs(), 1);

        assert_eq!(explorer.await_result(&position).unwrap().total(), 4);
        assert!(explorer.await_result(&position).is_err());
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let explorer = explorer();
        let result = explorer.explore(&Position::start(), 2, 1.5);
        assert!(result.unwrap_err().is_configuration());
    }
}
