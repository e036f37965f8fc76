use crossbeam::channel::{self, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info};

use crate::config_error;
use crate::errors::{AnalysisError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of named worker threads fed from one FIFO queue.
///
/// Tasks are dispatched in submission order; completion order is whatever the
/// workers produce. Shutting down stops intake, lets the workers drain the
/// queue, and joins them.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<WorkerHandle>>,
    name: String,
    size: usize,
}

/// Handle to a worker thread
struct WorkerHandle {
    handle: thread::JoinHandle<()>,
    id: usize,
}

/// Lock `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerPool {
    /// Create a pool with `num_workers` threads named `<name>-<index>`.
    pub fn new(name: &str, num_workers: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(config_error!("Number of workers must be a positive integer."));
        }

        let (sender, receiver) = channel::unbounded::<Task>();
        let mut workers = Vec::with_capacity(num_workers);

        for id in 0..num_workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || {
                    for task in receiver.iter() {
                        task();
                    }
                })?;
            workers.push(WorkerHandle { handle, id });
        }

        info!(pool = name, workers = num_workers, "worker pool initialized");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            name: name.to_string(),
            size: num_workers,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Queue `job` and return a promise for its outcome.
    ///
    /// Panics inside `job` are caught and reported as
    /// [`AnalysisError::WorkerPanicked`] so that waiters are always woken.
    pub fn spawn<T, F>(&self, job: F) -> Result<Promise<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let promise = Promise::new();
        let completer = promise.clone();

        let task: Task = Box::new(move || {
            completer.mark_running();
            let outcome = panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(AnalysisError::WorkerPanicked(message))
            });
            completer.complete(outcome);
        });

        let sender = lock(&self.sender);
        match sender.as_ref() {
            Some(sender) => sender.send(task).map_err(|_| AnalysisError::PoolShutdown)?,
            None => return Err(AnalysisError::PoolShutdown),
        }

        Ok(promise)
    }

    /// Stop accepting work and block until every queued job has run.
    ///
    /// Calling this more than once is harmless, and concurrent callers all
    /// return only after the workers have been joined.
    pub fn shutdown(&self) {
        let sender = lock(&self.sender).take();
        let initiated = sender.is_some();
        // Closing the channel lets idle workers exit once the queue is empty
        drop(sender);
        if initiated {
            info!(
                pool = %self.name,
                "Shutting down worker pool, waiting for active jobs to finish..."
            );
        }

        // Held for the whole drain so later callers wait for it too
        let mut workers = lock(&self.workers);
        if workers.is_empty() {
            return;
        }
        for worker in workers.drain(..) {
            if worker.handle.join().is_err() {
                debug!(pool = %self.name, worker = worker.id, "worker thread exited abnormally");
            }
        }
        info!(pool = %self.name, "All workers have been shut down.");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Lifecycle of a promised value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseStatus {
    Queued,
    Running,
    Completed,
    Failed,
    /// Outcome already handed to a consumer
    Taken,
}

enum Slot<T> {
    Queued,
    Running,
    Done(Result<T>),
    Taken,
}

struct PromiseInner<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Single-assignment result of a pooled job.
///
/// Clones share the same slot; the outcome can be taken exactly once.
pub struct Promise<T> {
    inner: Arc<PromiseInner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Promise<T> {
    fn new() -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                slot: Mutex::new(Slot::Queued),
                ready: Condvar::new(),
            }),
        }
    }

    fn mark_running(&self) {
        let mut slot = lock(&self.inner.slot);
        if matches!(*slot, Slot::Queued) {
            *slot = Slot::Running;
        }
    }

    fn complete(&self, outcome: Result<T>) {
        *lock(&self.inner.slot) = Slot::Done(outcome);
        self.inner.ready.notify_all();
    }

    pub fn status(&self) -> PromiseStatus {
        match &*lock(&self.inner.slot) {
            Slot::Queued => PromiseStatus::Queued,
            Slot::Running => PromiseStatus::Running,
            Slot::Done(Ok(_)) => PromiseStatus::Completed,
            Slot::Done(Err(_)) => PromiseStatus::Failed,
            Slot::Taken => PromiseStatus::Taken,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.status(), PromiseStatus::Queued | PromiseStatus::Running)
    }

    /// Block until the job has finished, without consuming the outcome.
    pub fn wait_finished(&self) {
        let mut slot = lock(&self.inner.slot);
        while matches!(*slot, Slot::Queued | Slot::Running) {
            slot = self
                .inner
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Take the outcome if it is available and has not been taken yet.
    pub fn try_take(&self) -> Option<Result<T>> {
        let mut slot = lock(&self.inner.slot);
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Done(outcome) => Some(outcome),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Block until the job finishes and take its outcome.
    ///
    /// Returns `None` when another clone already took it.
    pub fn wait(&self) -> Option<Result<T>> {
        self.wait_finished();
        self.try_take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_rejects_zero_workers() {
        assert!(WorkerPool::new("test", 0).is_err());
    }

    #[test]
    fn test_spawn_and_wait() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let promise = pool.spawn(|| Ok(21 * 2)).unwrap();

        assert_eq!(promise.wait().unwrap().unwrap(), 42);
        assert_eq!(promise.status(), PromiseStatus::Taken);
        assert!(promise.wait().is_none());
    }

    #[test]
    fn test_errors_and_panics_complete_the_promise() {
        let pool = WorkerPool::new("test", 1).unwrap();

        let failing = pool
            .spawn::<(), _>(|| Err(AnalysisError::Statistics("offline".to_string())))
            .unwrap();
        failing.wait_finished();
        assert_eq!(failing.status(), PromiseStatus::Failed);

        let panicking = pool.spawn::<(), _>(|| panic!("boom")).unwrap();
        match panicking.wait().unwrap() {
            Err(AnalysisError::WorkerPanicked(msg)) => assert!(msg.contains("boom")),
            other => panic!("Expected WorkerPanicked, got {:?}", other.map(|_| ())),
        }

        // The worker survives the panic
        assert_eq!(pool.spawn(|| Ok(7)).unwrap().wait().unwrap().unwrap(), 7);
    }

    #[test]
    fn test_shutdown_drains_queue_and_is_idempotent() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.spawn(move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert!(pool.is_shut_down());

        pool.shutdown();
        assert!(matches!(pool.spawn(|| Ok(())), Err(AnalysisError::PoolShutdown)));
    }

    #[test]
    fn test_concurrent_shutdown_waits_for_in_flight_jobs() {
        let pool = Arc::new(WorkerPool::new("test", 2).unwrap());
        let finished = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let finished = Arc::clone(&finished);
            pool.spawn(move || {
                thread::sleep(Duration::from_millis(30));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        let barrier = Arc::new(std::sync::Barrier::new(3));
        let callers: Vec<_> = (0..3)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let finished = Arc::clone(&finished);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    pool.shutdown();
                    finished.load(Ordering::SeqCst)
                })
            })
            .collect();

        for caller in callers {
            assert_eq!(caller.join().unwrap(), 4);
        }
    }
}
