//! Shared infrastructure: the bounded worker pool with its promises, and the
//! concurrency helpers used by the caches.

pub mod cache;
pub mod parallel;

pub use cache::{CacheCounters, CacheStats, KeyedLocks};
pub use parallel::{Promise, PromiseStatus, WorkerPool};
pub(crate) use parallel::lock;
