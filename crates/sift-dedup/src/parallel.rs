//! Bounded worker pool.
//!
//! Wraps a dedicated rayon pool with two shapes of parallel work:
//! [`WorkerPool::map`] for whole-file tasks with ordered results, and
//! [`WorkerPool::imap_unordered`] for per-line work whose results are
//! consumed as they complete. Both return only after every task has
//! finished, and a panicking task surfaces as [`PoolError::WorkerPanicked`]
//! instead of unwinding through the caller.

use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver};
use thiserror::Error;
use tracing::debug;

/// Errors from the worker pool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Worker count must be at least 1")]
    NoWorkers,

    #[error("Failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// A fixed-size pool of worker threads.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    /// Build a pool with `workers` threads.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("sift-worker-{i}"))
            .build()?;
        debug!(workers, "Started worker pool");
        Ok(Self { pool, workers })
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to every item in parallel, returning results in input order.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        self.pool.install(|| {
            items
                .into_par_iter()
                .map(|item| guarded(&f, item))
                .collect()
        })
    }

    /// Apply `f` to every item in parallel and hand the results to `consume`
    /// in completion order.
    ///
    /// `consume` runs on the calling thread while the workers make progress.
    /// If it returns early, the remaining tasks still run to completion
    /// before this method returns, and their results are discarded.
    pub fn imap_unordered<I, R, F, C, O>(&self, items: I, f: F, consume: C) -> O
    where
        I: IntoIterator,
        I::Item: Send,
        R: Send,
        F: Fn(I::Item) -> R + Send + Sync,
        C: FnOnce(UnorderedResults<R>) -> O,
    {
        let (sender, receiver) = mpsc::channel();
        let f = &f;

        self.pool.in_place_scope(move |scope| {
            for item in items {
                let sender = sender.clone();
                scope.spawn(move |_| {
                    // The consumer may have stopped listening.
                    let _ = sender.send(guarded(f, item));
                });
            }
            drop(sender);
            consume(UnorderedResults { receiver })
        })
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish()
    }
}

/// Results of [`WorkerPool::imap_unordered`], yielded as tasks finish.
pub struct UnorderedResults<R> {
    receiver: Receiver<Result<R>>,
}

impl<R> Iterator for UnorderedResults<R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

fn guarded<T, R, F>(f: &F, item: T) -> Result<R>
where
    F: Fn(T) -> R,
{
    panic::catch_unwind(AssertUnwindSafe(|| f(item)))
        .map_err(|payload| PoolError::WorkerPanicked(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
