//! Bounded parallel-for with a deadline and cooperative cancellation.

use crate::matches::MatchLevel;
use crate::{Error, Result};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared flag polled by workers and by the orchestrator between phases
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A fixed number of workers draining one shared iterator.
///
/// Every call to [`TaskGroup::run`] is a barrier: it returns once all workers
/// are done, the deadline passed, or the group was canceled.
pub struct TaskGroup {
    threads: usize,
    cancel: CancellationToken,
}

impl TaskGroup {
    pub fn new(threads: usize, cancel: CancellationToken) -> Self {
        Self {
            threads: threads.max(1),
            cancel,
        }
    }

    /// Feed every item of `items` to `work`, each item to exactly one worker.
    ///
    /// Each worker folds its items into an accumulator created by `init`; one
    /// accumulator per worker is returned for the caller to merge. Workers
    /// stop pulling items once the group is canceled or `limit` has elapsed;
    /// an item pulled after the deadline is abandoned. The deadline is checked
    /// again after every item, so a phase that overruns while working on its
    /// last items still times out.
    pub fn run<T, I, A, F, W>(
        &self,
        level: MatchLevel,
        items: I,
        limit: Duration,
        init: F,
        work: W,
    ) -> Result<Vec<A>>
    where
        T: Send,
        I: Iterator<Item = T> + Send,
        A: Send,
        F: Fn() -> A + Send + Sync,
        W: Fn(&mut A, T) + Send + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(move |ix| format!("sieve-{}-{}", level, ix))
            .build()?;

        let deadline = Instant::now().checked_add(limit);
        let items = Mutex::new(items);
        let timed_out = AtomicBool::new(false);
        let expired = || {
            let expired = deadline.map(|d| Instant::now() >= d).unwrap_or(false);
            if expired {
                timed_out.store(true, Ordering::SeqCst);
                self.cancel.cancel();
            }
            expired
        };

        let accumulators = pool.install(|| {
            (0..self.threads)
                .into_par_iter()
                .map(|_| {
                    let mut acc = init();
                    while !self.cancel.is_canceled() {
                        let item = match items.lock() {
                            Ok(mut items) => items.next(),
                            Err(_) => None,
                        };
                        let item = match item {
                            Some(item) => item,
                            None => break,
                        };
                        if expired() {
                            break;
                        }
                        work(&mut acc, item);
                        if expired() {
                            break;
                        }
                    }
                    acc
                })
                .collect::<Vec<_>>()
        });

        if timed_out.load(Ordering::SeqCst) {
            return Err(Error::Timeout { level, limit });
        }
        if self.cancel.is_canceled() {
            return Err(Error::Canceled);
        }
        Ok(accumulators)
    }
}
