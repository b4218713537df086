//! Liveness reporting and fault collection.

use crate::task::CancellationToken;
use crate::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

/// Receives progress updates from long running passes. Never blocks the
/// caller.
pub trait ProgressHandle: Send + Sync {
    fn set_text(&self, text: &str);

    fn set_maximum(&self, maximum: usize);

    /// Reset the counter to zero
    fn reset(&self);

    fn increase(&self);

    /// Has the user asked to stop?
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Emits progress through the `log` facade every 10 000 items
pub struct LogProgress {
    text: RwLock<String>,
    maximum: AtomicUsize,
    current: AtomicUsize,
    cancel: CancellationToken,
}

impl LogProgress {
    const EVERY: usize = 10_000;

    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            text: RwLock::new(String::new()),
            maximum: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            cancel,
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

impl ProgressHandle for LogProgress {
    fn set_text(&self, text: &str) {
        log::debug!("{}", text);
        if let Ok(mut current) = self.text.write() {
            *current = text.into();
        }
    }

    fn set_maximum(&self, maximum: usize) {
        self.maximum.store(maximum, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.current.store(0, Ordering::Relaxed);
    }

    fn increase(&self) {
        let n = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        if n % Self::EVERY == 0 {
            let text = self.text.read().map(|t| t.clone()).unwrap_or_default();
            log::trace!("{}: {}/{}", text, n, self.maximum.load(Ordering::Relaxed));
        }
    }

    fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }
}

/// Receives per-match faults
pub trait FaultSink: Send + Sync {
    fn report(&self, error: Error);
}

/// Logs and keeps every reported fault
#[derive(Debug, Default)]
pub struct CollectedFaults {
    faults: Mutex<Vec<Error>>,
}

impl CollectedFaults {
    pub fn len(&self) -> usize {
        self.faults.lock().map(|f| f.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> Vec<Error> {
        self.faults
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FaultSink for CollectedFaults {
    fn report(&self, error: Error) {
        log::error!("{}", error);
        match self.faults.lock() {
            Ok(mut faults) => faults.push(error),
            Err(poisoned) => poisoned.into_inner().push(error),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::matches::{MatchKey, MatchLevel};

    #[test]
    fn progress_counts() {
        let cancel = CancellationToken::new();
        let progress = LogProgress::new(cancel.clone());
        progress.set_text("validating");
        progress.set_maximum(3);
        (0..3).for_each(|_| progress.increase());
        assert_eq!(progress.current(), 3);
        progress.reset();
        assert_eq!(progress.current(), 0);

        assert!(!progress.is_canceled());
        cancel.cancel();
        assert!(progress.is_canceled());
    }

    #[test]
    fn faults_are_kept() {
        let sink = CollectedFaults::default();
        sink.report(Error::MissingMatch {
            level: MatchLevel::Spectrum,
            key: MatchKey(4),
        });
        assert_eq!(sink.len(), 1);
        let faults = sink.into_inner();
        assert_eq!(
            faults[0].to_string(),
            "spectrum match 4 is missing from the match store"
        );
    }
}
