//! Instrumentation doubles.

use crate::errors::ServiceError;
use crate::stages::BatchFetcher;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks how many operations run at the same time.
///
/// Call [`ConcurrencyProbe::enter`] at the start of an operation and keep the
/// guard alive until it ends.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl ConcurrencyProbe {
    /// Creates a new probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of an operation.
    pub fn enter(&self) -> ProbeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        ProbeGuard { probe: self }
    }

    /// Operations currently in flight.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous operations observed.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Operations started so far.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

/// Marks the end of an operation when dropped.
#[derive(Debug)]
pub struct ProbeGuard<'a> {
    probe: &'a ConcurrencyProbe,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probe.current.fetch_sub(1, Ordering::SeqCst);
    }
}

type FailWhen<T> = Box<dyn Fn(&[T]) -> bool + Send + Sync>;

/// A batch fetcher that echoes its input and records every batch it saw.
pub struct RecordingFetcher<T> {
    batches: Mutex<Vec<Vec<T>>>,
    fail_when: Option<FailWhen<T>>,
}

impl<T> RecordingFetcher<T> {
    /// Creates a fetcher that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            fail_when: None,
        }
    }

    /// Creates a fetcher that fails any batch matching `predicate`.
    pub fn failing_when<F>(predicate: F) -> Self
    where
        F: Fn(&[T]) -> bool + Send + Sync + 'static,
    {
        Self {
            batches: Mutex::new(Vec::new()),
            fail_when: Some(Box::new(predicate)),
        }
    }

    /// Sizes of the recorded batches, in call order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }
}

impl<T: Clone> RecordingFetcher<T> {
    /// The recorded batches, in call order.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<T>> {
        self.batches.lock().clone()
    }
}

impl<T> Default for RecordingFetcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RecordingFetcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingFetcher")
            .field("batches", &self.batches.lock().len())
            .finish()
    }
}

#[async_trait]
impl<T> BatchFetcher for RecordingFetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Input = T;
    type Output = T;

    async fn fetch(&self, batch: Vec<T>) -> Result<Vec<T>, ServiceError> {
        self.batches.lock().push(batch.clone());
        if self.fail_when.as_ref().is_some_and(|fail| fail(&batch)) {
            return Err(ServiceError::unavailable("batch rejected by test predicate"));
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_tracks_peak() {
        let probe = ConcurrencyProbe::new();
        {
            let _a = probe.enter();
            let _b = probe.enter();
            assert_eq!(probe.current(), 2);
        }
        let _c = probe.enter();

        assert_eq!(probe.current(), 1);
        assert_eq!(probe.peak(), 2);
        assert_eq!(probe.total(), 3);
    }

    #[tokio::test]
    async fn test_recording_fetcher() {
        let fetcher = RecordingFetcher::failing_when(|b: &[u8]| b.len() > 2);

        assert_eq!(fetcher.fetch(vec![1, 2]).await, Ok(vec![1, 2]));
        assert!(fetcher.fetch(vec![1, 2, 3]).await.is_err());
        assert_eq!(fetcher.batch_sizes(), vec![2, 3]);
    }
}
