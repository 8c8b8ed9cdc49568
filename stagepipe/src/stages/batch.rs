//! Adaptive batching stage.

use super::Stage;
use crate::errors::{ConfigError, ServiceError};
use crate::stream::{Inbox, Outbox};
use crate::tasks::{TaskGroup, TaskGroupSummary};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_PREALLOC: usize = 1024;

/// A downstream call that accepts a group of items at once.
#[async_trait]
pub trait BatchFetcher: Send + Sync + 'static {
    /// Item type accepted in a batch.
    type Input: Send + 'static;
    /// Item type produced for a batch.
    type Output: Send + 'static;

    /// Performs the batched call. A failure drops the whole batch's output.
    async fn fetch(&self, batch: Vec<Self::Input>) -> Result<Vec<Self::Output>, ServiceError>;
}

/// Groups items into batches of at most `batch_size` and fetches each batch
/// in its own task.
///
/// A batch is dispatched as soon as it is full. A partial batch is
/// dispatched only when the input ends, so at most one batch is smaller than
/// `batch_size`. Results are forwarded individually.
pub struct BatchStage<F: BatchFetcher> {
    name: String,
    fetcher: Arc<F>,
    batch_size: usize,
}

impl<F: BatchFetcher> BatchStage<F> {
    /// Creates a new batching stage.
    ///
    /// # Errors
    ///
    /// Returns an error if `batch_size` is zero.
    pub fn new(name: impl Into<String>, fetcher: F, batch_size: usize) -> Result<Self, ConfigError> {
        Self::from_arc(name, Arc::new(fetcher), batch_size)
    }

    /// Creates a batching stage around a shared fetcher.
    ///
    /// # Errors
    ///
    /// Returns an error if `batch_size` is zero.
    pub fn from_arc(
        name: impl Into<String>,
        fetcher: Arc<F>,
        batch_size: usize,
    ) -> Result<Self, ConfigError> {
        if batch_size == 0 {
            return Err(ConfigError::must_be_positive("batch_size"));
        }
        Ok(Self {
            name: name.into(),
            fetcher,
            batch_size,
        })
    }

    /// Returns the configured batch size.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Initial buffer capacity; `batch_size` itself is unbounded.
    fn prealloc(&self) -> usize {
        self.batch_size.min(MAX_PREALLOC)
    }

    fn dispatch(&self, group: &mut TaskGroup, batch: Vec<F::Input>, output: &Outbox<F::Output>) {
        let fetcher = Arc::clone(&self.fetcher);
        let output = output.clone();
        let stage = self.name.clone();

        group.spawn(async move {
            let size = batch.len();
            let results = match fetcher.fetch(batch).await {
                Ok(results) => results,
                Err(err) => {
                    warn!(
                        stage = %stage,
                        batch_size = size,
                        error = %err,
                        kind = err.kind(),
                        "Batch failed; dropping its output"
                    );
                    return;
                }
            };

            debug!(stage = %stage, batch_size = size, results = results.len(), "Batch fetched");
            for result in results {
                if output.send(result).await.is_err() {
                    debug!(stage = %stage, "Downstream closed; dropping batch results");
                    return;
                }
            }
        });
    }
}

impl<F: BatchFetcher> Debug for BatchStage<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStage")
            .field("name", &self.name)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[async_trait]
impl<F: BatchFetcher> Stage for BatchStage<F> {
    type Input = F::Input;
    type Output = F::Output;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &mut Inbox<F::Input>, output: &Outbox<F::Output>) -> TaskGroupSummary {
        let mut group = TaskGroup::new(self.name.clone());
        let mut batch = Vec::with_capacity(self.prealloc());

        while let Some(item) = input.recv().await {
            batch.push(item);
            if batch.len() == self.batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.prealloc()));
                self.dispatch(&mut group, full, output);
            }
        }

        if !batch.is_empty() {
            self.dispatch(&mut group, batch, output);
        }

        group.join_all().await
    }
}
