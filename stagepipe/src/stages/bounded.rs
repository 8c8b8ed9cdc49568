//! Bounded-concurrency stage.

use super::Stage;
use crate::errors::{ConfigError, ServiceError};
use crate::stream::{Inbox, Outbox};
use crate::tasks::{TaskGroup, TaskGroupSummary};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, enabled, warn, Level};

/// A per-item operation, typically a call to an external service.
#[async_trait]
pub trait ItemOperation: Send + Sync + 'static {
    /// Item type consumed.
    type Input: Debug + Send + 'static;
    /// Item type produced.
    type Output: Send + 'static;

    /// Applies the operation to one item.
    async fn apply(&self, item: Self::Input) -> Result<Self::Output, ServiceError>;
}

/// Applies an operation to every item with at most `max_in_flight` calls
/// running at once.
///
/// The dispatch loop waits for a permit before spawning each task, so a full
/// pool holds back reading from upstream. A task keeps its permit until it
/// finishes, whether the operation succeeded, failed, or panicked.
pub struct BoundedStage<O: ItemOperation> {
    name: String,
    operation: Arc<O>,
    max_in_flight: usize,
}

impl<O: ItemOperation> BoundedStage<O> {
    /// Creates a new bounded-concurrency stage.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_in_flight` is zero.
    pub fn new(name: impl Into<String>, operation: O, max_in_flight: usize) -> Result<Self, ConfigError> {
        Self::from_arc(name, Arc::new(operation), max_in_flight)
    }

    /// Creates a bounded-concurrency stage around a shared operation.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_in_flight` is zero.
    pub fn from_arc(
        name: impl Into<String>,
        operation: Arc<O>,
        max_in_flight: usize,
    ) -> Result<Self, ConfigError> {
        if max_in_flight == 0 {
            return Err(ConfigError::must_be_positive("max_in_flight"));
        }
        Ok(Self {
            name: name.into(),
            operation,
            max_in_flight,
        })
    }

    /// Returns the in-flight limit.
    #[must_use]
    pub const fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

impl<O: ItemOperation> Debug for BoundedStage<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedStage")
            .field("name", &self.name)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

#[async_trait]
impl<O: ItemOperation> Stage for BoundedStage<O> {
    type Input = O::Input;
    type Output = O::Output;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &mut Inbox<O::Input>, output: &Outbox<O::Output>) -> TaskGroupSummary {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut group = TaskGroup::new(self.name.clone());

        while let Some(item) = input.recv().await {
            // The semaphore is never closed, so this only fails on a bug.
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                warn!(stage = %self.name, "Permit pool closed; dropping item");
                continue;
            };

            let operation = Arc::clone(&self.operation);
            let output = output.clone();
            let stage = self.name.clone();

            group.spawn(async move {
                let _permit = permit;
                let label = enabled!(Level::WARN)
                    .then(|| format!("{item:?}"))
                    .unwrap_or_default();
                match operation.apply(item).await {
                    Ok(result) => {
                        if output.send(result).await.is_err() {
                            debug!(stage = %stage, item = %label, "Downstream closed; dropping result");
                        }
                    }
                    Err(err) => {
                        warn!(
                            stage = %stage,
                            item = %label,
                            error = %err,
                            kind = err.kind(),
                            "Operation failed; dropping item"
                        );
                    }
                }
            });
        }

        group.join_all().await
    }
}
