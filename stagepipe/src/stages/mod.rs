//! Stage trait and implementations.
//!
//! Stages are the units of work a pipeline chains together. Each stage reads
//! one typed stream and writes another.

mod aggregate;
mod batch;
mod bounded;
mod dedup;

pub use aggregate::{AggregateStage, Flagged, FlaggedFirst, OrderPolicy};
pub use batch::{BatchFetcher, BatchStage};
pub use bounded::{BoundedStage, ItemOperation};
pub use dedup::{DedupStage, Identified, IdentityResolver};

use crate::stream::{Inbox, Outbox};
use crate::tasks::TaskGroupSummary;
use async_trait::async_trait;
use std::fmt::Debug;
use tracing::debug;

/// Trait for pipeline stages.
///
/// A stage must read `input` until it returns `None`, even when it ignores
/// the items. It only gets a shared reference to `output`, so it cannot close
/// the stream; the runner closes it once `run` has returned. Stages that spawn
/// work clone the `Outbox` into their tasks and must wait for those tasks
/// before returning, and report them through the returned
/// [`TaskGroupSummary`]; stages that spawn nothing return the default.
#[async_trait]
pub trait Stage: Send + Sync + Debug + 'static {
    /// Item type read from the upstream stream.
    type Input: Send + 'static;
    /// Item type written to the downstream stream.
    type Output: Send + 'static;

    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Runs the stage to completion.
    async fn run(
        &self,
        input: &mut Inbox<Self::Input>,
        output: &Outbox<Self::Output>,
    ) -> TaskGroupSummary;
}

/// A producer stage that emits a fixed list of items.
///
/// Its input is drained first; at the head of a pipeline that input is the
/// runner's empty, already-closed stream.
#[derive(Debug, Clone)]
pub struct SourceStage<T> {
    name: String,
    items: Vec<T>,
}

impl<T> SourceStage<T> {
    /// Creates a new source stage.
    #[must_use]
    pub fn new(name: impl Into<String>, items: impl IntoIterator<Item = T>) -> Self {
        Self {
            name: name.into(),
            items: items.into_iter().collect(),
        }
    }
}

#[async_trait]
impl<T> Stage for SourceStage<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &mut Inbox<T>, output: &Outbox<T>) -> TaskGroupSummary {
        input.drain().await;
        for item in &self.items {
            if output.send(item.clone()).await.is_err() {
                debug!(stage = %self.name, "Downstream closed; source stopped");
                break;
            }
        }
        TaskGroupSummary::default()
    }
}

/// A sequential, order-preserving map/filter stage.
///
/// Returning `None` from the function drops the item.
pub struct FnStage<I, O, F>
where
    F: Fn(I) -> Option<O> + Send + Sync,
{
    name: String,
    func: F,
    _phantom: std::marker::PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnStage<I, O, F>
where
    F: Fn(I) -> Option<O> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<I, O, F> Debug for FnStage<I, O, F>
where
    F: Fn(I) -> Option<O> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<I, O, F> Stage for FnStage<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Option<O> + Send + Sync + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &mut Inbox<I>, output: &Outbox<O>) -> TaskGroupSummary {
        while let Some(item) = input.recv().await {
            let Some(mapped) = (self.func)(item) else {
                continue;
            };
            if output.send(mapped).await.is_err() {
                debug!(stage = %self.name, "Downstream closed; dropping item");
            }
        }
        TaskGroupSummary::default()
    }
}
