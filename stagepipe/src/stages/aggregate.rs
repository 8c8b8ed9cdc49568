//! Deterministic aggregation (barrier) stage.

use super::Stage;
use crate::stream::{Inbox, Outbox};
use crate::tasks::TaskGroupSummary;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::fmt::Debug;
use tracing::debug;

/// A total order over aggregated records.
pub trait OrderPolicy<T>: Send + Sync + 'static {
    /// Compares two records.
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

impl<T, F> OrderPolicy<T> for F
where
    F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
{
    fn compare(&self, a: &T, b: &T) -> Ordering {
        self(a, b)
    }
}

/// A record carrying a boolean flag and a numeric identifier.
pub trait Flagged {
    /// The flag; flagged records sort first under [`FlaggedFirst`].
    fn flag(&self) -> bool;

    /// The identifier, unique within one run.
    fn ordinal(&self) -> u64;
}

/// Flag descending (true first), then identifier ascending.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlaggedFirst;

impl<T: Flagged> OrderPolicy<T> for FlaggedFirst {
    fn compare(&self, a: &T, b: &T) -> Ordering {
        b.flag()
            .cmp(&a.flag())
            .then_with(|| a.ordinal().cmp(&b.ordinal()))
    }
}

type Render<T, O> = Box<dyn Fn(T) -> O + Send + Sync>;

/// Collects the whole input, sorts it, and re-emits it in order.
///
/// Nothing is emitted until the input stream closes. The sort is stable, so
/// equal records keep their arrival order.
pub struct AggregateStage<T, O, P> {
    name: String,
    policy: P,
    render: Render<T, O>,
}

impl<T, O, P> AggregateStage<T, O, P>
where
    P: OrderPolicy<T>,
{
    /// Creates an aggregation stage that renders each record after sorting.
    pub fn new<R>(name: impl Into<String>, policy: P, render: R) -> Self
    where
        R: Fn(T) -> O + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            policy,
            render: Box::new(render),
        }
    }

    /// Sorts `records` in place with this stage's policy.
    pub fn sort(&self, records: &mut [T]) {
        records.sort_by(|a, b| self.policy.compare(a, b));
    }
}

impl<T, P> AggregateStage<T, T, P>
where
    T: 'static,
    P: OrderPolicy<T>,
{
    /// Creates an aggregation stage that emits the records themselves.
    pub fn sorted(name: impl Into<String>, policy: P) -> Self {
        Self::new(name, policy, |record| record)
    }
}

impl<T, O, P> Debug for AggregateStage<T, O, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<T, O, P> Stage for AggregateStage<T, O, P>
where
    T: Send + 'static,
    O: Send + 'static,
    P: OrderPolicy<T>,
{
    type Input = T;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &mut Inbox<T>, output: &Outbox<O>) -> TaskGroupSummary {
        let mut records = input.collect().await;
        self.sort(&mut records);
        debug!(stage = %self.name, records = records.len(), "Input closed; emitting sorted records");

        for record in records {
            if output.send((self.render)(record)).await.is_err() {
                debug!(stage = %self.name, "Downstream closed; dropping remaining records");
                break;
            }
        }
        TaskGroupSummary::default()
    }
}
