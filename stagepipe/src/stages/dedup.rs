//! Fan-out deduplication stage.

use super::Stage;
use crate::errors::ServiceError;
use crate::stream::{Inbox, Outbox};
use crate::tasks::{TaskGroup, TaskGroupSummary};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, enabled, warn, Level};

/// A record with a canonical identity.
pub trait Identified {
    /// The identity key. Two records with equal keys are duplicates.
    type Key: Eq + Hash + Debug + Send + 'static;

    /// Returns the record's identity key.
    fn identity(&self) -> Self::Key;
}

/// Resolves a raw input into a canonical record.
#[async_trait]
pub trait IdentityResolver: Send + Sync + 'static {
    /// The raw input type.
    type Input: Debug + Send + 'static;
    /// The resolved record type.
    type Record: Identified + Send + 'static;

    /// Resolves one input.
    async fn resolve(&self, input: Self::Input) -> Result<Self::Record, ServiceError>;
}

/// Resolves every input concurrently and forwards one record per identity.
///
/// One task is spawned per input with no upper bound. When several inputs
/// resolve to the same identity, whichever task claims the key first is
/// forwarded and the rest are suppressed. Inputs that fail to resolve are
/// dropped.
pub struct DedupStage<R: IdentityResolver> {
    name: String,
    resolver: Arc<R>,
}

impl<R: IdentityResolver> DedupStage<R> {
    /// Creates a new dedup stage.
    pub fn new(name: impl Into<String>, resolver: R) -> Self {
        Self::from_arc(name, Arc::new(resolver))
    }

    /// Creates a dedup stage around a shared resolver.
    pub fn from_arc(name: impl Into<String>, resolver: Arc<R>) -> Self {
        Self {
            name: name.into(),
            resolver,
        }
    }
}

impl<R: IdentityResolver> Debug for DedupStage<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<R: IdentityResolver> Stage for DedupStage<R> {
    type Input = R::Input;
    type Output = R::Record;

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &mut Inbox<R::Input>, output: &Outbox<R::Record>) -> TaskGroupSummary {
        // Scoped to this run; no task keeps a reference past the check-and-mark.
        let seen: Arc<Mutex<HashSet<<R::Record as Identified>::Key>>> =
            Arc::new(Mutex::new(HashSet::new()));
        let mut group = TaskGroup::new(self.name.clone());

        while let Some(item) = input.recv().await {
            let resolver = Arc::clone(&self.resolver);
            let seen = Arc::clone(&seen);
            let output = output.clone();
            let stage = self.name.clone();

            group.spawn(async move {
                let label = enabled!(Level::WARN)
                    .then(|| format!("{item:?}"))
                    .unwrap_or_default();
                let record = match resolver.resolve(item).await {
                    Ok(record) => record,
                    Err(err) => {
                        warn!(
                            stage = %stage,
                            item = %label,
                            error = %err,
                            kind = err.kind(),
                            "Resolution failed; dropping item"
                        );
                        return;
                    }
                };

                let key = record.identity();
                let first = seen.lock().insert(key);
                if !first {
                    debug!(stage = %stage, item = %label, "Duplicate identity suppressed");
                    return;
                }

                if output.send(record).await.is_err() {
                    debug!(stage = %stage, item = %label, "Downstream closed; dropping record");
                }
            });
        }

        group.join_all().await
    }
}
