//! Join-all container for the work a fan-out stage spawns.

use std::future::Future;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Counts reported by [`TaskGroup::join_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskGroupSummary {
    /// Tasks spawned over the group's lifetime.
    pub spawned: u64,
    /// Tasks that panicked.
    pub panicked: u64,
}

/// A group of per-item tasks owned by one stage invocation.
///
/// Finished tasks are reaped as new ones are spawned so the group does not
/// grow with the length of the input. Dropping the group aborts whatever is
/// still running; call [`TaskGroup::join_all`] to wait instead.
pub struct TaskGroup {
    /// Label used in logs, usually the stage name.
    label: String,
    /// The running tasks.
    set: JoinSet<()>,
    spawned: u64,
    panicked: u64,
}

impl TaskGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            set: JoinSet::new(),
            spawned: 0,
            panicked: 0,
        }
    }

    /// Spawns a task on the current runtime.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();
        self.set.spawn(task);
        self.spawned += 1;
    }

    /// Waits for every task in the group.
    pub async fn join_all(mut self) -> TaskGroupSummary {
        while let Some(result) = self.set.join_next().await {
            self.record(result);
        }

        debug!(
            group = %self.label,
            spawned = self.spawned,
            panicked = self.panicked,
            "Task group joined"
        );

        TaskGroupSummary {
            spawned: self.spawned,
            panicked: self.panicked,
        }
    }

    /// Number of tasks not yet reaped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Returns true if no task is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    fn reap(&mut self) {
        while let Some(result) = self.set.try_join_next() {
            self.record(result);
        }
    }

    fn record(&mut self, result: Result<(), tokio::task::JoinError>) {
        if let Err(join_error) = result {
            self.panicked += 1;
            error!(group = %self.label, error = %join_error, "Task in group failed");
        }
    }
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("label", &self.label)
            .field("pending", &self.set.len())
            .field("spawned", &self.spawned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_all_waits_for_every_task() {
        let mut group = TaskGroup::new("test");
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..10u64 {
            let counter = Arc::clone(&counter);
            group.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10 * (i % 3))).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        let summary = group.join_all().await;
        assert_eq!(summary.spawned, 10);
        assert_eq!(summary.panicked, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_panicking_task_is_counted() {
        let mut group = TaskGroup::new("test");
        group.spawn(async {});
        group.spawn(async { panic!("Intentional panic") });

        let summary = group.join_all().await;
        assert_eq!(summary.spawned, 2);
        assert_eq!(summary.panicked, 1);
    }

    #[tokio::test]
    async fn test_empty_group() {
        let group = TaskGroup::new("empty");
        assert!(group.is_empty());
        assert_eq!(group.join_all().await, TaskGroupSummary::default());
    }
}
