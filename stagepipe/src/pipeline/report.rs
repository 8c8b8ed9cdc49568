//! Run reports produced by the pipeline runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How a stage task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage body returned normally.
    Completed,
    /// The stage body panicked.
    Panicked,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Panicked => write!(f, "panicked"),
        }
    }
}

/// What one stage did during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Position in the pipeline, starting at 0.
    pub index: usize,
    /// Stage name.
    pub name: String,
    /// How the stage ended.
    pub status: StageStatus,
    /// Items the stage read from its input.
    pub items_in: u64,
    /// Items written to its output, including by spawned tasks.
    pub items_out: u64,
    /// Items left unread by the stage and drained by the runner.
    pub discarded: u64,
    /// Tasks the stage spawned for its items or batches.
    #[serde(default)]
    pub subtasks: u64,
    /// Spawned tasks that panicked; their items never reached the output.
    #[serde(default)]
    pub subtask_panics: u64,
    /// Wall time of the stage body in milliseconds.
    pub duration_ms: f64,
    /// Panic message, if the stage panicked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panic: Option<String>,
}

impl StageReport {
    /// Returns true if the stage completed without panicking.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// Summary of a whole pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// When the run was spawned.
    pub started_at: DateTime<Utc>,
    /// Wall time from spawn until the last stage finished, in milliseconds.
    pub duration_ms: f64,
    /// Per-stage reports, in pipeline order.
    pub stages: Vec<StageReport>,
    /// Final-stage items the caller never read, discarded by `wait`.
    pub undrained: u64,
}

impl PipelineReport {
    /// Returns true if every stage and every task it spawned completed, and
    /// nothing was discarded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.undrained == 0
            && self
                .stages
                .iter()
                .all(|s| s.is_success() && s.discarded == 0 && s.subtask_panics == 0)
    }

    /// Looks up a stage report by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Stages that panicked.
    pub fn panicked(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|s| !s.is_success())
    }

    /// Converts to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Everything the final stage emitted, plus the run report.
#[derive(Debug)]
pub struct PipelineOutput<T> {
    /// Final-stage items in the order they were received.
    pub items: Vec<T>,
    /// The run report.
    pub report: PipelineReport,
}
