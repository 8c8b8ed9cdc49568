//! Event sink system for observability.
//!
//! The runner reports lifecycle events (pipeline and stage start/finish) to
//! an [`EventSink`] supplied through the pipeline builder.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the runner.
pub mod event_types {
    /// A pipeline run was spawned.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// Every stage of a pipeline run has finished.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A stage task began executing.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage body returned and its output was closed.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage body panicked; its output was still closed.
    pub const STAGE_PANICKED: &str = "stage.panicked";
}
