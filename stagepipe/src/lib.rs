//! # Stagepipe
//!
//! Typed, multi-stage concurrent pipelines over tokio channels.
//!
//! A pipeline is a chain of stages. Every stage runs as its own task, reads
//! one bounded stream and writes the next, and the runner closes each stream
//! once its producer is done. Stages include:
//!
//! - **Dedup**: resolve inputs concurrently and keep one record per identity
//! - **Batch**: group items into fixed-size batches for a batched lookup
//! - **Bounded**: apply an operation with a cap on simultaneous calls
//! - **Aggregate**: collect everything, sort, and emit in order
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagepipe::prelude::*;
//!
//! let output = PipelineBuilder::new("numbers")
//!     .stage(SourceStage::new("source", vec![3u32, 1, 2]))
//!     .stage(FnStage::new("double", |x: u32| Some(x * 2)))
//!     .stage(AggregateStage::sorted("sort", |a: &u32, b: &u32| a.cmp(b)))
//!     .run()
//!     .await?;
//!
//! assert_eq!(output.items, vec![2, 4, 6]);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod stream;
pub mod tasks;
pub mod testing;

#[cfg(feature = "spam")]
pub mod spam;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::errors::{ConfigError, PipelineError, ServiceError, StreamClosed};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat, TracingConfig};
    pub use crate::pipeline::{
        Pipeline, PipelineBuilder, PipelineOutput, PipelineReport, RunningPipeline, StageReport,
        StageStatus,
    };
    pub use crate::stages::{
        AggregateStage, BatchFetcher, BatchStage, BoundedStage, DedupStage, Flagged, FlaggedFirst,
        FnStage, Identified, IdentityResolver, ItemOperation, OrderPolicy, SourceStage, Stage,
    };
    pub use crate::stream::{channel, Inbox, Outbox};
    pub use crate::tasks::{TaskGroup, TaskGroupSummary};
}
