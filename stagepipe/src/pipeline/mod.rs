//! Pipeline building and execution.
//!
//! This module provides:
//! - A typed builder that chains stages output-to-input
//! - The runner that spawns every stage and owns stream closing
//! - Run reports

mod builder;
mod report;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use builder::{Pipeline, PipelineBuilder};
pub use report::{PipelineOutput, PipelineReport, StageReport, StageStatus};
pub use runner::RunningPipeline;
