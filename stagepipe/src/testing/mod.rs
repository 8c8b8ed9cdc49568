//! Testing utilities for stagepipe stages and pipelines.
//!
//! This module provides:
//! - A harness that runs one stage over a fixed input
//! - A concurrency probe for measuring simultaneous operations
//! - A recording batch fetcher

mod probes;

pub use probes::{ConcurrencyProbe, ProbeGuard, RecordingFetcher};

use crate::stages::Stage;
use crate::stream::channel;
use crate::tasks::TaskGroupSummary;

/// Runs a single stage over `items` and returns everything it emitted.
///
/// The input stream is pre-filled and closed before the stage starts; the
/// output is drained concurrently, so stages may emit any amount.
pub async fn run_stage<S: Stage>(stage: S, items: Vec<S::Input>) -> Vec<S::Output> {
    run_stage_with_summary(stage, items).await.0
}

/// Like [`run_stage`], also returning the stage's sub-task summary.
pub async fn run_stage_with_summary<S: Stage>(
    stage: S,
    items: Vec<S::Input>,
) -> (Vec<S::Output>, TaskGroupSummary) {
    let (feed, mut input) = channel(items.len());
    for item in items {
        if feed.send(item).await.is_err() {
            break;
        }
    }
    feed.close();

    let (output, mut rx) = channel(1);
    let collector = tokio::spawn(async move { rx.collect().await });

    let summary = stage.run(&mut input, &output).await;
    output.close();

    (collector.await.unwrap_or_default(), summary)
}
