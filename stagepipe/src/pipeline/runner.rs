//! Stage task driver and the handle to a running pipeline.

use super::report::{PipelineOutput, PipelineReport, StageReport, StageStatus};
use crate::errors::PipelineError;
use crate::events::{event_types, EventSink};
use crate::stages::Stage;
use crate::stream::{Inbox, Outbox};
use crate::tasks::TaskGroupSummary;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-run values shared by every stage task.
#[derive(Clone)]
pub(crate) struct StageEnv {
    pub(crate) pipeline: Arc<str>,
    pub(crate) run_id: Uuid,
    pub(crate) events: Arc<dyn EventSink>,
}

/// A stage wired to its streams, waiting for the run to start.
pub(crate) type StageLauncher = Box<dyn FnOnce(&StageEnv) -> BoxFuture<'static, StageReport> + Send>;

/// Binds a stage to its input and output streams.
pub(crate) fn launcher<S: Stage>(
    stage: Arc<S>,
    index: usize,
    input: Inbox<S::Input>,
    output: Outbox<S::Output>,
) -> StageLauncher {
    Box::new(move |env: &StageEnv| drive(stage, index, input, output, env.clone()).boxed())
}

/// Runs one stage body, then closes its output exactly once.
///
/// The body runs under `catch_unwind`; its output is closed only after the
/// body has returned or panicked, and after any unread input has been
/// drained so the upstream stage can finish.
async fn drive<S: Stage>(
    stage: Arc<S>,
    index: usize,
    mut input: Inbox<S::Input>,
    output: Outbox<S::Output>,
    env: StageEnv,
) -> StageReport {
    let name = stage.name().to_string();
    let span = info_span!(
        "stage",
        pipeline = %env.pipeline,
        run_id = %env.run_id,
        stage = %name,
        index
    );

    async move {
        env.events.try_emit(
            event_types::STAGE_STARTED,
            Some(serde_json::json!({
                "pipeline": &*env.pipeline,
                "run_id": env.run_id.to_string(),
                "stage": &name,
                "index": index,
            })),
        );
        debug!("Stage started");

        let started = Instant::now();
        let outcome = AssertUnwindSafe(stage.run(&mut input, &output))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let (subtasks, panic) = match outcome {
            Ok(summary) => (summary, None),
            Err(payload) => (TaskGroupSummary::default(), Some(panic_message(payload.as_ref()))),
        };
        if subtasks.panicked > 0 {
            warn!(
                subtasks = subtasks.spawned,
                subtask_panics = subtasks.panicked,
                "Stage sub-tasks panicked; their items were lost"
            );
        }

        let discarded = input.drain().await;
        if discarded > 0 {
            warn!(discarded, "Stage left input unread; leftovers discarded");
        }

        let items_out = output.sent();
        output.close();

        let report = StageReport {
            index,
            name,
            status: if panic.is_some() {
                StageStatus::Panicked
            } else {
                StageStatus::Completed
            },
            items_in: input.received(),
            items_out,
            discarded,
            subtasks: subtasks.spawned,
            subtask_panics: subtasks.panicked,
            duration_ms,
            panic,
        };

        let payload = Some(serde_json::json!({
            "pipeline": &*env.pipeline,
            "run_id": env.run_id.to_string(),
            "stage": &report.name,
            "items_in": report.items_in,
            "items_out": report.items_out,
            "discarded": report.discarded,
            "subtask_panics": report.subtask_panics,
            "duration_ms": report.duration_ms,
            "panic": &report.panic,
        }));

        if let Some(ref message) = report.panic {
            error!(panic = %message, "Stage panicked; output closed");
            env.events.try_emit(event_types::STAGE_PANICKED, payload);
        } else {
            info!(
                items_in = report.items_in,
                items_out = report.items_out,
                duration_ms = report.duration_ms,
                "Stage completed"
            );
            env.events.try_emit(event_types::STAGE_COMPLETED, payload);
        }

        report
    }
    .instrument(span)
    .await
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Handle to a spawned pipeline.
///
/// The final stage's output is read through this handle. The final stream
/// has a bounded buffer, so a pipeline whose last stage emits more than that
/// only finishes while the caller keeps reading; [`RunningPipeline::collect`]
/// and [`RunningPipeline::wait`] both read it to the end.
pub struct RunningPipeline<Out> {
    pipeline: Arc<str>,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    events: Arc<dyn EventSink>,
    output: Inbox<Out>,
    tasks: Vec<(String, JoinHandle<StageReport>)>,
}

impl<Out: Send + 'static> RunningPipeline<Out> {
    /// Spawns every stage task on the current tokio runtime.
    pub(crate) fn start(
        pipeline: &str,
        events: Arc<dyn EventSink>,
        stages: Vec<(String, StageLauncher)>,
        output: Inbox<Out>,
    ) -> Self {
        let env = StageEnv {
            pipeline: Arc::from(pipeline),
            run_id: Uuid::new_v4(),
            events,
        };
        let stage_names: Vec<&str> = stages.iter().map(|(name, _)| name.as_str()).collect();

        env.events.try_emit(
            event_types::PIPELINE_STARTED,
            Some(serde_json::json!({
                "pipeline": pipeline,
                "run_id": env.run_id.to_string(),
                "stages": stage_names,
            })),
        );
        info!(
            pipeline = %pipeline,
            run_id = %env.run_id,
            stages = stages.len(),
            "Pipeline started"
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let tasks = stages
            .into_iter()
            .map(|(name, launch)| (name, tokio::spawn(launch(&env))))
            .collect();

        Self {
            pipeline: env.pipeline,
            run_id: env.run_id,
            started_at,
            started,
            events: env.events,
            output,
            tasks,
        }
    }

    /// Returns the id of this run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Receives the next item from the final stage, or `None` once it closed.
    pub async fn recv(&mut self) -> Option<Out> {
        self.output.recv().await
    }

    /// Reads the final stream to the end, then waits for every stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Join`] if a stage task cannot be joined.
    pub async fn collect(mut self) -> Result<PipelineOutput<Out>, PipelineError> {
        let items = self.output.collect().await;
        let report = self.finish(0).await?;
        Ok(PipelineOutput { items, report })
    }

    /// Discards whatever the caller did not read, then waits for every stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Join`] if a stage task cannot be joined.
    pub async fn wait(mut self) -> Result<PipelineReport, PipelineError> {
        let undrained = self.output.drain().await;
        self.finish(undrained).await
    }

    async fn finish(self, undrained: u64) -> Result<PipelineReport, PipelineError> {
        let mut stages = Vec::with_capacity(self.tasks.len());
        for (name, handle) in self.tasks {
            let report = handle.await.map_err(|err| PipelineError::Join {
                stage: name,
                message: err.to_string(),
            })?;
            stages.push(report);
        }

        let report = PipelineReport {
            run_id: self.run_id,
            pipeline: self.pipeline.to_string(),
            started_at: self.started_at,
            duration_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            stages,
            undrained,
        };

        info!(
            pipeline = %report.pipeline,
            run_id = %report.run_id,
            duration_ms = report.duration_ms,
            clean = report.is_clean(),
            "Pipeline completed"
        );
        self.events.try_emit(event_types::PIPELINE_COMPLETED, Some(report.to_json()));

        Ok(report)
    }
}

impl<Out> std::fmt::Debug for RunningPipeline<Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningPipeline")
            .field("pipeline", &self.pipeline)
            .field("run_id", &self.run_id)
            .field("stages", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "<non-string panic payload>");
    }
}
