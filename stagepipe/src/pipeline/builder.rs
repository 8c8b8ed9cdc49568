//! Typed pipeline builder.

use super::report::PipelineOutput;
use super::runner::{launcher, RunningPipeline, StageLauncher};
use crate::config::PipelineConfig;
use crate::errors::{ConfigError, PipelineError};
use crate::events::{EventSink, NoOpEventSink};
use crate::stages::Stage;
use crate::stream::{channel, Inbox};
use std::sync::Arc;

/// Entry point for building a pipeline.
///
/// The first stage added receives an empty, already-closed input stream.
#[derive(Clone)]
pub struct PipelineBuilder {
    name: String,
    config: PipelineConfig,
    events: Arc<dyn EventSink>,
}

impl PipelineBuilder {
    /// Creates a builder with default configuration and no event sink.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: PipelineConfig::default(),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn with_config(mut self, config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Sets the sink that receives lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Adds the first stage.
    pub fn stage<S: Stage>(self, stage: S) -> Pipeline<S::Output> {
        self.stage_arc(Arc::new(stage))
    }

    /// Adds a shared first stage.
    pub fn stage_arc<S: Stage>(self, stage: Arc<S>) -> Pipeline<S::Output> {
        let (output, tail) = channel(self.config.channel_capacity);
        let name = stage.name().to_string();

        Pipeline {
            name: self.name,
            config: self.config,
            events: self.events,
            stages: vec![(name, launcher(stage, 0, Inbox::closed(), output))],
            tail,
        }
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// A chain of stages whose final output type is `Out`.
///
/// Nothing runs until [`Pipeline::spawn`] or [`Pipeline::run`].
pub struct Pipeline<Out> {
    name: String,
    config: PipelineConfig,
    events: Arc<dyn EventSink>,
    stages: Vec<(String, StageLauncher)>,
    tail: Inbox<Out>,
}

impl<Out: Send + 'static> Pipeline<Out> {
    /// Appends a stage that reads this pipeline's output.
    pub fn stage<S: Stage<Input = Out>>(self, stage: S) -> Pipeline<S::Output> {
        self.stage_arc(Arc::new(stage))
    }

    /// Appends a shared stage that reads this pipeline's output.
    pub fn stage_arc<S: Stage<Input = Out>>(self, stage: Arc<S>) -> Pipeline<S::Output> {
        let (output, tail) = channel(self.config.channel_capacity);
        let index = self.stages.len();
        let name = stage.name().to_string();

        let mut stages = self.stages;
        stages.push((name, launcher(stage, index, self.tail, output)));

        Pipeline {
            name: self.name,
            config: self.config,
            events: self.events,
            stages,
            tail,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false: a pipeline has at least one stage.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Starts every stage concurrently and returns a handle to the run.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(self) -> RunningPipeline<Out> {
        RunningPipeline::start(&self.name, self.events, self.stages, self.tail)
    }

    /// Runs the pipeline to completion and collects the final output.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Join`] if a stage task cannot be joined.
    pub async fn run(self) -> Result<PipelineOutput<Out>, PipelineError> {
        self.spawn().collect().await
    }
}

impl<Out> std::fmt::Debug for Pipeline<Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &names)
            .finish()
    }
}
