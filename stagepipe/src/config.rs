//! Pipeline configuration.

use crate::errors::{ConfigError, PipelineError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for a pipeline run.
///
/// `channel_capacity` applies to every inter-stage stream. `batch_size` and
/// `max_in_flight` are read by pipelines that contain a batching or
/// bounded-concurrency stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Buffer size of each inter-stage stream.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Maximum number of items per dispatched batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum number of simultaneously in-flight bounded operations.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

const fn default_channel_capacity() -> usize {
    1
}

const fn default_batch_size() -> usize {
    2
}

const fn default_max_in_flight() -> usize {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            batch_size: default_batch_size(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the inter-stage channel capacity.
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the in-flight limit.
    #[must_use]
    pub const fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit;
        self
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first zero-valued field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::must_be_positive("channel_capacity")
                .with_fix_hint("Channels need room for at least one item; use 1 for lock-step stages."));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::must_be_positive("batch_size"));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::must_be_positive("max_in_flight"));
        }
        Ok(())
    }

    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}
