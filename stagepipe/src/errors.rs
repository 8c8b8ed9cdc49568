//! Error types for the stagepipe engine.
//!
//! Per-item failures never surface here as pipeline failures: stages absorb
//! [`ServiceError`]s locally and the item simply goes missing from the output.
//! [`PipelineError`] is reserved for configuration and task-join problems.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for stagepipe operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A stage task could not be joined.
    #[error("Stage task join error for '{stage}': {message}")]
    Join {
        /// The stage whose task failed to join.
        stage: String,
        /// The join error message.
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when a configuration value is out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Invalid '{field}': {message}")]
pub struct ConfigError {
    /// The offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Error for a value that must be at least one.
    #[must_use]
    pub fn must_be_positive(field: impl Into<String>) -> Self {
        Self::new(field, "must be at least 1").with_fix_hint("Use a value of 1 or greater.")
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("field".to_string(), serde_json::json!(self.field));
        map.insert("message".to_string(), serde_json::json!(self.message));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        map
    }
}

/// Failure reported by an external collaborator (lookup, batch fetch, check).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The requested entity does not exist.
    #[error("Not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },

    /// The input was rejected before doing any work.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A batched call received more items than the collaborator accepts.
    #[error("Batch too large: {size} items (max {max})")]
    BatchTooLarge {
        /// Size of the rejected batch.
        size: usize,
        /// Maximum accepted size.
        max: usize,
    },

    /// The collaborator's concurrent request limit was exceeded.
    #[error("Too many requests (limit {limit})")]
    TooManyRequests {
        /// The concurrent request limit.
        limit: usize,
    },

    /// The collaborator is unavailable.
    #[error("Service unavailable: {reason}")]
    Unavailable {
        /// The reason.
        reason: String,
    },
}

impl ServiceError {
    /// Creates a not found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Short machine-readable kind, used as a structured log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidInput { .. } => "invalid_input",
            Self::BatchTooLarge { .. } => "batch_too_large",
            Self::TooManyRequests { .. } => "too_many_requests",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// Returned by [`crate::stream::Outbox::send`] when the consumer is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Downstream stream is closed")]
pub struct StreamClosed;
