//! Unified error types for the sensor pipeline.
//!
//! Error codes:
//! - QUEUE_001-002: Queue errors
//! - MODEL_001-002: Model registry / scoring errors
//! - STORE_001: Store errors
//! - VALID_001-002: Validation and wire format errors
//! - CONFIG_001: Configuration errors

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the sensor pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Queue is at capacity; the producer decides whether to drop, retry or reject.
    #[error("[QUEUE_001] queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("[QUEUE_002] queue error: {0}")]
    Queue(String),

    #[error("[MODEL_001] unknown sensor kind: {0}")]
    UnknownSensorKind(String),

    #[error("[MODEL_002] scoring error: {0}")]
    Scoring(String),

    #[error("[STORE_001] store error: {0}")]
    Store(String),

    #[error("[VALID_001] validation error: {0}")]
    Validation(String),

    #[error("[VALID_002] serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("[CONFIG_001] configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    pub fn unknown_sensor_kind(kind: impl Into<String>) -> Self {
        Self::UnknownSensorKind(kind.into())
    }

    pub fn scoring(msg: impl Into<String>) -> Self {
        Self::Scoring(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueueFull { .. } => "QUEUE_001",
            Self::Queue(_) => "QUEUE_002",
            Self::UnknownSensorKind(_) => "MODEL_001",
            Self::Scoring(_) => "MODEL_002",
            Self::Store(_) => "STORE_001",
            Self::Validation(_) => "VALID_001",
            Self::Serialization(_) => "VALID_002",
            Self::Config(_) => "CONFIG_001",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether retrying the same operation on the same reading can succeed.
    ///
    /// Unknown kinds and malformed readings fail identically every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::Queue(_) | Self::Scoring(_) | Self::Store(_)
        )
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}
