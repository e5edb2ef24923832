//! Error types for the capture pipeline.

use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors surfaced by the capture pipeline.
///
/// The variants separate the failure classes that callers react to
/// differently: capacity refusals are retryable later, connection and sink
/// failures end a session, transform faults cost a single frame.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// All capture permits are in use. Retry later or stop another session.
    #[error("capture capacity exhausted ({capacity} sessions in use)")]
    CapacityExceeded { capacity: usize },

    /// The frame source could not be reached or dropped mid-stream.
    #[error("source connection failed: {0}")]
    Connection(String),

    /// The encoder process could not be started or exited immediately.
    #[error("encoder launch failed: {0}")]
    SinkLaunch(String),

    /// The encoder process died mid-stream (broken input pipe).
    #[error("encoder write failed: {0}")]
    SinkWrite(String),

    /// A single frame's processing failed. Recoverable: the frame is dropped.
    #[error("transform '{name}' failed: {message}")]
    Transform { name: &'static str, message: String },

    /// Model files missing or unreadable. Fatal at cache-load time.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// A frame buffer did not match its declared geometry.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn sink_launch(message: impl Into<String>) -> Self {
        Self::SinkLaunch(message.into())
    }

    pub fn sink_write(message: impl Into<String>) -> Self {
        Self::SinkWrite(message.into())
    }

    pub fn transform(name: &'static str, message: impl Into<String>) -> Self {
        Self::Transform {
            name,
            message: message.into(),
        }
    }

    pub fn model_load(message: impl Into<String>) -> Self {
        Self::ModelLoad(message.into())
    }
}
