//! Unified error handling for janus.
//!
//! The error surface is deliberately small: the lock-free hot paths report
//! backpressure through return values (`bool`, `Result<(), T>`), never
//! through this enum. `JanusError` covers the non-realtime control plane,
//! where thread spawning and worker membership can actually fail.

use thiserror::Error;

/// Main error type for janus operations.
#[derive(Debug, Error)]
pub enum JanusError {
    /// I/O related errors (worker thread spawning).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Worker scheduling and membership errors.
    #[error("Scheduling error: {0}")]
    Scheduling(String),
}

/// Convenience type alias for Results using JanusError.
pub type JanusResult<T> = std::result::Result<T, JanusError>;

impl JanusError {
    /// Create a scheduling error with a custom message.
    pub fn scheduling<S: Into<String>>(msg: S) -> Self {
        JanusError::Scheduling(msg.into())
    }
}
