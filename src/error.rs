//! Custom error types for the application.
//!
//! This module defines the primary error type, `MotionError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized way to handle the failure
//! classes of the acquisition pipeline:
//!
//! - **`Config`** / **`Configuration`**: figment extraction failures and semantic
//!   validation errors caught after loading.
//! - **`Io`**: wraps `std::io::Error`, covering file, pipe and process I/O.
//! - **`Transport`**: shared-memory ring faults (allocation, layout mismatch).
//! - **`ProducerExited`**: the sampling producer process died and the active restart
//!   policy does not allow a respawn.
//! - **`StreamFormat`**: malformed MSIG1 header or invalid declared sample rate. These
//!   are fatal and reported to the operator.
//! - **`Hardware`**: the sensor capability could not be opened or polled.
//!
//! A broken downstream pipe is not an error condition for the binary; use
//! [`MotionError::is_broken_pipe`] to classify it as a graceful shutdown.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, MotionError>;

/// Application-wide error type.
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum MotionError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Producer process exited unexpectedly (status: {0})")]
    ProducerExited(String),

    #[error("Stream format error: {0}")]
    StreamFormat(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<MotionError>),
}

impl From<figment::Error> for MotionError {
    fn from(value: figment::Error) -> Self {
        MotionError::Config(Box::new(value))
    }
}

impl From<anyhow::Error> for MotionError {
    fn from(value: anyhow::Error) -> Self {
        MotionError::Transport(format!("{value:#}"))
    }
}

impl MotionError {
    /// True when the error means the downstream reader went away.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            MotionError::Io(err) => err.kind() == std::io::ErrorKind::BrokenPipe,
            MotionError::ShutdownFailed(errors) => {
                !errors.is_empty() && errors.iter().all(MotionError::is_broken_pipe)
            }
            _ => false,
        }
    }

    /// Process exit code for this error: 0 for a vanished downstream, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_broken_pipe() {
            0
        } else {
            1
        }
    }
}
