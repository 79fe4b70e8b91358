//! Error types for chainlock

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using chainlock's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the lock coordinator
///
/// Skips, cancellations and vanished resources are not errors; they are
/// reported through [`crate::locking::LockStatus`] instead.
#[derive(Error, Debug)]
pub enum Error {
    // Chain errors (E100-E199)
    #[error("Invalid lock chain: {0}")]
    InvalidChain(String),

    // Resolution errors (E200-E299)
    #[error("Failed to resolve {level}: {message}")]
    ResolveFailed { level: String, message: String },

    // Action errors (E300-E399)
    #[error("Action failed: {0:#}")]
    ActionFailed(#[source] anyhow::Error),

    #[error("Action panicked: {0}")]
    ActionPanicked(String),

    // Dispatch errors (E400-E499)
    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Worker for request {0} exited without reporting a result")]
    WorkerLost(Uuid),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidChain(_) => "E100",
            Self::ResolveFailed { .. } => "E200",
            Self::ActionFailed(_) => "E300",
            Self::ActionPanicked(_) => "E301",
            Self::DispatchFailed(_) => "E400",
            Self::WorkerLost(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::Io(_) => "E9999",
        }
    }

    /// Build a resolution failure for the given level label
    pub fn resolve_failed(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResolveFailed {
            level: level.into(),
            message: message.into(),
        }
    }
}
