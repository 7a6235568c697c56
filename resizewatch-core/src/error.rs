use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    InvalidPath(String),

    #[error("Invalid resize options: {0}")]
    InvalidPolicy(String),

    #[error("Failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Failed to write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },

    #[error(
        "Resizing {} to {width}x{height} needs {bytes} bytes, over the {limit} byte limit",
        path.display()
    )]
    OutputTooLarge {
        path: PathBuf,
        width: u32,
        height: u32,
        bytes: u64,
        limit: u64,
    },

    #[error("Watch subscription failed: {0}")]
    WatchSubscription(String),

    #[error("File did not stabilize within {}ms: {}", timeout.as_millis(), path.display())]
    StabilizationTimeout { path: PathBuf, timeout: Duration },

    #[error("Session busy: {0}")]
    Busy(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResizeError {
    /// Per-file failures are recorded as failed results; everything else halts
    /// the operation that raised it.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            ResizeError::Decode { .. }
                | ResizeError::Write { .. }
                | ResizeError::OutputTooLarge { .. }
                | ResizeError::StabilizationTimeout { .. }
        )
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ResizeError::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ResizeError::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ResizeError>;
