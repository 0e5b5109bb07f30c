//! Error types for the relay.
//!
//! Covers local file handling, the remote transport (including its
//! flood-control signal), configuration and the job queue.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Represents all possible errors that can occur in the relay.
///
/// # Error Categories
///
/// - IO: Local file system operations
/// - RateLimited: The remote service asked us to back off
/// - Transport: Any other failure reported by the messaging transport
/// - Config: Invalid configuration values
/// - QueueClosed: The job queue no longer accepts work
/// - Custom: Application-specific errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Custom(String),
}

impl AppError {
    /// The wait the remote service demanded, if this is a rate-limit signal.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AppError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<&str> for AppError {
    fn from(error: &str) -> Self {
        AppError::Custom(error.to_string())
    }
}

impl From<String> for AppError {
    fn from(error: String) -> Self {
        AppError::Custom(error)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_only_for_rate_limit() {
        let limited = AppError::RateLimited {
            retry_after: Duration::from_secs(7),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(limited.to_string(), "Rate limited, retry after 7s");

        let other = AppError::Transport("boom".into());
        assert_eq!(other.retry_after(), None);
    }

    #[test]
    fn string_conversions_become_custom() {
        let err: AppError = "no media".into();
        assert_eq!(err.to_string(), "no media");
    }
}
