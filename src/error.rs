//! Application error type.
//!
//! `AppError` consolidates the failures that can reach the binary: bad
//! configuration, logging setup, HTTP client construction and rejected
//! device addresses. Stream failures are absent; the stream controller
//! absorbs them and reports them through its snapshot instead.

use homecam_core::TargetError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Primary error type for the homecam application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but is semantically invalid.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Logging could not be initialized.
    #[error("Tracing initialization failed: {0}")]
    Tracing(String),

    /// HTTP client could not be built or a request failed outright.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Device address rejected or unavailable.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// The stream controller task is gone.
    #[error("stream controller has shut down")]
    ControllerClosed,
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(Box::new(err))
    }
}
