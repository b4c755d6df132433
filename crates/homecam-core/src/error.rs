//! Error types shared by the homecam crates.
//!
//! Stream failures are routine on a LAN device and are absorbed by the
//! stream controller; they are modelled here so the controller can record
//! the most recent one in its snapshot. Gateway and validation errors
//! surface to callers of the service layer.
//!
//! ## Error Hierarchy
//!
//! - **[`StreamError`]**: transport failure on the MJPEG stream
//!   (`StreamLoad`) or a failed health probe (`HealthProbe`).
//! - **[`TargetError`]**: no usable stream target. `TargetUnavailable` is a
//!   valid idle condition rather than a failure; `InvalidHost` rejects
//!   addresses that cannot be placed in a URL.
//! - **[`ValidationError`]**: user input rejected before any I/O happens.
//! - **[`GatewayError`]**: the persistence backend refused or could not be
//!   reached.

use thiserror::Error;

/// Failure of the stream itself or of the health endpoint next to it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Transport or content failure while loading the image stream.
    #[error("stream load failed for {url}: {reason}")]
    StreamLoad {
        /// URL of the request that failed.
        url: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Non-2xx response or timeout from the health endpoint.
    #[error("health probe failed for {url}: {reason}")]
    HealthProbe {
        /// Health endpoint that was probed.
        url: String,
        /// Human-readable cause.
        reason: String,
    },
}

impl StreamError {
    /// URL associated with this failure.
    pub fn url(&self) -> &str {
        match self {
            StreamError::StreamLoad { url, .. } | StreamError::HealthProbe { url, .. } => url,
        }
    }
}

/// Why no stream target exists.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// Address missing or device offline.
    #[error("stream target unavailable: {0}")]
    TargetUnavailable(&'static str),

    /// The address is neither an IP literal nor a DNS hostname.
    #[error("invalid device address '{0}'")]
    InvalidHost(String),
}

/// User input rejected by validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A required field was blank.
    #[error("{0} is required")]
    Required(&'static str),

    /// A field had the wrong shape.
    #[error("{field}: {message}")]
    Invalid {
        /// Field that failed.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// A numeric value fell outside its permitted range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Field that failed.
        field: &'static str,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
        /// Offending value.
        value: f64,
    },
}

/// Errors reported by a [`crate::gateway::PersistenceGateway`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The backend could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The backend rejected credentials or the session.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The operation requires a signed-in user.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The addressed row does not exist or is not visible to the caller.
    #[error("{0} not found")]
    NotFound(String),

    /// The backend answered with an error status.
    #[error("backend error ({status}): {message}")]
    Backend {
        /// HTTP-like status code.
        status: u16,
        /// Message from the backend.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

/// Convenience alias for gateway results.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_error_exposes_url() {
        let err = StreamError::StreamLoad {
            url: "http://10.0.0.5:8000/stream.mjpg".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.url(), "http://10.0.0.5:8000/stream.mjpg");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn validation_error_messages() {
        assert_eq!(
            ValidationError::Required("Device ID").to_string(),
            "Device ID is required"
        );
        let err = ValidationError::OutOfRange {
            field: "temperature",
            min: 50.0,
            max: 90.0,
            value: 95.0,
        };
        assert_eq!(err.to_string(), "temperature must be between 50 and 90, got 95");
    }

    #[test]
    fn out_of_range_compares_by_value() {
        let reading = |value| ValidationError::OutOfRange {
            field: "brightness",
            min: 0.0,
            max: 100.0,
            value,
        };
        assert_eq!(reading(150.0), reading(150.0));
        assert_ne!(reading(150.0), reading(-1.0));
    }
}
