//! MJPEG stream transport.
//!
//! The controller only needs to know when the first bytes of a stream arrive
//! and when the stream dies. [`StreamTransport`] hides how the stream is
//! fetched so tests can substitute scripted transports.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use thiserror::Error;

/// Body chunks of an open stream.
pub type FrameStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Why a stream could not be opened or stopped delivering.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Server answered with a non-success status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Server answered with something other than a multipart stream.
    #[error("unexpected content type '{0}'")]
    ContentType(String),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Anything else (used by non-HTTP transports).
    #[error("{0}")]
    Other(String),
}

/// Fetches a stream URL.
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Open `url`, resolving once the response has been accepted.
    async fn open(&self, url: &str) -> Result<FrameStream, TransportError>;
}

/// Content type served by the camera for MJPEG.
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace";

/// [`StreamTransport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpStreamTransport {
    client: reqwest::Client,
}

impl HttpStreamTransport {
    /// Client with a bounded connect phase; the body itself is unbounded.
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn open(&self, url: &str) -> Result<FrameStream, TransportError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type
            .to_ascii_lowercase()
            .starts_with(MJPEG_CONTENT_TYPE)
        {
            return Err(TransportError::ContentType(content_type));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed())
    }
}
