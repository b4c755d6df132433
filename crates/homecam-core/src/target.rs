//! Stream target derived from a device address.
//!
//! A target exists only while the user has entered an address AND the device
//! is reachable. The port and paths are fixed by the camera server running on
//! the device.

use crate::error::TargetError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

/// Port the camera server listens on.
pub const STREAM_PORT: u16 = 8000;
/// MJPEG endpoint path.
pub const STREAM_PATH: &str = "/stream.mjpg";
/// JSON health endpoint path.
pub const HEALTH_PATH: &str = "/health";

/// Remote MJPEG endpoint on a LAN device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamTarget {
    host: String,
    port: u16,
    path: String,
}

impl StreamTarget {
    /// Build a target for `host`, validating it can be placed in a URL.
    pub fn new(host: &str) -> Result<Self, TargetError> {
        let host = normalize_host(host)?;
        Ok(Self {
            host,
            port: STREAM_PORT,
            path: STREAM_PATH.to_string(),
        })
    }

    /// Recompute the target from the dashboard inputs.
    ///
    /// Returns `Ok(None)` when the address is missing/blank or the device is
    /// not connected.
    pub fn derive(address: Option<&str>, connected: bool) -> Result<Option<Self>, TargetError> {
        match Self::require(address, connected) {
            Ok(target) => Ok(Some(target)),
            Err(TargetError::TargetUnavailable(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Like [`StreamTarget::derive`] but reports why no target exists.
    pub fn require(address: Option<&str>, connected: bool) -> Result<Self, TargetError> {
        let address = address
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .ok_or(TargetError::TargetUnavailable("no device address"))?;
        if !connected {
            return Err(TargetError::TargetUnavailable("device not connected"));
        }
        Self::new(address)
    }

    /// Host as entered (IPv6 literals without brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stream path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `http://host:port` with IPv6 literals bracketed.
    pub fn base_url(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    /// Plain stream URL used for the first request after a target appears.
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url(), self.path)
    }

    /// Stream URL with a `t` query parameter so the transport cannot serve a
    /// cached failure.
    pub fn cache_busted_url(&self, now: DateTime<Utc>) -> String {
        format!("{}?t={}", self.stream_url(), now.timestamp_millis())
    }

    /// Health endpoint on the same server.
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url(), HEALTH_PATH)
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stream_url())
    }
}

fn normalize_host(raw: &str) -> Result<String, TargetError> {
    let host = raw.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host.parse::<IpAddr>().is_ok() || is_dns_name(host) {
        Ok(host.to_ascii_lowercase())
    } else {
        Err(TargetError::InvalidHost(raw.to_string()))
    }
}

fn is_dns_name(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn derive_requires_address_and_connectivity() {
        assert_eq!(StreamTarget::derive(None, true), Ok(None));
        assert_eq!(StreamTarget::derive(Some("   "), true), Ok(None));
        assert_eq!(StreamTarget::derive(Some("10.0.0.5"), false), Ok(None));

        let target = StreamTarget::derive(Some("10.0.0.5"), true)
            .unwrap()
            .unwrap();
        assert_eq!(target.host(), "10.0.0.5");
        assert_eq!(target.port(), 8000);
        assert_eq!(target.path(), "/stream.mjpg");
    }

    #[test]
    fn require_reports_reason() {
        assert_eq!(
            StreamTarget::require(None, true),
            Err(TargetError::TargetUnavailable("no device address"))
        );
        assert_eq!(
            StreamTarget::require(Some("10.0.0.5"), false),
            Err(TargetError::TargetUnavailable("device not connected"))
        );
    }

    #[test]
    fn urls() {
        let target = StreamTarget::new("10.0.0.5").unwrap();
        assert_eq!(target.stream_url(), "http://10.0.0.5:8000/stream.mjpg");
        assert_eq!(target.health_url(), "http://10.0.0.5:8000/health");

        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            target.cache_busted_url(now),
            "http://10.0.0.5:8000/stream.mjpg?t=1700000000123"
        );
    }

    #[test]
    fn ipv6_is_bracketed() {
        let target = StreamTarget::new("[fe80::1]").unwrap();
        assert_eq!(target.host(), "fe80::1");
        assert_eq!(target.stream_url(), "http://[fe80::1]:8000/stream.mjpg");
    }

    #[test]
    fn hostnames_are_accepted_and_garbage_rejected() {
        assert!(StreamTarget::new("raspberrypi.local").is_ok());
        assert!(matches!(
            StreamTarget::new("http://10.0.0.5"),
            Err(TargetError::InvalidHost(_))
        ));
        assert!(matches!(
            StreamTarget::derive(Some("bad host"), true),
            Err(TargetError::InvalidHost(_))
        ));
    }
}
