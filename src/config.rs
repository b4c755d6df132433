//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/homecam.toml` (base configuration)
//! 2. Environment variables prefixed with `HOMECAM_`, nested keys separated
//!    by a double underscore (e.g. `HOMECAM_MONITOR__ADDRESS=10.0.0.5`)
//!
//! Every tunable has a default, so an empty file (or no file) yields a
//! usable configuration with the in-memory gateway.
//!
//! # Example
//! ```no_run
//! use homecam::config::HomecamConfig;
//!
//! let config = HomecamConfig::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), figment::Error>(())
//! ```

use crate::error::{AppError, AppResult};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use homecam_core::backoff::RetryPolicy;
use homecam_core::motion::MotionSimulator;
use homecam_core::redact::Redacted;
use homecam_core::validation::require_non_blank;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/homecam.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HomecamConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Stream controller settings
    #[serde(default)]
    pub stream: StreamConfig,
    /// Device reachability monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Hosted backend settings; absent means in-memory persistence
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    /// Camera authorization settings
    #[serde(default)]
    pub camera: CameraConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Stream controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Automatic retries before waiting for a manual action
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds; doubles per attempt
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Health probe timeout in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Seconds between synthetic motion rolls (0 disables)
    #[serde(default = "default_motion_interval")]
    pub motion_interval_secs: u64,
    /// Chance of synthetic motion per roll
    #[serde(default = "default_motion_probability")]
    pub motion_probability: f64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            probe_timeout_ms: default_probe_timeout(),
            motion_interval_secs: default_motion_interval(),
            motion_probability: default_motion_probability(),
        }
    }
}

impl StreamConfig {
    /// Retry policy described by this section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }

    /// Health probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Motion simulator, or `None` when disabled.
    pub fn motion(&self) -> Option<MotionSimulator> {
        (self.motion_interval_secs > 0).then(|| {
            MotionSimulator::new(
                Duration::from_secs(self.motion_interval_secs),
                self.motion_probability,
            )
        })
    }
}

/// Device reachability monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Device address (IP or hostname); may be given on the command line instead
    #[serde(default)]
    pub address: Option<String>,
    /// Seconds between reachability checks
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Reachability check timeout in milliseconds
    #[serde(default = "default_check_timeout")]
    pub check_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            address: None,
            check_interval_secs: default_check_interval(),
            check_timeout_ms: default_check_timeout(),
        }
    }
}

impl MonitorConfig {
    /// Interval between checks.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Per-check timeout.
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

/// Hosted backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://project.example.co`
    pub url: String,
    /// Public API key sent as `apikey`
    pub anon_key: Redacted<String>,
    /// Request timeout in milliseconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_ms: u64,
}

/// Camera authorization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Device id of the camera in the ownership table
    #[serde(default = "default_camera_id")]
    pub device_id: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_id: default_camera_id(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "homecam".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    2000
}

fn default_probe_timeout() -> u64 {
    10_000
}

fn default_motion_interval() -> u64 {
    8
}

fn default_motion_probability() -> f64 {
    0.3
}

fn default_check_interval() -> u64 {
    30
}

fn default_check_timeout() -> u64 {
    5000
}

fn default_backend_timeout() -> u64 {
    10_000
}

fn default_camera_id() -> String {
    "camera_001".to_string()
}

impl HomecamConfig {
    /// Load configuration from `config/homecam.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `HOMECAM_`.
    /// Example: `HOMECAM_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// Load from `path` and reject semantically invalid settings.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::load_from(path)?;
        config.validate().map_err(AppError::Configuration)?;
        Ok(config)
    }

    /// The provider stack, exposed so callers can layer further overrides.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("HOMECAM_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.stream.base_delay_ms == 0 && self.stream.max_attempts > 0 {
            return Err(
                "stream.base_delay_ms must be greater than 0 when retries are enabled".into(),
            );
        }

        if self.stream.probe_timeout_ms == 0 {
            return Err("stream.probe_timeout_ms must be greater than 0".into());
        }

        if !(0.0..=1.0).contains(&self.stream.motion_probability) {
            return Err(format!(
                "Invalid stream.motion_probability {}. Must be 0.0-1.0",
                self.stream.motion_probability
            ));
        }

        if self.monitor.check_interval_secs == 0 {
            return Err("monitor.check_interval_secs must be greater than 0".into());
        }

        if self.monitor.check_timeout_ms == 0 {
            return Err("monitor.check_timeout_ms must be greater than 0".into());
        }

        if let Some(address) = &self.monitor.address {
            homecam_core::target::StreamTarget::new(address).map_err(|e| e.to_string())?;
        }

        if let Some(backend) = &self.backend {
            if !(backend.url.starts_with("http://") || backend.url.starts_with("https://")) {
                return Err(format!(
                    "Invalid backend.url '{}'. Must start with http:// or https://",
                    backend.url
                ));
            }
            require_non_blank(backend.anon_key.inner())
                .map_err(|_| "backend.anon_key cannot be empty".to_string())?;
        }

        require_non_blank(&self.camera.device_id)
            .map_err(|_| "camera.device_id cannot be empty".to_string())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = HomecamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream.retry_policy(), RetryPolicy::default());
        assert_eq!(config.stream.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.monitor.check_interval(), Duration::from_secs(30));
        assert_eq!(config.monitor.check_timeout(), Duration::from_secs(5));
        assert!(config.backend.is_none());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [application]
            name = "Porch"
            log_level = "debug"

            [monitor]
            address = "10.0.0.5"

            [backend]
            url = "https://project.example.co"
            anon_key = "public-anon-key"
            "#
        )
        .unwrap();

        let config = HomecamConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "Porch");
        assert_eq!(config.monitor.address.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.stream.max_attempts, 3);
        let backend = config.backend.as_ref().unwrap();
        assert_eq!(backend.anon_key.inner(), "public-anon-key");
        assert_eq!(format!("{:?}", backend.anon_key), "[REDACTED]");
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_missing_file_yields_defaults() {
        let config = HomecamConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.application.name, "homecam");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("homecam.toml", "[monitor]\naddress = \"10.0.0.5\"\n")?;
            jail.set_env("HOMECAM_MONITOR__ADDRESS", "10.0.0.9");
            jail.set_env("HOMECAM_STREAM__MAX_ATTEMPTS", "5");
            let config = HomecamConfig::load_from("homecam.toml")?;
            assert_eq!(config.monitor.address.as_deref(), Some("10.0.0.9"));
            assert_eq!(config.stream.max_attempts, 5);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_load_validated_rejects_bad_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[stream]\nmotion_probability = 2.0").unwrap();
        let err = HomecamConfig::load_validated(file.path()).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = HomecamConfig::default();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_address_and_probability() {
        let mut config = HomecamConfig::default();
        config.monitor.address = Some("not a host".into());
        assert!(config.validate().is_err());

        let mut config = HomecamConfig::default();
        config.stream.motion_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_requires_http_url() {
        let mut config = HomecamConfig::default();
        config.backend = Some(BackendConfig {
            url: "ftp://nope".into(),
            anon_key: Redacted::new("k".into()),
            timeout_ms: 1000,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_motion_can_be_disabled() {
        let mut config = HomecamConfig::default();
        assert!(config.stream.motion().is_some());
        config.stream.motion_interval_secs = 0;
        assert!(config.stream.motion().is_none());
    }
}
