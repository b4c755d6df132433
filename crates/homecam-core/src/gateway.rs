//! Persistence gateway abstraction.
//!
//! The hosted backend provides auth sessions, a few tables keyed by user id
//! and one remote procedure for security events. Services depend on this
//! trait only, so they run against [`crate::memory::InMemoryGateway`] in
//! tests and offline mode and against the HTTP adapter in production.

use crate::error::GatewayResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

/// Authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Backend user id.
    pub id: Uuid,
    /// Normalized email.
    pub email: String,
}

/// A signed-in session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Owner of the session.
    pub user: User,
    /// Bearer token for backend calls.
    pub access_token: String,
    /// Expiry reported by the backend.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Row of the `device_settings` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSetting {
    /// Row id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Unique per user.
    pub device_name: String,
    /// Free-form kind, `smart_device` for dashboard toggles.
    pub device_type: String,
    /// Device-specific settings object.
    pub settings: Value,
    /// Whether the device is switched on.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload for `device_settings`, keyed by `(user_id, device_name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettingUpsert {
    /// Owning user.
    pub user_id: Uuid,
    /// Unique per user.
    pub device_name: String,
    /// Free-form kind.
    pub device_type: String,
    /// Whether the device is switched on.
    pub is_active: bool,
    /// Device-specific settings object.
    pub settings: Value,
    /// Update stamp.
    pub updated_at: DateTime<Utc>,
}

/// Row of the `system_logs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemLog {
    /// Row id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Category, e.g. `security` or `device`.
    pub log_type: String,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Structured extras.
    pub metadata: Value,
    /// When the user acknowledged the entry.
    pub read_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `system_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSystemLog {
    /// Owning user.
    pub user_id: Uuid,
    /// Category.
    pub log_type: String,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Structured extras.
    pub metadata: Value,
}

/// Row of the `user_devices` ownership table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDevice {
    /// Row id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// External device identifier, e.g. `camera_001`.
    pub device_id: String,
    /// Display name.
    pub device_name: String,
    /// Kind, e.g. `camera`.
    pub device_type: String,
    /// Inactive devices may not be controlled.
    pub is_active: bool,
}

/// Arguments of the `log_security_event` remote procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Event name, e.g. `device_control_toggle`.
    #[serde(rename = "p_action")]
    pub action: String,
    /// Device concerned.
    #[serde(rename = "p_device_id")]
    pub device_id: Option<String>,
    /// Whether the attempt succeeded.
    #[serde(rename = "p_success")]
    pub success: bool,
    /// Structured details.
    #[serde(rename = "p_details")]
    pub details: Value,
}

impl SecurityEvent {
    /// Event about `device_id`.
    pub fn new(
        action: impl Into<String>,
        device_id: impl Into<String>,
        success: bool,
        details: Value,
    ) -> Self {
        Self {
            action: action.into(),
            device_id: Some(device_id.into()),
            success,
            details,
        }
    }
}

/// Backend-as-a-service operations used by the service layer.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Register a new account.
    async fn sign_up(&self, email: &str, password: &str) -> GatewayResult<()>;

    /// Exchange credentials for a session and make it current.
    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session>;

    /// End the current session.
    async fn sign_out(&self) -> GatewayResult<()>;

    /// The current session, if any.
    async fn current_session(&self) -> GatewayResult<Option<Session>>;

    /// Receive every session change.
    fn subscribe_session(&self) -> watch::Receiver<Option<Session>>;

    /// Insert or update a device setting keyed by `(user_id, device_name)`.
    async fn upsert_device_setting(&self, setting: DeviceSettingUpsert) -> GatewayResult<()>;

    /// Device settings of `user_id`, newest first.
    async fn device_settings(&self, user_id: Uuid) -> GatewayResult<Vec<DeviceSetting>>;

    /// Append a system log entry.
    async fn insert_system_log(&self, log: NewSystemLog) -> GatewayResult<()>;

    /// Newest `limit` system log entries of `user_id`.
    async fn recent_system_logs(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> GatewayResult<Vec<SystemLog>>;

    /// Stamp `read_at` on a log entry.
    async fn mark_system_log_read(
        &self,
        log_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> GatewayResult<()>;

    /// Ownership row for `device_id` belonging to `user_id`, if any.
    async fn find_user_device(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> GatewayResult<Option<UserDevice>>;

    /// Call the `log_security_event` remote procedure.
    async fn log_security_event(&self, event: SecurityEvent) -> GatewayResult<()>;
}
