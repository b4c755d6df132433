//! Per-user activity log and device settings.

use homecam_core::clock::Clock;
use homecam_core::gateway::{
    DeviceSetting, DeviceSettingUpsert, NewSystemLog, PersistenceGateway, Session, SystemLog,
};
use homecam_core::validation::require_non_blank;
use homecam_core::{GatewayError, ValidationError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Entries returned by [`SystemLogService::recent`].
pub const RECENT_LOG_LIMIT: usize = 20;
/// Kind recorded for settings written from the dashboard.
pub const SMART_DEVICE_TYPE: &str = "smart_device";

/// Failure of an activity operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActivityError {
    /// No signed-in user.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Rejected by validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backend failure.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

async fn require_session(gateway: &dyn PersistenceGateway) -> Result<Session, ActivityError> {
    gateway
        .current_session()
        .await?
        .ok_or(ActivityError::NotAuthenticated)
}

fn required<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ActivityError> {
    require_non_blank(value).map_err(|_| ValidationError::Required(field).into())
}

/// The `system_logs` table of the signed-in user.
#[derive(Clone)]
pub struct SystemLogService {
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
}

impl SystemLogService {
    /// Service backed by `gateway`, stamping times from `clock`.
    pub fn new(gateway: Arc<dyn PersistenceGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { gateway, clock }
    }

    /// Append an entry; `metadata` defaults to an empty object.
    pub async fn add(
        &self,
        log_type: &str,
        title: &str,
        message: &str,
        metadata: Option<Value>,
    ) -> Result<(), ActivityError> {
        let session = require_session(self.gateway.as_ref()).await?;
        let log_type = required(log_type, "log type")?;
        let title = required(title, "log title")?;

        self.gateway
            .insert_system_log(NewSystemLog {
                user_id: session.user.id,
                log_type: log_type.to_string(),
                title: title.to_string(),
                message: message.trim().to_string(),
                metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
            })
            .await?;
        tracing::debug!(log_type, title, "system log added");
        Ok(())
    }

    /// Acknowledge the entry with id `log_id`.
    pub async fn mark_as_read(&self, log_id: &str) -> Result<(), ActivityError> {
        let log_id = required(log_id, "log id")?;
        let id = Uuid::parse_str(log_id).map_err(|e| ValidationError::Invalid {
            field: "log id",
            message: e.to_string(),
        })?;
        self.gateway.mark_system_log_read(id, self.clock.now()).await?;
        Ok(())
    }

    /// The newest entries, newest first.
    pub async fn recent(&self) -> Result<Vec<SystemLog>, ActivityError> {
        let session = require_session(self.gateway.as_ref()).await?;
        Ok(self
            .gateway
            .recent_system_logs(session.user.id, RECENT_LOG_LIMIT)
            .await?)
    }
}

/// The `device_settings` table of the signed-in user.
#[derive(Clone)]
pub struct DeviceSettingsService {
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
}

impl DeviceSettingsService {
    /// Service backed by `gateway`, stamping times from `clock`.
    pub fn new(gateway: Arc<dyn PersistenceGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { gateway, clock }
    }

    /// Create or replace the setting named `device_name`.
    pub async fn update(
        &self,
        device_name: &str,
        is_active: bool,
        settings: Option<Value>,
    ) -> Result<(), ActivityError> {
        let session = require_session(self.gateway.as_ref()).await?;
        let device_name = required(device_name, "device name")?;

        self.gateway
            .upsert_device_setting(DeviceSettingUpsert {
                user_id: session.user.id,
                device_name: device_name.to_string(),
                device_type: SMART_DEVICE_TYPE.to_string(),
                is_active,
                settings: settings.unwrap_or_else(|| Value::Object(Default::default())),
                updated_at: self.clock.now(),
            })
            .await
            .inspect_err(|err| {
                tracing::warn!(device_name, error = %err, "device setting not saved")
            })?;
        Ok(())
    }

    /// All settings, newest first.
    pub async fn list(&self) -> Result<Vec<DeviceSetting>, ActivityError> {
        let session = require_session(self.gateway.as_ref()).await?;
        Ok(self.gateway.device_settings(session.user.id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homecam_core::clock::ManualClock;
    use homecam_core::memory::InMemoryGateway;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    async fn signed_in() -> (Arc<InMemoryGateway>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        let gateway = Arc::new(InMemoryGateway::with_clock(Arc::new(clock.clone())));
        gateway.sign_up("owner@example.com", "Camera#Watch42").await.unwrap();
        gateway.sign_in("owner@example.com", "Camera#Watch42").await.unwrap();
        (gateway, clock)
    }

    #[tokio::test]
    async fn add_requires_session() {
        let gateway = Arc::new(InMemoryGateway::new());
        let logs = SystemLogService::new(gateway, Arc::new(homecam_core::clock::SystemClock));
        assert_eq!(
            logs.add("security", "Door", "opened", None).await,
            Err(ActivityError::NotAuthenticated)
        );
    }

    #[tokio::test]
    async fn add_trims_and_defaults_metadata() {
        let (gateway, clock) = signed_in().await;
        let logs = SystemLogService::new(gateway, Arc::new(clock));
        logs.add("  device ", " Lamp ", "  switched on  ", None).await.unwrap();

        let recent = logs.recent().await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].log_type, "device");
        assert_eq!(recent[0].title, "Lamp");
        assert_eq!(recent[0].message, "switched on");
        assert_eq!(recent[0].metadata, json!({}));
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let (gateway, clock) = signed_in().await;
        let logs = SystemLogService::new(gateway, Arc::new(clock));
        assert_eq!(
            logs.add("device", "   ", "", None).await,
            Err(ActivityError::Validation(ValidationError::Required("log title")))
        );
    }

    #[tokio::test]
    async fn recent_is_capped_and_newest_first() {
        let (gateway, clock) = signed_in().await;
        let logs = SystemLogService::new(gateway, Arc::new(clock.clone()));
        for i in 0..25 {
            clock.advance(chrono::Duration::seconds(1));
            logs.add("device", &format!("event {}", i), "", None).await.unwrap();
        }
        let recent = logs.recent().await.unwrap();
        assert_eq!(recent.len(), RECENT_LOG_LIMIT);
        assert_eq!(recent[0].title, "event 24");
    }

    #[tokio::test]
    async fn mark_as_read_stamps_now() {
        let (gateway, clock) = signed_in().await;
        let logs = SystemLogService::new(gateway, Arc::new(clock.clone()));
        logs.add("security", "Motion", "", Some(json!({"zone": 1}))).await.unwrap();
        let id = logs.recent().await.unwrap()[0].id;

        clock.advance(chrono::Duration::minutes(5));
        logs.mark_as_read(&id.to_string()).await.unwrap();
        let entry = &logs.recent().await.unwrap()[0];
        assert_eq!(entry.read_at, Some(clock.now()));

        assert!(matches!(
            logs.mark_as_read(" ").await,
            Err(ActivityError::Validation(ValidationError::Required("log id")))
        ));
    }

    #[tokio::test]
    async fn settings_upsert_by_name() {
        let (gateway, clock) = signed_in().await;
        let settings = DeviceSettingsService::new(gateway, Arc::new(clock.clone()));
        settings.update(" Porch Light ", true, None).await.unwrap();
        clock.advance(chrono::Duration::seconds(10));
        settings
            .update("Porch Light", false, Some(json!({"brightness": 40})))
            .await
            .unwrap();

        let rows = settings.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device_type, SMART_DEVICE_TYPE);
        assert!(!rows[0].is_active);
        assert_eq!(rows[0].settings, json!({"brightness": 40}));
        assert_eq!(rows[0].updated_at, clock.now());
    }
}
