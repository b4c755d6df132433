//! Ownership-checked device control.
//!
//! Every command is validated, checked against the `user_devices` ownership
//! table and recorded as a security event before it is considered executed.

use homecam_core::gateway::{PersistenceGateway, SecurityEvent};
use homecam_core::validation::require_non_blank;
use homecam_core::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Inclusive thermostat range in °F.
pub const TEMPERATURE_RANGE: (f64, f64) = (50.0, 90.0);
/// Inclusive brightness range in percent.
pub const BRIGHTNESS_RANGE: (f64, f64) = (0.0, 100.0);

/// Commands a device may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAction {
    /// Switch on or off.
    Toggle,
    /// Thermostat set point.
    SetTemperature,
    /// Light level.
    SetBrightness,
    /// Arm an alarm.
    Arm,
    /// Disarm an alarm.
    Disarm,
    /// Take a snapshot.
    Capture,
}

impl DeviceAction {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceAction::Toggle => "toggle",
            DeviceAction::SetTemperature => "set_temperature",
            DeviceAction::SetBrightness => "set_brightness",
            DeviceAction::Arm => "arm",
            DeviceAction::Disarm => "disarm",
            DeviceAction::Capture => "capture",
        }
    }

    fn range(&self) -> Option<(&'static str, (f64, f64))> {
        match self {
            DeviceAction::SetTemperature => Some(("temperature", TEMPERATURE_RANGE)),
            DeviceAction::SetBrightness => Some(("brightness", BRIGHTNESS_RANGE)),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "toggle" => Ok(DeviceAction::Toggle),
            "set_temperature" => Ok(DeviceAction::SetTemperature),
            "set_brightness" => Ok(DeviceAction::SetBrightness),
            "arm" => Ok(DeviceAction::Arm),
            "disarm" => Ok(DeviceAction::Disarm),
            "capture" => Ok(DeviceAction::Capture),
            _ => Err(ValidationError::Invalid {
                field: "action",
                message: "The requested action is not allowed".to_string(),
            }),
        }
    }
}

/// A control command as submitted by the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceControlRequest {
    /// External device identifier.
    pub device_id: String,
    /// Action name, see [`DeviceAction`].
    pub action: String,
    /// Action argument; numbers may arrive as strings.
    #[serde(default)]
    pub value: Option<Value>,
    /// Kind reported by the dashboard, recorded in the audit trail.
    #[serde(default)]
    pub device_type: Option<String>,
}

impl DeviceControlRequest {
    /// Command without a value.
    pub fn new(device_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    /// Attach an argument.
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Attach the dashboard's device kind.
    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    /// Check shape and ranges before touching the backend.
    pub fn validate(&self) -> Result<DeviceAction, ValidationError> {
        require_non_blank(&self.device_id).map_err(|_| ValidationError::Required("device id"))?;
        let action: DeviceAction = self.action.parse()?;

        if let (Some((field, (min, max))), Some(value)) = (action.range(), self.value.as_ref()) {
            let number = numeric(value).ok_or_else(|| ValidationError::Invalid {
                field,
                message: format!("'{}' is not a number", value),
            })?;
            if !(min..=max).contains(&number) {
                return Err(ValidationError::OutOfRange {
                    field,
                    min,
                    max,
                    value: number,
                });
            }
        }
        Ok(action)
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// A command that went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlReceipt {
    /// Display name from the ownership table.
    pub device_name: String,
    /// Action executed.
    pub action: DeviceAction,
}

/// Why a command was refused.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    /// No signed-in user.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Rejected by validation.
    #[error("Invalid input parameters: {0}")]
    Invalid(#[from] ValidationError),

    /// The device does not belong to the user.
    #[error("Device not owned by user")]
    AccessDenied,

    /// The device is switched off in the ownership table.
    #[error("Device is inactive")]
    DeviceInactive,

    /// Backend failure while checking or recording.
    #[error("{0}")]
    Failed(String),
}

/// Executes [`DeviceControlRequest`]s for the signed-in user.
#[derive(Clone)]
pub struct SecureDeviceControl {
    gateway: Arc<dyn PersistenceGateway>,
}

impl SecureDeviceControl {
    /// Service backed by `gateway`.
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self { gateway }
    }

    async fn audit(&self, event: SecurityEvent) {
        let action = event.action.clone();
        if let Err(err) = self.gateway.log_security_event(event).await {
            tracing::warn!(%action, error = %err, "security event not recorded");
        }
    }

    /// Validate, check ownership and record `request`.
    pub async fn execute(
        &self,
        request: &DeviceControlRequest,
    ) -> Result<ControlReceipt, ControlError> {
        let session = self
            .gateway
            .current_session()
            .await
            .ok()
            .flatten()
            .ok_or(ControlError::NotAuthenticated)?;
        let action = request.validate()?;
        let device_id = request.device_id.trim();

        let device = match self.gateway.find_user_device(session.user.id, device_id).await {
            Ok(device) => device,
            Err(err) => {
                tracing::error!(device = device_id, error = %err, "device ownership check failed");
                let message = "Failed to verify device ownership".to_string();
                self.audit(SecurityEvent::new(
                    "device_control_failed",
                    device_id,
                    false,
                    json!({ "action": action.as_str(), "error": message }),
                ))
                .await;
                return Err(ControlError::Failed(message));
            }
        };

        let Some(device) = device else {
            tracing::warn!(
                device = device_id,
                user = %session.user.id,
                %action,
                "control attempt on a device the user does not own"
            );
            self.audit(SecurityEvent::new(
                "unauthorized_device_access_attempt",
                device_id,
                false,
                json!({ "action": action.as_str(), "reason": "device_not_owned" }),
            ))
            .await;
            return Err(ControlError::AccessDenied);
        };

        if !device.is_active {
            tracing::info!(device = device_id, "device inactive; command refused");
            return Err(ControlError::DeviceInactive);
        }

        self.audit(SecurityEvent::new(
            format!("device_control_{}", action),
            device_id,
            true,
            json!({
                "device_name": device.device_name,
                "action": action.as_str(),
                "value": request.value,
                "device_type": request.device_type,
            }),
        ))
        .await;

        tracing::info!(device = device_id, %action, value = ?request.value, "device controlled");
        Ok(ControlReceipt {
            device_name: device.device_name,
            action,
        })
    }
}
