//! Camera stream authorization.
//!
//! Before a stream URL is handed out, the signed-in user must own an active
//! camera device. Every decision is recorded as a security event.

use homecam_core::gateway::{PersistenceGateway, SecurityEvent};
use homecam_core::target::StreamTarget;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Device kind a camera row must have.
pub const CAMERA_DEVICE_TYPE: &str = "camera";

/// Granted access to the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraGrant {
    /// Display name from the ownership table.
    pub device_name: String,
    /// Where to fetch the MJPEG stream.
    pub stream_url: String,
}

/// Why access was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraAccessError {
    /// No signed-in user, or the session could not be read.
    #[error("Unauthorized access to camera stream")]
    Unauthorized,

    /// The user has no active camera with the configured id.
    #[error("Access denied: Camera not found or inactive")]
    AccessDenied,

    /// Ownership lookup failed.
    #[error("Internal server error")]
    Internal,
}

impl CameraAccessError {
    /// Matching HTTP status code.
    pub fn status(&self) -> u16 {
        match self {
            CameraAccessError::Unauthorized => 401,
            CameraAccessError::AccessDenied => 403,
            CameraAccessError::Internal => 500,
        }
    }
}

/// Authorizes access to one camera device.
#[derive(Clone)]
pub struct CameraAccess {
    gateway: Arc<dyn PersistenceGateway>,
    device_id: String,
    target: StreamTarget,
}

impl CameraAccess {
    /// Guard `target`'s stream behind ownership of `device_id`.
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        device_id: impl Into<String>,
        target: StreamTarget,
    ) -> Self {
        Self {
            gateway,
            device_id: device_id.into(),
            target,
        }
    }

    /// Configured camera id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn audit(&self, action: &str, success: bool, details: serde_json::Value) {
        let event = SecurityEvent::new(action, self.device_id.as_str(), success, details);
        if let Err(err) = self.gateway.log_security_event(event).await {
            tracing::warn!(action, error = %err, "security event not recorded");
        }
    }

    /// Check the current session and return the stream location.
    pub async fn authorize(&self) -> Result<CameraGrant, CameraAccessError> {
        let session = match self.gateway.current_session().await {
            Ok(Some(session)) => session,
            lookup => {
                if let Err(err) = lookup {
                    tracing::warn!(error = %err, "session lookup failed");
                }
                tracing::warn!(device = %self.device_id, "camera requested without a session");
                self.audit("unauthorized_camera_access", false, json!({})).await;
                return Err(CameraAccessError::Unauthorized);
            }
        };
        let user_id = session.user.id;

        let device = self
            .gateway
            .find_user_device(user_id, &self.device_id)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "camera ownership check failed");
                CameraAccessError::Internal
            })?
            .filter(|d| d.device_type == CAMERA_DEVICE_TYPE && d.is_active);

        let Some(device) = device else {
            self.audit(
                "unauthorized_camera_device_access",
                false,
                json!({ "user_id": user_id, "reason": "device_not_owned_or_inactive" }),
            )
            .await;
            return Err(CameraAccessError::AccessDenied);
        };

        self.audit(
            "camera_stream_accessed",
            true,
            json!({ "device_name": device.device_name, "user_id": user_id }),
        )
        .await;
        tracing::info!(device = %self.device_id, user = %user_id, "camera stream authorized");

        Ok(CameraGrant {
            device_name: device.device_name,
            stream_url: self.target.stream_url(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_carry_http_status() {
        assert_eq!(CameraAccessError::Unauthorized.status(), 401);
        assert_eq!(CameraAccessError::AccessDenied.status(), 403);
        assert_eq!(CameraAccessError::Internal.status(), 500);
    }
}
