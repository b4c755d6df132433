//! [`PersistenceGateway`] over the hosted backend's HTTP API.
//!
//! Auth goes through `/auth/v1`, tables through the REST interface at
//! `/rest/v1/{table}` with `eq.` filters, and security events through the
//! `log_security_event` remote procedure. Every request carries the
//! project's anon key; requests on behalf of a user also carry the
//! session's bearer token.

use crate::config::BackendConfig;
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use homecam_core::clock::Clock;
use homecam_core::gateway::{
    DeviceSetting, DeviceSettingUpsert, NewSystemLog, PersistenceGateway, SecurityEvent, Session,
    SystemLog, User, UserDevice,
};
use homecam_core::memory::InMemoryGateway;
use homecam_core::redact::Redacted;
use homecam_core::{GatewayError, GatewayResult};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

const DEVICE_SETTINGS: &str = "device_settings";
const SYSTEM_LOGS: &str = "system_logs";
const USER_DEVICES: &str = "user_devices";

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

/// HTTP-backed gateway.
pub struct RestGateway {
    client: reqwest::Client,
    base_url: String,
    anon_key: Redacted<String>,
    session: watch::Sender<Option<Session>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestGateway")
            .field("base_url", &self.base_url)
            .field("anon_key", &self.anon_key)
            .finish()
    }
}

impl RestGateway {
    /// Gateway for the project described by `config`.
    pub fn new(config: &BackendConfig, clock: Arc<dyn Clock>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        let (session, _) = watch::channel(None);
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            session,
            clock,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn table_url(&self, table: &str) -> String {
        self.url(&format!("/rest/v1/{}", table))
    }

    fn bearer(&self) -> String {
        self.session
            .borrow()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.inner().clone())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", self.anon_key.inner())
            .bearer_auth(self.bearer())
    }

    fn require_user(&self) -> GatewayResult<Uuid> {
        self.session
            .borrow()
            .as_ref()
            .map(|s| s.user.id)
            .ok_or(GatewayError::NotAuthenticated)
    }

    async fn send(&self, builder: RequestBuilder) -> GatewayResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_for(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> GatewayResult<T> {
        let response = self.send(builder).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn session_from(&self, token: TokenResponse) -> Session {
        let expires_at = match (token.expires_at, token.expires_in) {
            (Some(at), _) => Utc.timestamp_opt(at, 0).single(),
            (None, Some(secs)) => ChronoDuration::try_seconds(secs)
                .and_then(|ttl| self.clock.now().checked_add_signed(ttl)),
            (None, None) => None,
        };
        Session {
            user: token.user,
            access_token: token.access_token,
            expires_at,
        }
    }
}

/// Gateway for `config`: the hosted backend when configured, otherwise an
/// in-process store that forgets everything on exit.
pub fn connect(
    config: Option<&BackendConfig>,
    clock: Arc<dyn Clock>,
) -> AppResult<Arc<dyn PersistenceGateway>> {
    match config {
        Some(backend) => {
            tracing::info!(url = %backend.url, "using hosted backend");
            Ok(Arc::new(RestGateway::new(backend, clock)?))
        }
        None => {
            tracing::warn!("no backend configured; using in-memory persistence");
            Ok(Arc::new(InMemoryGateway::with_clock(clock)))
        }
    }
}

/// Map an error response to a [`GatewayError`], keeping the backend's
/// message when it sent one.
fn error_for(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Auth(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY
            if message.to_lowercase().contains("already registered")
                || message.to_lowercase().contains("invalid") =>
        {
            GatewayError::Auth(message)
        }
        StatusCode::NOT_FOUND => GatewayError::NotFound(message),
        _ => GatewayError::Backend {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl PersistenceGateway for RestGateway {
    async fn sign_up(&self, email: &str, password: &str) -> GatewayResult<()> {
        let builder = self
            .request(Method::POST, &self.url("/auth/v1/signup"))
            .json(&Credentials { email, password });
        self.send(builder).await?;
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session> {
        let builder = self
            .client
            .post(self.url("/auth/v1/token?grant_type=password"))
            .header("apikey", self.anon_key.inner())
            .json(&Credentials { email, password });
        let token: TokenResponse = self.send_json(builder).await?;
        let session = self.session_from(token);
        self.session.send_replace(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        let signed_in = self.session.borrow().is_some();
        if signed_in {
            let result = self
                .send(self.request(Method::POST, &self.url("/auth/v1/logout")))
                .await;
            if let Err(err) = result {
                tracing::warn!(error = %err, "backend logout failed; clearing local session");
            }
        }
        self.session.send_replace(None);
        Ok(())
    }

    async fn current_session(&self) -> GatewayResult<Option<Session>> {
        Ok(self.session.borrow().clone())
    }

    fn subscribe_session(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    async fn upsert_device_setting(&self, setting: DeviceSettingUpsert) -> GatewayResult<()> {
        let url = format!("{}?on_conflict=user_id,device_name", self.table_url(DEVICE_SETTINGS));
        let builder = self
            .request(Method::POST, &url)
            .header("Prefer", "resolution=merge-duplicates")
            .json(&setting);
        self.send(builder).await?;
        Ok(())
    }

    async fn device_settings(&self, user_id: Uuid) -> GatewayResult<Vec<DeviceSetting>> {
        let builder = self.request(Method::GET, &self.table_url(DEVICE_SETTINGS)).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", user_id)),
            ("order", "created_at.desc".to_string()),
        ]);
        self.send_json(builder).await
    }

    async fn insert_system_log(&self, log: NewSystemLog) -> GatewayResult<()> {
        self.require_user()?;
        let builder = self
            .request(Method::POST, &self.table_url(SYSTEM_LOGS))
            .json(&log);
        self.send(builder).await?;
        Ok(())
    }

    async fn recent_system_logs(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> GatewayResult<Vec<SystemLog>> {
        let builder = self.request(Method::GET, &self.table_url(SYSTEM_LOGS)).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", user_id)),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        self.send_json(builder).await
    }

    async fn mark_system_log_read(
        &self,
        log_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> GatewayResult<()> {
        let builder = self
            .request(Method::PATCH, &self.table_url(SYSTEM_LOGS))
            .query(&[("id", format!("eq.{}", log_id))])
            .header("Prefer", "return=representation")
            .json(&json!({ "read_at": read_at }));
        let updated: Vec<Value> = self.send_json(builder).await?;
        if updated.is_empty() {
            return Err(GatewayError::NotFound(format!("system log {}", log_id)));
        }
        Ok(())
    }

    async fn find_user_device(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> GatewayResult<Option<UserDevice>> {
        let builder = self.request(Method::GET, &self.table_url(USER_DEVICES)).query(&[
            ("select", "*".to_string()),
            ("device_id", format!("eq.{}", device_id)),
            ("user_id", format!("eq.{}", user_id)),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<UserDevice> = self.send_json(builder).await?;
        Ok(rows.into_iter().next())
    }

    async fn log_security_event(&self, event: SecurityEvent) -> GatewayResult<()> {
        let builder = self
            .request(Method::POST, &self.url("/rest/v1/rpc/log_security_event"))
            .json(&event);
        self.send(builder).await?;
        Ok(())
    }
}
