//! In-process persistence gateway.
//!
//! Mirrors the semantics of the hosted backend closely enough for tests and
//! offline runs: per-user tables, `(user_id, device_name)` upserts, newest
//! first ordering and a session broadcast. Failures can be injected with
//! [`InMemoryGateway::fail_next`] and
//! [`InMemoryGateway::fail_session_lookup`].

use crate::clock::{Clock, SystemClock};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{
    DeviceSetting, DeviceSettingUpsert, NewSystemLog, PersistenceGateway, SecurityEvent, Session,
    SystemLog, User, UserDevice,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

struct Account {
    user: User,
    password_digest: String,
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    device_settings: Vec<DeviceSetting>,
    system_logs: Vec<SystemLog>,
    user_devices: Vec<UserDevice>,
    security_events: Vec<SecurityEvent>,
    fail_next: Option<GatewayError>,
    fail_session: Option<GatewayError>,
}

/// [`PersistenceGateway`] backed by in-memory tables.
pub struct InMemoryGateway {
    tables: Mutex<Tables>,
    session: watch::Sender<Option<Session>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    /// Empty gateway on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty gateway on an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            tables: Mutex::new(Tables::default()),
            session,
            clock,
        }
    }

    /// Seed an ownership row; returns its id.
    pub fn register_device(
        &self,
        user_id: Uuid,
        device_id: &str,
        device_name: &str,
        device_type: &str,
        is_active: bool,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.tables.lock().user_devices.push(UserDevice {
            id,
            user_id,
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            device_type: device_type.to_string(),
            is_active,
        });
        id
    }

    /// Every security event recorded so far, oldest first.
    pub fn security_events(&self) -> Vec<SecurityEvent> {
        self.tables.lock().security_events.clone()
    }

    /// Make the next table or RPC call fail with `error`.
    pub fn fail_next(&self, error: GatewayError) {
        self.tables.lock().fail_next = Some(error);
    }

    /// Make the next `current_session` call fail with `error`.
    pub fn fail_session_lookup(&self, error: GatewayError) {
        self.tables.lock().fail_session = Some(error);
    }

    fn check_injected(tables: &mut Tables) -> GatewayResult<()> {
        match tables.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn digest(email: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(email.as_bytes());
        hasher.update([0u8]);
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn sign_up(&self, email: &str, password: &str) -> GatewayResult<()> {
        let mut tables = self.tables.lock();
        Self::check_injected(&mut tables)?;
        if tables.accounts.contains_key(email) {
            return Err(GatewayError::Auth("User already registered".into()));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
        };
        tables.accounts.insert(
            email.to_string(),
            Account {
                user,
                password_digest: Self::digest(email, password),
            },
        );
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<Session> {
        let session = {
            let mut tables = self.tables.lock();
            Self::check_injected(&mut tables)?;
            let account = tables
                .accounts
                .get(email)
                .filter(|a| a.password_digest == Self::digest(email, password))
                .ok_or_else(|| GatewayError::Auth("Invalid login credentials".into()))?;
            Session {
                user: account.user.clone(),
                access_token: Uuid::new_v4().simple().to_string(),
                expires_at: Some(self.now() + Duration::hours(1)),
            }
        };
        self.session.send_replace(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        self.session.send_replace(None);
        Ok(())
    }

    async fn current_session(&self) -> GatewayResult<Option<Session>> {
        if let Some(err) = self.tables.lock().fail_session.take() {
            return Err(err);
        }
        Ok(self.session.borrow().clone())
    }

    fn subscribe_session(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    async fn upsert_device_setting(&self, setting: DeviceSettingUpsert) -> GatewayResult<()> {
        let mut tables = self.tables.lock();
        Self::check_injected(&mut tables)?;
        let existing = tables
            .device_settings
            .iter_mut()
            .find(|s| s.user_id == setting.user_id && s.device_name == setting.device_name);
        match existing {
            Some(row) => {
                row.device_type = setting.device_type;
                row.is_active = setting.is_active;
                row.settings = setting.settings;
                row.updated_at = setting.updated_at;
            }
            None => {
                let created_at = self.now();
                tables.device_settings.push(DeviceSetting {
                    id: Uuid::new_v4(),
                    user_id: setting.user_id,
                    device_name: setting.device_name,
                    device_type: setting.device_type,
                    settings: setting.settings,
                    is_active: setting.is_active,
                    created_at,
                    updated_at: setting.updated_at,
                });
            }
        }
        Ok(())
    }

    async fn device_settings(&self, user_id: Uuid) -> GatewayResult<Vec<DeviceSetting>> {
        let mut tables = self.tables.lock();
        Self::check_injected(&mut tables)?;
        let mut rows: Vec<_> = tables
            .device_settings
            .iter()
            .rev()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_system_log(&self, log: NewSystemLog) -> GatewayResult<()> {
        let mut tables = self.tables.lock();
        Self::check_injected(&mut tables)?;
        let created_at = self.now();
        tables.system_logs.push(SystemLog {
            id: Uuid::new_v4(),
            user_id: log.user_id,
            log_type: log.log_type,
            title: log.title,
            message: log.message,
            metadata: log.metadata,
            read_at: None,
            created_at,
        });
        Ok(())
    }

    async fn recent_system_logs(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> GatewayResult<Vec<SystemLog>> {
        let mut tables = self.tables.lock();
        Self::check_injected(&mut tables)?;
        let mut rows: Vec<_> = tables
            .system_logs
            .iter()
            .rev()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_system_log_read(
        &self,
        log_id: Uuid,
        read_at: DateTime<Utc>,
    ) -> GatewayResult<()> {
        let mut tables = self.tables.lock();
        Self::check_injected(&mut tables)?;
        let row = tables
            .system_logs
            .iter_mut()
            .find(|l| l.id == log_id)
            .ok_or_else(|| GatewayError::NotFound(format!("system log {}", log_id)))?;
        row.read_at = Some(read_at);
        Ok(())
    }

    async fn find_user_device(
        &self,
        user_id: Uuid,
        device_id: &str,
    ) -> GatewayResult<Option<UserDevice>> {
        let mut tables = self.tables.lock();
        Self::check_injected(&mut tables)?;
        Ok(tables
            .user_devices
            .iter()
            .find(|d| d.user_id == user_id && d.device_id == device_id)
            .cloned())
    }

    async fn log_security_event(&self, event: SecurityEvent) -> GatewayResult<()> {
        let mut tables = self.tables.lock();
        Self::check_injected(&mut tables)?;
        tables.security_events.push(event);
        Ok(())
    }
}
