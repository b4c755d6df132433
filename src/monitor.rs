//! Device connection monitor.
//!
//! Periodically checks whether the camera device answers on its web port
//! and publishes the result as a [`MonitorState`]. Any HTTP response counts
//! as reachable; only connection failures and timeouts mark the device
//! offline. The online flag feeds the stream controller through [`link`].

use crate::controller::ControllerHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homecam_core::clock::Clock;
use homecam_core::target::StreamTarget;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Identifier published for the camera device.
pub const DEVICE_ID: &str = "pi-zero-w";
/// Display name published for the camera device.
pub const DEVICE_NAME: &str = "Raspberry Pi Zero W";

/// Reachability of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Last check got a response.
    Online,
    /// Last check failed.
    Offline,
    /// First check still running.
    Connecting,
}

/// The monitored device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiDevice {
    /// Always [`DEVICE_ID`].
    pub id: String,
    /// Always [`DEVICE_NAME`].
    pub name: String,
    /// Address being checked.
    pub ip: String,
    /// Result of the last check.
    pub status: DeviceStatus,
    /// Time of the last successful check (or first sighting).
    pub last_seen: Option<DateTime<Utc>>,
}

impl PiDevice {
    fn new(ip: &str, status: DeviceStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: DEVICE_ID.to_string(),
            name: DEVICE_NAME.to_string(),
            ip: ip.to_string(),
            status,
            last_seen: Some(now),
        }
    }
}

/// Published monitor state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorState {
    /// `None` until the first check completes.
    pub device: Option<PiDevice>,
    /// A check is in flight.
    pub checking: bool,
}

impl MonitorState {
    /// Whether the device answered the last check.
    pub fn is_online(&self) -> bool {
        matches!(&self.device, Some(d) if d.status == DeviceStatus::Online)
    }

    /// Status to display, `Connecting` before the first result.
    pub fn status(&self) -> DeviceStatus {
        match &self.device {
            Some(device) => device.status,
            None if self.checking => DeviceStatus::Connecting,
            None => DeviceStatus::Offline,
        }
    }

    fn record(&mut self, ip: &str, reachable: bool, now: DateTime<Utc>) {
        if reachable {
            self.device = Some(PiDevice::new(ip, DeviceStatus::Online, now));
        } else if let Some(device) = self.device.as_mut() {
            device.status = DeviceStatus::Offline;
        } else {
            self.device = Some(PiDevice::new(ip, DeviceStatus::Offline, now));
        }
    }
}

/// Answers whether something is listening at a URL.
#[async_trait]
pub trait Reachability: Send + Sync + 'static {
    /// `Ok` when any response arrived.
    async fn check(&self, url: &str) -> Result<(), String>;
}

/// [`Reachability`] via an HTTP `HEAD` request.
#[derive(Debug, Clone)]
pub struct HttpReachability {
    client: reqwest::Client,
}

impl HttpReachability {
    /// Checker that gives up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Reachability for HttpReachability {
    async fn check(&self, url: &str) -> Result<(), String> {
        self.client
            .head(url)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Background task that keeps a [`MonitorState`] current.
pub struct DeviceMonitor {
    state: watch::Receiver<MonitorState>,
    refresh: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl DeviceMonitor {
    /// Check `target` now and then every `interval`.
    pub fn spawn(
        target: StreamTarget,
        reach: Arc<dyn Reachability>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        let (state_tx, state) = watch::channel(MonitorState::default());
        let refresh = Arc::new(Notify::new());
        let notified = Arc::clone(&refresh);

        let task = tokio::spawn(async move {
            let url = target.base_url();
            let ip = target.host().to_string();
            tracing::info!(%url, interval_secs = interval.as_secs(), "starting device checks");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = notified.notified() => {
                        ticker.reset();
                    }
                }

                state_tx.send_modify(|s| s.checking = true);
                let result = reach.check(&url).await;
                if let Err(reason) = &result {
                    tracing::warn!(%url, %reason, "device check failed");
                }
                let reachable = result.is_ok();
                let now = clock.now();
                state_tx.send_modify(|s| {
                    let was_online = s.is_online();
                    s.record(&ip, reachable, now);
                    s.checking = false;
                    if was_online != s.is_online() {
                        tracing::info!(
                            host = %ip,
                            online = s.is_online(),
                            "device connectivity changed"
                        );
                    }
                });
            }
        });

        Self {
            state,
            refresh,
            task: Some(task),
        }
    }

    /// Latest state.
    pub fn state(&self) -> MonitorState {
        self.state.borrow().clone()
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state.clone()
    }

    /// Run a check now instead of waiting for the next tick.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// Stop checking.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        tracing::debug!("device checks stopped");
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Forward the monitor's connectivity into a stream controller until either
/// side goes away.
pub fn link(monitor: &DeviceMonitor, controller: ControllerHandle) -> JoinHandle<()> {
    let mut states = monitor.subscribe();
    tokio::spawn(async move {
        let mut last: Option<(String, bool)> = None;
        loop {
            let current = {
                let state = states.borrow_and_update();
                state
                    .device
                    .as_ref()
                    .map(|d| (d.ip.clone(), d.status == DeviceStatus::Online))
            };
            if let Some(current) = current {
                if last.as_ref() != Some(&current) {
                    if let Err(err) = controller.set_device(Some(&current.0), current.1) {
                        tracing::debug!(error = %err, "controller no longer accepts updates");
                        break;
                    }
                    last = Some(current);
                }
            }
            if states.changed().await.is_err() {
                break;
            }
        }
    })
}
