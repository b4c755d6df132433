//! Stream Connection Controller.
//!
//! Runs one [`StreamMachine`] inside a dedicated tokio task. Commands from
//! the owner and completions from the transport and prober are funnelled
//! through channels into that task, so transitions are processed strictly
//! one at a time. The task owns:
//!
//! - at most one in-flight stream request (a spawned task, aborted when
//!   superseded),
//! - at most one in-flight health probe,
//! - the retry timer, a single deadline that every exit transition clears.
//!
//! Dropping the controller or calling [`StreamController::shutdown`]
//! unmounts the machine and aborts everything it started.
//!
//! # Example
//! ```no_run
//! use homecam::controller::{ControllerOptions, StreamController};
//! use homecam::probe::HttpHealthProbe;
//! use homecam::transport::HttpStreamTransport;
//! use homecam_core::clock::SystemClock;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = StreamController::spawn(
//!     Arc::new(HttpStreamTransport::new(Duration::from_secs(10))?),
//!     Arc::new(HttpHealthProbe::new(Duration::from_secs(10))?),
//!     Arc::new(SystemClock),
//!     ControllerOptions::default(),
//! );
//! controller.handle().set_device(Some("10.0.0.5"), true)?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AppError, AppResult};
use crate::probe::HealthProbe;
use crate::transport::StreamTransport;
use futures::StreamExt;
use homecam_core::backoff::RetryPolicy;
use homecam_core::clock::Clock;
use homecam_core::motion::MotionSimulator;
use homecam_core::stream::{
    ConnectionState, Effect, ProbeId, RequestId, StreamEvent, StreamMachine, StreamSnapshot,
};
use homecam_core::target::StreamTarget;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::Instrument;

/// Tunables for one controller.
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// Automatic reconnection ladder.
    pub policy: RetryPolicy,
    /// Synthetic motion indicator; `None` disables it.
    pub motion: Option<MotionSimulator>,
    /// Seed for the motion RNG; entropy when `None`.
    pub motion_seed: Option<u64>,
}

enum Command {
    Event(StreamEvent),
    Shutdown(oneshot::Sender<()>),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Event(event) => write!(f, "Event({:?})", event),
            Command::Shutdown(_) => write!(f, "Shutdown"),
        }
    }
}

/// Cloneable sender side of a controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ControllerHandle {
    fn send(&self, event: StreamEvent) -> AppResult<()> {
        self.commands
            .send(Command::Event(event))
            .map_err(|_| AppError::ControllerClosed)
    }

    /// Recompute the target from the dashboard inputs.
    ///
    /// An address that cannot form a URL is rejected and leaves the current
    /// target untouched.
    pub fn set_device(&self, address: Option<&str>, connected: bool) -> AppResult<()> {
        let target = StreamTarget::derive(address, connected)?;
        self.set_target(target)
    }

    /// Replace the target directly.
    pub fn set_target(&self, target: Option<StreamTarget>) -> AppResult<()> {
        self.send(StreamEvent::TargetChanged(target))
    }

    /// Reload the stream now, bypassing the backoff schedule.
    pub fn retry(&self) -> AppResult<()> {
        self.send(StreamEvent::ManualRetry)
    }

    /// Probe the health endpoint and reload on success. Only acts in `Error`.
    pub fn test_connection(&self) -> AppResult<()> {
        self.send(StreamEvent::TestConnection)
    }

    /// Forward an operator's console action.
    pub fn perform(&self, action: ManualAction) -> AppResult<()> {
        match action {
            ManualAction::Retry => self.retry(),
            ManualAction::TestConnection => self.test_connection(),
        }
    }
}

/// Manual action typed by an operator while watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualAction {
    /// `r` or `retry`
    Retry,
    /// `t` or `test`
    TestConnection,
}

impl std::str::FromStr for ManualAction {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        match line.trim().to_ascii_lowercase().as_str() {
            "r" | "retry" => Ok(ManualAction::Retry),
            "t" | "test" => Ok(ManualAction::TestConnection),
            other => Err(format!(
                "unknown command '{}' (r = retry, t = test connection)",
                other
            )),
        }
    }
}

/// Owner of a running stream controller task.
pub struct StreamController {
    handle: ControllerHandle,
    snapshots: watch::Receiver<StreamSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl StreamController {
    /// Start the controller task in `Idle`.
    pub fn spawn(
        transport: Arc<dyn StreamTransport>,
        prober: Arc<dyn HealthProbe>,
        clock: Arc<dyn Clock>,
        options: ControllerOptions,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let machine = StreamMachine::new(options.policy.clone());
        let (snapshot_tx, snapshots) = watch::channel(machine.snapshot());

        let motion = options.motion.map(|sim| {
            let rng = match options.motion_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            MotionTicker {
                next: Instant::now() + sim.interval(),
                sim,
                rng,
            }
        });

        let driver = Driver {
            machine,
            transport,
            prober,
            clock,
            snapshots: snapshot_tx,
            events: events_tx,
            request: None,
            probe: None,
            retry: RetryTimer::default(),
            motion,
        };

        let task = tokio::spawn(
            driver
                .run(commands_rx, events_rx)
                .instrument(tracing::info_span!("stream_controller")),
        );

        Self {
            handle: ControllerHandle {
                commands: commands_tx,
            },
            snapshots,
            task: Some(task),
        }
    }

    /// Cloneable command sender.
    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Latest published state.
    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receive every published state.
    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.snapshots.clone()
    }

    /// Unmount: cancel the retry timer and in-flight work, then stop.
    pub async fn shutdown(mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.handle.commands.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The single retry timer. Holding a deadline rather than a spawned sleeper
/// means cancelling is just clearing it.
#[derive(Debug, Default)]
struct RetryTimer {
    deadline: Option<Instant>,
}

impl RetryTimer {
    fn arm(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

struct MotionTicker {
    sim: MotionSimulator,
    rng: StdRng,
    next: Instant,
}

struct Driver {
    machine: StreamMachine,
    transport: Arc<dyn StreamTransport>,
    prober: Arc<dyn HealthProbe>,
    clock: Arc<dyn Clock>,
    snapshots: watch::Sender<StreamSnapshot>,
    events: mpsc::UnboundedSender<StreamEvent>,
    request: Option<JoinHandle<()>>,
    probe: Option<JoinHandle<()>>,
    retry: RetryTimer,
    motion: Option<MotionTicker>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<StreamEvent>,
    ) {
        tracing::debug!("stream controller started");
        loop {
            let retry_at = self.retry.deadline();
            let motion_at = self.motion.as_ref().map(|m| m.next);

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Event(event)) => self.apply(event),
                    Some(Command::Shutdown(ack)) => {
                        self.apply(StreamEvent::Unmount);
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.apply(StreamEvent::Unmount);
                        break;
                    }
                },

                Some(event) = events.recv() => self.apply(event),

                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry.cancel();
                    self.apply(StreamEvent::RetryElapsed);
                }

                _ = sleep_until(motion_at.unwrap_or_else(Instant::now)), if motion_at.is_some() => {
                    if self.roll_motion() {
                        self.apply(StreamEvent::MotionDetected);
                    }
                }
            }
        }
        tracing::debug!("stream controller stopped");
    }

    fn roll_motion(&mut self) -> bool {
        match self.motion.as_mut() {
            Some(ticker) => {
                ticker.next += ticker.sim.interval();
                ticker.sim.tick(&mut ticker.rng)
            }
            None => false,
        }
    }

    fn apply(&mut self, event: StreamEvent) {
        let failed = matches!(event, StreamEvent::LoadFailed { .. })
            && self.machine.state().outstanding_request().is_some();
        let effects = self.machine.handle(event, self.clock.now());

        let exhausted = failed
            && self.machine.state().outstanding_request().is_none()
            && self.machine.state().connection() == ConnectionState::Error
            && !self.machine.state().retry_pending();
        if exhausted {
            tracing::error!(
                host = ?self.machine.state().target().map(StreamTarget::host),
                attempts = self.machine.state().attempt_count(),
                "automatic retries exhausted; waiting for a manual retry"
            );
        }

        for effect in effects {
            self.execute(effect);
        }

        let snapshot = self.machine.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::IssueRequest { request, url } => {
                tracing::info!(request = request.0, %url, "issuing stream request");
                if let Some(previous) = self.request.take() {
                    previous.abort();
                }
                self.request = Some(self.spawn_request(request, url));
            }
            Effect::AbortRequest => {
                if let Some(task) = self.request.take() {
                    tracing::debug!("aborting in-flight stream request");
                    task.abort();
                }
            }
            Effect::ScheduleRetry { delay, attempt } => {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = ?self.machine.state().last_error().map(ToString::to_string),
                    "stream failed; retry scheduled"
                );
                self.retry.arm(delay);
            }
            Effect::CancelRetry => {
                tracing::debug!("pending retry cancelled");
                self.retry.cancel();
            }
            Effect::StartProbe { probe, url } => {
                tracing::info!(probe = probe.0, %url, "probing health endpoint");
                if let Some(previous) = self.probe.take() {
                    previous.abort();
                }
                self.probe = Some(self.spawn_probe(probe, url));
            }
            Effect::AbortProbe => {
                if let Some(task) = self.probe.take() {
                    task.abort();
                }
            }
        }
    }

    fn spawn_request(&self, request: RequestId, url: String) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let events = self.events.clone();
        tokio::spawn(
            async move {
                let failed = |reason: String| StreamEvent::LoadFailed { request, reason };
                let mut frames = match transport.open(&url).await {
                    Ok(frames) => frames,
                    Err(err) => {
                        let _ = events.send(failed(err.to_string()));
                        return;
                    }
                };

                match frames.next().await {
                    Some(Ok(_)) => {
                        let _ = events.send(StreamEvent::Loaded { request });
                    }
                    Some(Err(err)) => {
                        let _ = events.send(failed(err.to_string()));
                        return;
                    }
                    None => {
                        let _ = events.send(failed("stream closed before first frame".into()));
                        return;
                    }
                }

                let mut received: u64 = 1;
                while let Some(chunk) = frames.next().await {
                    match chunk {
                        Ok(_) => received += 1,
                        Err(err) => {
                            let _ = events.send(failed(err.to_string()));
                            return;
                        }
                    }
                }
                tracing::debug!(received, "stream ended");
                let _ = events.send(failed("stream ended".into()));
            }
            .in_current_span(),
        )
    }

    fn spawn_probe(&self, probe: ProbeId, url: String) -> JoinHandle<()> {
        let prober = Arc::clone(&self.prober);
        let events = self.events.clone();
        tokio::spawn(
            async move {
                let event = match prober.probe(&url).await {
                    Ok(report) => {
                        tracing::info!(
                            status = %report.status,
                            camera = ?report.camera,
                            "health probe succeeded"
                        );
                        StreamEvent::ProbeSucceeded { probe }
                    }
                    Err(err) => StreamEvent::ProbeFailed {
                        probe,
                        reason: err.to_string(),
                    },
                };
                let _ = events.send(event);
            }
            .in_current_span(),
        )
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Some(task) = self.request.take() {
            task.abort();
        }
        if let Some(task) = self.probe.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retry_timer_arm_and_cancel() {
        let mut timer = RetryTimer::default();
        assert!(timer.deadline().is_none());
        timer.arm(Duration::from_secs(2));
        assert_eq!(timer.deadline(), Some(Instant::now() + Duration::from_secs(2)));
        timer.cancel();
        assert!(timer.deadline().is_none());
    }

    #[test]
    fn manual_actions_parse_from_console_lines() {
        assert_eq!("r".parse(), Ok(ManualAction::Retry));
        assert_eq!(" Retry\n".parse(), Ok(ManualAction::Retry));
        assert_eq!("t".parse(), Ok(ManualAction::TestConnection));
        assert_eq!("test".parse(), Ok(ManualAction::TestConnection));
        assert!("reboot".parse::<ManualAction>().is_err());
        assert!("".parse::<ManualAction>().is_err());
    }
}
