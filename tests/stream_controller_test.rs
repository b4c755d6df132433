//! Integration tests for the stream controller driver.
//!
//! Time is paused, so retry timers fire deterministically and the ladder
//! delays can be measured exactly on the tokio clock.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::stream::{self, StreamExt};
use homecam::controller::{ControllerOptions, ManualAction, StreamController};
use homecam::probe::{HealthProbe, HealthReport, ProbeError};
use homecam::transport::{FrameStream, StreamTransport, TransportError};
use homecam_core::backoff::RetryPolicy;
use homecam_core::clock::ManualClock;
use homecam_core::motion::MotionSimulator;
use homecam_core::stream::{ConnectionState, StreamSnapshot};
use homecam_core::target::StreamTarget;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing_test::traced_test;

/// What the next `open` call does.
#[derive(Clone, Copy, Debug)]
enum Open {
    /// Refuse the request.
    Fail,
    /// Deliver one chunk, then stay open forever.
    Stream,
    /// Deliver one chunk, then end.
    StreamThenDrop,
    /// Never answer.
    Hang,
}

struct MockTransport {
    script: Mutex<VecDeque<Open>>,
    fallback: Open,
    opened: Mutex<Vec<(String, Instant)>>,
}

impl MockTransport {
    fn new(script: impl IntoIterator<Item = Open>, fallback: Open) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            opened: Mutex::new(Vec::new()),
        })
    }

    fn urls(&self) -> Vec<String> {
        self.opened.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    fn times(&self) -> Vec<Instant> {
        self.opened.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn open(&self, url: &str) -> Result<FrameStream, TransportError> {
        self.opened
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        let step = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
        let frame = || Ok::<_, TransportError>(Bytes::from_static(b"--frame\r\n"));
        match step {
            Open::Fail => Err(TransportError::Other("connection refused".into())),
            Open::Stream => Ok(stream::once(async move { frame() })
                .chain(stream::pending())
                .boxed()),
            Open::StreamThenDrop => Ok(stream::once(async move { frame() }).boxed()),
            Open::Hang => std::future::pending().await,
        }
    }
}

struct MockProbe {
    results: Mutex<VecDeque<Result<HealthReport, ProbeError>>>,
    probed: Mutex<Vec<String>>,
}

impl MockProbe {
    fn new(results: impl IntoIterator<Item = Result<HealthReport, ProbeError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into_iter().collect()),
            probed: Mutex::new(Vec::new()),
        })
    }

    fn healthy() -> Result<HealthReport, ProbeError> {
        Ok(HealthReport {
            status: "ok".into(),
            camera: Some("active".into()),
        })
    }

    fn urls(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthProbe for MockProbe {
    async fn probe(&self, url: &str) -> Result<HealthReport, ProbeError> {
        self.probed.lock().unwrap().push(url.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ProbeError::Timeout))
    }
}

fn spawn(transport: Arc<MockTransport>, probe: Arc<MockProbe>) -> StreamController {
    spawn_with(transport, probe, None)
}

fn spawn_with(
    transport: Arc<MockTransport>,
    probe: Arc<MockProbe>,
    motion: Option<MotionSimulator>,
) -> StreamController {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    StreamController::spawn(
        transport,
        probe,
        Arc::new(clock),
        ControllerOptions {
            policy: RetryPolicy::default(),
            motion,
            motion_seed: Some(7),
        },
    )
}

async fn wait_for(
    rx: &mut watch::Receiver<StreamSnapshot>,
    what: &str,
    pred: impl FnMut(&StreamSnapshot) -> bool,
) -> StreamSnapshot {
    match tokio::time::timeout(Duration::from_secs(120), rx.wait_for(pred)).await {
        Ok(Ok(snapshot)) => snapshot.clone(),
        _ => panic!("timed out waiting for {}", what),
    }
}

fn target(host: &str) -> Option<StreamTarget> {
    Some(StreamTarget::new(host).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_first_request_uses_plain_url_and_streams() {
    let transport = MockTransport::new([Open::Stream], Open::Fail);
    let controller = spawn(transport.clone(), MockProbe::new([]));
    let mut rx = controller.subscribe();
    assert_eq!(controller.snapshot().state, ConnectionState::Idle);

    controller.handle().set_device(Some("10.0.0.5"), true).unwrap();
    let snapshot = wait_for(&mut rx, "streaming", |s| s.state == ConnectionState::Streaming).await;

    assert_eq!(snapshot.attempt_count, 0);
    assert_eq!(snapshot.host.as_deref(), Some("10.0.0.5"));
    assert_eq!(transport.urls(), vec!["http://10.0.0.5:8000/stream.mjpg".to_string()]);
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_offline_device_stays_idle() {
    let transport = MockTransport::new([], Open::Stream);
    let controller = spawn(transport.clone(), MockProbe::new([]));

    controller.handle().set_device(Some("10.0.0.5"), false).unwrap();
    controller.handle().set_device(None, true).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(controller.snapshot().state, ConnectionState::Idle);
    assert!(transport.urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_address_is_rejected() {
    let controller = spawn(MockTransport::new([], Open::Fail), MockProbe::new([]));
    assert!(controller.handle().set_device(Some("not a host"), true).is_err());
    assert_eq!(controller.snapshot().state, ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_retry_ladder_doubles_then_stops() {
    let transport = MockTransport::new([], Open::Fail);
    let controller = spawn(transport.clone(), MockProbe::new([]));
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    let snapshot = wait_for(&mut rx, "exhaustion", |s| s.needs_manual_action).await;
    assert_eq!(snapshot.state, ConnectionState::Error);
    assert_eq!(snapshot.attempt_count, 3);
    assert!(!snapshot.retry_pending);
    assert!(snapshot.last_error.is_some());

    // No fourth automatic retry, however long we wait.
    tokio::time::sleep(Duration::from_secs(60)).await;
    let times = transport.times();
    assert_eq!(times.len(), 4);

    let gaps: Vec<u128> = times.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
    for (gap, expected) in gaps.iter().zip([2000u128, 4000, 8000]) {
        assert!(
            *gap >= expected && *gap < expected + 100,
            "gap {}ms, expected {}ms",
            gap,
            expected
        );
    }

    let urls = transport.urls();
    assert!(!urls[0].contains("?t="));
    assert!(urls[1..].iter().all(|u| u.contains("/stream.mjpg?t=")));
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_retry_after_exhaustion_resets_attempts() {
    let transport = MockTransport::new(
        [Open::Fail, Open::Fail, Open::Fail, Open::Fail, Open::Stream],
        Open::Fail,
    );
    let controller = spawn(transport.clone(), MockProbe::new([]));
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("cam.local")).unwrap();
    wait_for(&mut rx, "exhaustion", |s| s.needs_manual_action).await;

    controller.handle().retry().unwrap();
    let snapshot = wait_for(&mut rx, "streaming", |s| s.state == ConnectionState::Streaming).await;
    assert_eq!(snapshot.attempt_count, 0);

    let urls = transport.urls();
    assert_eq!(urls.len(), 5);
    assert!(urls[4].starts_with("http://cam.local:8000/stream.mjpg?t="));
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_console_actions_recover_after_exhaustion() {
    let transport = MockTransport::new(
        [Open::Fail, Open::Fail, Open::Fail, Open::Fail, Open::Fail, Open::Stream],
        Open::Fail,
    );
    let probe = MockProbe::new([MockProbe::healthy()]);
    let controller = spawn(transport.clone(), probe.clone());
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    wait_for(&mut rx, "exhaustion", |s| s.needs_manual_action).await;

    // "t" probes first; the probe passes but the reload fails, so a fresh
    // ladder starts.
    let test: ManualAction = "t".parse().unwrap();
    controller.handle().perform(test).unwrap();
    wait_for(&mut rx, "fresh ladder", |s| s.retry_pending && s.attempt_count == 1).await;
    assert_eq!(probe.urls(), vec!["http://10.0.0.5:8000/health".to_string()]);
    assert_eq!(transport.urls().len(), 5);

    // "r" skips the pending backoff.
    let retry: ManualAction = "r".parse().unwrap();
    controller.handle().perform(retry).unwrap();
    wait_for(&mut rx, "streaming", |s| s.state == ConnectionState::Streaming).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.urls().len(), 6);
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_retry_cancels_pending_timer() {
    let transport = MockTransport::new([Open::Fail, Open::Stream], Open::Fail);
    let controller = spawn(transport.clone(), MockProbe::new([]));
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    wait_for(&mut rx, "retry pending", |s| s.retry_pending).await;

    controller.handle().retry().unwrap();
    wait_for(&mut rx, "streaming", |s| s.state == ConnectionState::Streaming).await;

    // The timer that was pending must not fire a third request.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.urls().len(), 2);
    assert_eq!(controller.snapshot().state, ConnectionState::Streaming);
}

#[tokio::test(start_paused = true)]
async fn test_connection_probe_success_reloads_stream() {
    let transport = MockTransport::new(
        [Open::Fail, Open::Fail, Open::Fail, Open::Fail, Open::Stream],
        Open::Fail,
    );
    let probe = MockProbe::new([MockProbe::healthy()]);
    let controller = spawn(transport.clone(), probe.clone());
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    wait_for(&mut rx, "exhaustion", |s| s.needs_manual_action).await;

    controller.handle().test_connection().unwrap();
    let snapshot = wait_for(&mut rx, "streaming", |s| s.state == ConnectionState::Streaming).await;
    assert_eq!(snapshot.attempt_count, 0);
    assert_eq!(probe.urls(), vec!["http://10.0.0.5:8000/health".to_string()]);
    assert!(transport.urls()[4].contains("?t="));
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connection_probe_failure_returns_to_error() {
    let transport = MockTransport::new([], Open::Fail);
    let probe = MockProbe::new([Err(ProbeError::Status(503))]);
    let controller = spawn(transport.clone(), probe.clone());
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    wait_for(&mut rx, "exhaustion", |s| s.needs_manual_action).await;
    let opens_before = transport.urls().len();

    controller.handle().test_connection().unwrap();
    let snapshot = wait_for(&mut rx, "probe failure", |s| {
        s.state == ConnectionState::Error
            && s.last_error.as_deref().is_some_and(|e| e.contains("health"))
    })
    .await;
    assert!(snapshot.needs_manual_action);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.urls().len(), opens_before);
    assert_eq!(probe.urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_ignored_while_streaming() {
    let transport = MockTransport::new([Open::Stream], Open::Fail);
    let probe = MockProbe::new([MockProbe::healthy()]);
    let controller = spawn(transport.clone(), probe.clone());
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    wait_for(&mut rx, "streaming", |s| s.state == ConnectionState::Streaming).await;
    controller.handle().test_connection().unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(probe.urls().is_empty());
    assert_eq!(controller.snapshot().state, ConnectionState::Streaming);
}

#[tokio::test(start_paused = true)]
async fn test_clearing_target_cancels_pending_retry() {
    let transport = MockTransport::new([Open::Fail], Open::Stream);
    let controller = spawn(transport.clone(), MockProbe::new([]));
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    wait_for(&mut rx, "retry pending", |s| s.retry_pending).await;

    controller.handle().set_device(Some("10.0.0.5"), false).unwrap();
    let snapshot = wait_for(&mut rx, "idle", |s| s.state == ConnectionState::Idle).await;
    assert!(!snapshot.retry_pending);
    assert_eq!(snapshot.attempt_count, 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_target_change_supersedes_in_flight_request() {
    let transport = MockTransport::new([Open::Hang, Open::Stream], Open::Fail);
    let controller = spawn(transport.clone(), MockProbe::new([]));
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    wait_for(&mut rx, "connecting", |s| s.state == ConnectionState::Connecting).await;

    controller.handle().set_target(target("10.0.0.6")).unwrap();
    let snapshot = wait_for(&mut rx, "streaming", |s| s.state == ConnectionState::Streaming).await;
    assert_eq!(snapshot.host.as_deref(), Some("10.0.0.6"));

    let urls = transport.urls();
    assert_eq!(urls.len(), 2);
    assert_eq!(urls[1], "http://10.0.0.6:8000/stream.mjpg");
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropped_stream_restarts_ladder() {
    let transport = MockTransport::new([Open::StreamThenDrop, Open::Stream], Open::Fail);
    let controller = spawn(transport.clone(), MockProbe::new([]));
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    let snapshot = wait_for(&mut rx, "retry after drop", |s| s.retry_pending).await;
    assert_eq!(snapshot.state, ConnectionState::Error);
    assert_eq!(snapshot.attempt_count, 1);

    let snapshot = wait_for(&mut rx, "streaming again", |s| {
        s.state == ConnectionState::Streaming && !s.retry_pending
    })
    .await;
    assert_eq!(snapshot.attempt_count, 0);

    let times = transport.times();
    assert_eq!(times.len(), 2);
    assert!((times[1] - times[0]) >= Duration::from_secs(2));
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retry() {
    let transport = MockTransport::new([], Open::Fail);
    let controller = spawn(transport.clone(), MockProbe::new([]));
    let mut rx = controller.subscribe();
    let handle = controller.handle();

    handle.set_target(target("10.0.0.5")).unwrap();
    wait_for(&mut rx, "retry pending", |s| s.retry_pending).await;

    controller.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(transport.urls().len(), 1);
    assert!(handle.retry().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_drop_aborts_in_flight_request() {
    let transport = MockTransport::new([Open::Hang], Open::Stream);
    let controller = spawn(transport.clone(), MockProbe::new([]));
    let mut rx = controller.subscribe();
    let handle = controller.handle();

    handle.set_target(target("10.0.0.5")).unwrap();
    wait_for(&mut rx, "connecting", |s| s.state == ConnectionState::Connecting).await;
    drop(controller);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(handle.retry().is_err());
    assert_eq!(transport.urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_motion_is_recorded_only_with_target() {
    let transport = MockTransport::new([], Open::Stream);
    let motion = MotionSimulator::new(Duration::from_secs(8), 1.0);
    let controller = spawn_with(transport, MockProbe::new([]), Some(motion));
    let mut rx = controller.subscribe();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(controller.snapshot().last_motion_at.is_none());

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    let snapshot = wait_for(&mut rx, "motion", |s| s.last_motion_at.is_some()).await;
    assert_eq!(snapshot.state, ConnectionState::Streaming);
    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_exhaustion_is_logged() {
    let controller = spawn(MockTransport::new([], Open::Fail), MockProbe::new([]));
    let mut rx = controller.subscribe();

    controller.handle().set_target(target("10.0.0.5")).unwrap();
    wait_for(&mut rx, "exhaustion", |s| s.needs_manual_action).await;

    assert!(logs_contain("retry scheduled"));
    assert!(logs_contain("automatic retries exhausted"));
    controller.shutdown().await;
}
