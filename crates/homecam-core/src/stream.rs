//! Stream connection state machine.
//!
//! The machine is a pure function from `(state, event)` to
//! `(next state, effects)`. It never performs I/O or sleeps itself: the
//! caller executes the returned [`Effect`]s (issue a request, arm or cancel
//! the retry timer, start a health probe) and feeds the outcomes back as
//! [`StreamEvent`]s.
//!
//! ```text
//!            target set                 load ok
//!   Idle ───────────────▶ Connecting ───────────▶ Streaming
//!    ▲                     ▲    │                    │
//!    │ target cleared      │    │ load failed        │ load failed
//!    │                     │    ▼                    │
//!    └──────────────────── Error ◀───────────────────┘
//!          retry timer / manual retry / probe ok ──▶ Connecting
//! ```
//!
//! Every request and probe carries an id; completions for anything other
//! than the outstanding id are stale and ignored. That, together with the
//! `retry_pending` flag, guarantees at most one request and one timer.

use crate::backoff::RetryPolicy;
use crate::error::StreamError;
use crate::target::StreamTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifies one issued stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Identifies one health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeId(pub u64);

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No target; nothing outstanding.
    #[default]
    Idle,
    /// A request or health probe is outstanding.
    Connecting,
    /// Frames are arriving.
    Streaming,
    /// The last request or probe failed.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The derived target changed (address edited or connectivity flipped).
    TargetChanged(Option<StreamTarget>),
    /// The first frame of `request` arrived.
    Loaded {
        /// Request that loaded.
        request: RequestId,
    },
    /// `request` failed or its stream ended.
    LoadFailed {
        /// Request that failed.
        request: RequestId,
        /// Cause reported by the transport.
        reason: String,
    },
    /// The scheduled retry timer fired.
    RetryElapsed,
    /// User asked to reload the stream now.
    ManualRetry,
    /// User asked to probe the health endpoint before reloading.
    TestConnection,
    /// The health probe answered 2xx.
    ProbeSucceeded {
        /// Probe that succeeded.
        probe: ProbeId,
    },
    /// The health probe failed or timed out.
    ProbeFailed {
        /// Probe that failed.
        probe: ProbeId,
        /// Cause reported by the prober.
        reason: String,
    },
    /// Synthetic motion was detected.
    MotionDetected,
    /// The owner is going away; nothing may happen afterwards.
    Unmount,
}

/// Side effects the owner must perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a stream request, superseding any in-flight one.
    IssueRequest {
        /// Id to report back in `Loaded`/`LoadFailed`.
        request: RequestId,
        /// URL to fetch.
        url: String,
    },
    /// Drop the in-flight stream request.
    AbortRequest,
    /// Arm the retry timer.
    ScheduleRetry {
        /// Time until `RetryElapsed` should be delivered.
        delay: Duration,
        /// Attempt number this retry will be (1-based).
        attempt: u32,
    },
    /// Disarm the retry timer.
    CancelRetry,
    /// Probe the health endpoint.
    StartProbe {
        /// Id to report back.
        probe: ProbeId,
        /// Health URL.
        url: String,
    },
    /// Drop the in-flight probe.
    AbortProbe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending<I> {
    id: I,
    url: String,
}

/// Complete state record owned by one controller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamState {
    connection: ConnectionState,
    attempt_count: u32,
    target: Option<StreamTarget>,
    last_motion_at: Option<DateTime<Utc>>,
    last_error: Option<StreamError>,
    retry_pending: bool,
    request: Option<Pending<RequestId>>,
    probe: Option<Pending<ProbeId>>,
    next_id: u64,
    disposed: bool,
}

impl StreamState {
    /// Current connection state.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Automatic retries used since the last success or manual action.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Current target, if any.
    pub fn target(&self) -> Option<&StreamTarget> {
        self.target.as_ref()
    }

    /// Whether a retry timer is armed.
    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// Most recent stream or probe failure.
    pub fn last_error(&self) -> Option<&StreamError> {
        self.last_error.as_ref()
    }

    /// Time of the last synthetic motion event.
    pub fn last_motion_at(&self) -> Option<DateTime<Utc>> {
        self.last_motion_at
    }

    /// Outstanding stream request.
    pub fn outstanding_request(&self) -> Option<RequestId> {
        self.request.as_ref().map(|p| p.id)
    }

    /// Outstanding health probe.
    pub fn outstanding_probe(&self) -> Option<ProbeId> {
        self.probe.as_ref().map(|p| p.id)
    }

    /// Whether the owner has unmounted.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn cancel_outstanding(&mut self, effects: &mut Vec<Effect>) {
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelRetry);
        }
        if self.request.take().is_some() {
            effects.push(Effect::AbortRequest);
        }
        if self.probe.take().is_some() {
            effects.push(Effect::AbortProbe);
        }
    }

    fn issue(&mut self, url: String, effects: &mut Vec<Effect>) {
        let request = RequestId(self.next_id());
        self.connection = ConnectionState::Connecting;
        self.request = Some(Pending {
            id: request,
            url: url.clone(),
        });
        effects.push(Effect::IssueRequest { request, url });
    }
}

/// Result of one transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// State after the event.
    pub state: StreamState,
    /// Effects to execute, in order.
    pub effects: Vec<Effect>,
}

/// Pure transition function.
pub fn transition(
    state: &StreamState,
    event: StreamEvent,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Transition {
    let mut next = state.clone();
    let mut effects = Vec::new();

    if next.disposed {
        return Transition {
            state: next,
            effects,
        };
    }

    match event {
        StreamEvent::TargetChanged(target) => {
            if target == next.target {
                return Transition {
                    state: next,
                    effects,
                };
            }
            next.cancel_outstanding(&mut effects);
            next.attempt_count = 0;
            next.last_error = None;
            next.target = target;
            match next.target.as_ref().map(StreamTarget::stream_url) {
                Some(url) => next.issue(url, &mut effects),
                None => next.connection = ConnectionState::Idle,
            }
        }

        StreamEvent::Loaded { request } => {
            let current = next.request.as_ref().map(|p| p.id) == Some(request);
            if current && next.connection == ConnectionState::Connecting {
                next.connection = ConnectionState::Streaming;
                next.attempt_count = 0;
                next.last_error = None;
            }
        }

        StreamEvent::LoadFailed { request, reason } => {
            let live = matches!(
                next.connection,
                ConnectionState::Connecting | ConnectionState::Streaming
            );
            match next.request.take() {
                Some(pending) if pending.id == request && live => {
                    next.connection = ConnectionState::Error;
                    next.last_error = Some(StreamError::StreamLoad {
                        url: pending.url,
                        reason,
                    });
                    if let Some(delay) = policy.delay_for(next.attempt_count) {
                        next.attempt_count += 1;
                        next.retry_pending = true;
                        effects.push(Effect::ScheduleRetry {
                            delay,
                            attempt: next.attempt_count,
                        });
                    }
                }
                other => next.request = other,
            }
        }

        StreamEvent::RetryElapsed => {
            if next.retry_pending && next.connection == ConnectionState::Error {
                next.retry_pending = false;
                if let Some(url) = next.target.as_ref().map(|t| t.cache_busted_url(now)) {
                    next.issue(url, &mut effects);
                }
            }
        }

        StreamEvent::ManualRetry => {
            if let Some(url) = next.target.as_ref().map(|t| t.cache_busted_url(now)) {
                next.cancel_outstanding(&mut effects);
                next.attempt_count = 0;
                next.issue(url, &mut effects);
            }
        }

        StreamEvent::TestConnection => {
            let health = next.target.as_ref().map(StreamTarget::health_url);
            if let (Some(url), ConnectionState::Error) = (health, next.connection) {
                next.cancel_outstanding(&mut effects);
                let probe = ProbeId(next.next_id());
                next.connection = ConnectionState::Connecting;
                next.probe = Some(Pending {
                    id: probe,
                    url: url.clone(),
                });
                effects.push(Effect::StartProbe { probe, url });
            }
        }

        StreamEvent::ProbeSucceeded { probe } => {
            if next.probe.as_ref().map(|p| p.id) == Some(probe) {
                next.probe = None;
                next.attempt_count = 0;
                if let Some(url) = next.target.as_ref().map(|t| t.cache_busted_url(now)) {
                    next.issue(url, &mut effects);
                }
            }
        }

        StreamEvent::ProbeFailed { probe, reason } => match next.probe.take() {
            Some(pending) if pending.id == probe => {
                next.connection = ConnectionState::Error;
                next.last_error = Some(StreamError::HealthProbe {
                    url: pending.url,
                    reason,
                });
            }
            other => next.probe = other,
        },

        StreamEvent::MotionDetected => {
            if next.target.is_some() {
                next.last_motion_at = Some(now);
            }
        }

        StreamEvent::Unmount => {
            next.cancel_outstanding(&mut effects);
            next.connection = ConnectionState::Idle;
            next.disposed = true;
        }
    }

    Transition {
        state: next,
        effects,
    }
}

/// Serializable view of the machine for observers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamSnapshot {
    /// Connection state.
    pub state: ConnectionState,
    /// Automatic retries used.
    pub attempt_count: u32,
    /// Retry ceiling.
    pub max_attempts: u32,
    /// Host currently targeted.
    pub host: Option<String>,
    /// Whether a retry timer is armed.
    pub retry_pending: bool,
    /// True when automatic retries are exhausted and only a manual action
    /// can leave the error state.
    pub needs_manual_action: bool,
    /// Most recent failure, rendered.
    pub last_error: Option<String>,
    /// Time of the last synthetic motion event.
    pub last_motion_at: Option<DateTime<Utc>>,
}

/// Owns a [`StreamState`] and applies [`transition`] to it.
#[derive(Debug, Clone)]
pub struct StreamMachine {
    policy: RetryPolicy,
    state: StreamState,
}

impl StreamMachine {
    /// Fresh machine in `Idle`.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: StreamState::default(),
        }
    }

    /// Apply `event` and return the effects to execute.
    pub fn handle(&mut self, event: StreamEvent, now: DateTime<Utc>) -> Vec<Effect> {
        let before = self.state.connection;
        let Transition { state, effects } = transition(&self.state, event, &self.policy, now);
        self.state = state;
        if before != self.state.connection {
            tracing::debug!(
                from = %before,
                to = %self.state.connection,
                attempt = self.state.attempt_count,
                "stream state changed"
            );
        }
        effects
    }

    /// Borrow the state record.
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Retry policy in force.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Observer view of the current state.
    pub fn snapshot(&self) -> StreamSnapshot {
        let s = &self.state;
        StreamSnapshot {
            state: s.connection,
            attempt_count: s.attempt_count,
            max_attempts: self.policy.max_attempts,
            host: s.target.as_ref().map(|t| t.host().to_string()),
            retry_pending: s.retry_pending,
            needs_manual_action: s.connection == ConnectionState::Error
                && !s.retry_pending
                && s.probe.is_none(),
            last_error: s.last_error.as_ref().map(ToString::to_string),
            last_motion_at: s.last_motion_at,
        }
    }
}
