//! Session data model: lifecycle states, chunks, limits and time accounting.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Lifecycle state of the (single) recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Requesting,
    Active,
    Paused,
    Stopping,
    Committed,
    Failed,
}

impl SessionState {
    /// Whether `start()` may begin a new session from this state
    pub fn can_start(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Committed | SessionState::Failed
        )
    }

    /// Whether a capture source is attached and producing data
    pub fn is_recording(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Requesting => "requesting",
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Committed => "committed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    User,
    DurationLimit,
    SourceEnded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::User => f.write_str("stopped by user"),
            StopReason::DurationLimit => f.write_str("duration limit reached"),
            StopReason::SourceEnded => f.write_str("capture source ended"),
        }
    }
}

/// A sequence-ordered fragment of one session's media stream
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub session_id: i64,
    /// Position within the session, starting at 0
    pub seq: i64,
    pub arrival_ms: i64,
    pub payload: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Limits applied to a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionLimits {
    /// Active (unpaused) time after which the session stops itself
    pub max_duration: Duration,
    /// Volatile buffer size above which the buffer is cleared
    pub max_buffered_bytes: u64,
    /// How often the capture source is asked to emit buffered data
    pub flush_interval: Duration,
}

static LAST_SESSION_ID: AtomicI64 = AtomicI64::new(0);

/// Allocate a session id derived from the current time in microseconds
///
/// Ids are strictly increasing within a process even if the clock steps back.
pub fn next_session_id() -> i64 {
    let now = chrono::Utc::now().timestamp_micros();
    let mut last = LAST_SESSION_ID.load(Ordering::SeqCst);
    loop {
        let candidate = now.max(last + 1);
        match LAST_SESSION_ID.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Measures recorded time, excluding paused intervals
#[derive(Debug, Clone)]
pub struct ActiveClock {
    started: Instant,
    paused_total: Duration,
    paused_at: Option<Instant>,
}

impl ActiveClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            paused_total: Duration::ZERO,
            paused_at: None,
        }
    }

    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += at.elapsed();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Time spent recording so far
    pub fn active(&self) -> Duration {
        let paused_now = self.paused_at.map(|at| at.elapsed()).unwrap_or_default();
        self.started
            .elapsed()
            .saturating_sub(self.paused_total + paused_now)
    }
}

/// Snapshot of the controller published to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: Option<i64>,
    pub state: SessionState,
    pub elapsed: Duration,
    pub bytes_recorded: u64,
    pub buffered_bytes: u64,
    pub memory_percent: f64,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            session_id: None,
            state: SessionState::Idle,
            elapsed: Duration::ZERO,
            bytes_recorded: 0,
            buffered_bytes: 0,
            memory_percent: 0.0,
        }
    }
}

/// Format whole seconds as HH:MM:SS
pub fn format_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
