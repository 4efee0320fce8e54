//! Session lifecycle controller.
//!
//! One session at a time moves through
//! `Idle -> Requesting -> Active <-> Paused -> Stopping -> Committed`, or ends
//! in `Failed`. The controller owns the capture handle, the single consumer
//! task draining the chunk channel, and the session timers.

use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assembler::{Assembler, AssemblyInput};
use crate::capture::{
    self, negotiate_mime_type, CaptureConstraints, CaptureEvent, CapturePlatform, CaptureSettings,
    StreamHandle,
};
use crate::catalog::Catalog;
use crate::constants::{MEMORY_PERCENT_CAP, STATUS_TICK};
use crate::error::RecorderError;
use crate::janitor;
use crate::session::{
    next_session_id, now_ms, ActiveClock, SessionLimits, SessionState, SessionStatus, StopReason,
};
use crate::stager::ChunkStager;
use crate::store::{DurableStore, RecordingSummary};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Per-session settings passed to [`Recorder::start`]
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub capture: CaptureSettings,
    pub limits: SessionLimits,
}

/// Settings that outlive a single session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecorderOptions {
    /// Staged chunks older than this are purged
    pub retention: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecorderEvent {
    StateChanged {
        session_id: Option<i64>,
        state: SessionState,
    },
    DeviceWarning {
        session_id: i64,
        message: String,
    },
    Stopped {
        session_id: i64,
        reason: StopReason,
    },
    Committed {
        session_id: i64,
        recording: RecordingSummary,
    },
    CommitFailed {
        session_id: i64,
        message: String,
    },
}

/// Result of a successfully committed session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub session_id: i64,
    pub reason: StopReason,
    pub recording: RecordingSummary,
}

/// Share of the volatile threshold currently buffered, capped for display
pub fn memory_percent(buffered_bytes: u64, threshold: u64) -> f64 {
    if threshold == 0 {
        return 0.0;
    }
    (buffered_bytes as f64 / threshold as f64 * 100.0).min(MEMORY_PERCENT_CAP)
}

struct ActiveSession {
    id: i64,
    started_at_ms: i64,
    handle: Arc<dyn StreamHandle>,
    stager: Arc<Mutex<ChunkStager>>,
    clock: Arc<StdMutex<ActiveClock>>,
    consumer: JoinHandle<()>,
    timers: CancellationToken,
}

struct Slot {
    state: SessionState,
    session_id: Option<i64>,
    session: Option<ActiveSession>,
}

struct Inner {
    store: Arc<dyn DurableStore>,
    catalog: Catalog,
    assembler: Assembler,
    platform: Arc<dyn CapturePlatform>,
    options: RecorderOptions,
    slot: Mutex<Slot>,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: broadcast::Sender<RecorderEvent>,
}

/// Handle to the session controller; clones share the same controller
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<Inner>,
}

fn lock_clock(clock: &StdMutex<ActiveClock>) -> MutexGuard<'_, ActiveClock> {
    clock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Recorder {
    pub fn new(
        catalog: Catalog,
        platform: Arc<dyn CapturePlatform>,
        options: RecorderOptions,
    ) -> Self {
        let store = Arc::clone(catalog.store());
        let assembler = Assembler::new(Arc::clone(&store), catalog.clone());
        let (status_tx, _) = watch::channel(SessionStatus::idle());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                catalog,
                assembler,
                platform,
                options,
                slot: Mutex::new(Slot {
                    state: SessionState::Idle,
                    session_id: None,
                    session: None,
                }),
                status_tx,
                events_tx,
            }),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn state(&self) -> SessionState {
        self.inner.status_tx.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Status updates: every transition, every chunk and once per second
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Begin a new session and return its id
    pub async fn start(&self, config: SessionConfig) -> Result<i64, RecorderError> {
        let mut slot = self.inner.slot.lock().await;
        if !slot.state.can_start() {
            warn!("Rejected start while session is {}", slot.state);
            return Err(RecorderError::SessionAlreadyActive(slot.state));
        }

        let session_id = next_session_id();
        slot.session_id = Some(session_id);
        self.inner.status_tx.send_replace(SessionStatus {
            session_id: Some(session_id),
            ..SessionStatus::idle()
        });
        self.transition(&mut slot, SessionState::Requesting);

        let constraints = CaptureConstraints {
            settings: config.capture.clone(),
            mime_type: negotiate_mime_type(&self.inner.platform.supported_mime_types()),
        };
        let (sink, events) = capture::channel();
        let handle = match self.inner.platform.request_capture(&constraints, sink).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Capture request for session {} failed: {}", session_id, e);
                self.transition(&mut slot, SessionState::Failed);
                return Err(e.into());
            }
        };

        let limits = config.limits;
        let stager = Arc::new(Mutex::new(ChunkStager::new(
            Arc::clone(&self.inner.store),
            session_id,
            limits.max_buffered_bytes,
        )));
        let clock = Arc::new(StdMutex::new(ActiveClock::start()));
        let timers = CancellationToken::new();

        let consumer = tokio::spawn(consume_events(
            self.clone(),
            session_id,
            events,
            Arc::clone(&stager),
            Arc::clone(&handle),
            limits.max_buffered_bytes,
        ));
        self.spawn_status_ticker(session_id, Arc::clone(&clock), timers.clone());
        self.spawn_duration_timer(
            session_id,
            limits.max_duration,
            Arc::clone(&clock),
            timers.clone(),
        );
        spawn_flush_timer(
            Arc::clone(&handle),
            limits.flush_interval,
            Arc::clone(&clock),
            timers.clone(),
        );
        janitor::spawn_sweep_task(
            Arc::clone(&self.inner.store),
            self.inner.options.sweep_interval,
            self.inner.options.retention,
            Some(session_id),
            timers.child_token(),
        );

        info!(
            "Session {} recording {}x{}@{} as {}",
            session_id,
            config.capture.width,
            config.capture.height,
            config.capture.frame_rate,
            handle.mime_type()
        );
        slot.session = Some(ActiveSession {
            id: session_id,
            started_at_ms: now_ms(),
            handle,
            stager,
            clock,
            consumer,
            timers,
        });
        self.transition(&mut slot, SessionState::Active);
        Ok(session_id)
    }

    /// Pause an active session; a no-op from any other state
    pub async fn pause(&self) -> bool {
        let mut slot = self.inner.slot.lock().await;
        if slot.state != SessionState::Active {
            debug!("Ignoring pause while {}", slot.state);
            return false;
        }
        if let Some(session) = &slot.session {
            session.handle.pause();
            lock_clock(&session.clock).pause();
        }
        self.transition(&mut slot, SessionState::Paused);
        true
    }

    /// Resume a paused session; a no-op from any other state
    pub async fn resume(&self) -> bool {
        let mut slot = self.inner.slot.lock().await;
        if slot.state != SessionState::Paused {
            debug!("Ignoring resume while {}", slot.state);
            return false;
        }
        if let Some(session) = &slot.session {
            lock_clock(&session.clock).resume();
            session.handle.resume();
        }
        self.transition(&mut slot, SessionState::Active);
        true
    }

    /// Ask the capture source to emit buffered data without ending the session
    pub async fn request_flush(&self) -> bool {
        let slot = self.inner.slot.lock().await;
        match &slot.session {
            Some(session) if slot.state.is_recording() => {
                session.handle.request_chunk_now();
                true
            }
            _ => false,
        }
    }

    /// Best-effort flush when the host is about to be suspended; never blocks
    pub fn notify_suspended(&self) {
        let recorder = self.clone();
        tokio::spawn(async move {
            if recorder.request_flush().await {
                debug!("Flush requested before suspension");
            }
        });
    }

    /// Stop the session and commit it as a finished recording
    pub async fn stop(&self) -> Result<SessionOutcome, RecorderError> {
        self.stop_session(None, StopReason::User).await
    }

    async fn auto_stop(&self, session_id: i64, reason: StopReason) {
        match self.stop_session(Some(session_id), reason).await {
            Ok(outcome) => info!(
                "Session {} stopped automatically ({}), recording {}",
                session_id, reason, outcome.recording.id
            ),
            Err(RecorderError::NotRecording(state)) => {
                debug!("Session {} already {} before auto-stop", session_id, state)
            }
            Err(e) => error!("Session {} auto-stop failed: {}", session_id, e),
        }
    }

    async fn stop_session(
        &self,
        expected: Option<i64>,
        reason: StopReason,
    ) -> Result<SessionOutcome, RecorderError> {
        let mut slot = self.inner.slot.lock().await;
        if !slot.state.is_recording() {
            return Err(RecorderError::NotRecording(slot.state));
        }
        if expected.is_some() && expected != slot.session_id {
            return Err(RecorderError::NotRecording(slot.state));
        }
        let session = match slot.session.take() {
            Some(session) => session,
            None => return Err(RecorderError::NotRecording(slot.state)),
        };

        let duration = lock_clock(&session.clock).active();
        self.transition(&mut slot, SessionState::Stopping);
        info!("Stopping session {}: {}", session.id, reason);

        session.timers.cancel();
        session.handle.stop().await;
        if let Err(e) = session.consumer.await {
            warn!("Chunk consumer of session {} panicked: {}", session.id, e);
        }
        let tail = session.stager.lock().await.take_tail();
        let _ = self.inner.events_tx.send(RecorderEvent::Stopped {
            session_id: session.id,
            reason,
        });

        let input = AssemblyInput {
            session_id: session.id,
            created_at_ms: session.started_at_ms,
            duration_secs: duration.as_secs_f64(),
            mime_type: session.handle.mime_type().to_string(),
            tail,
        };
        let result = self.inner.assembler.assemble(input).await;

        self.inner.status_tx.send_modify(|status| {
            status.elapsed = duration;
            status.buffered_bytes = 0;
            status.memory_percent = 0.0;
        });

        match result {
            Ok(recording) => {
                self.transition(&mut slot, SessionState::Committed);
                let _ = self.inner.events_tx.send(RecorderEvent::Committed {
                    session_id: session.id,
                    recording: recording.clone(),
                });
                Ok(SessionOutcome {
                    session_id: session.id,
                    reason,
                    recording,
                })
            }
            Err(e) => {
                self.transition(&mut slot, SessionState::Failed);
                let _ = self.inner.events_tx.send(RecorderEvent::CommitFailed {
                    session_id: session.id,
                    message: e.to_string(),
                });
                Err(RecorderError::Commit(e))
            }
        }
    }

    fn transition(&self, slot: &mut Slot, state: SessionState) {
        let from = slot.state;
        slot.state = state;
        let session_id = slot.session_id;
        self.inner.status_tx.send_modify(|status| {
            status.state = state;
            status.session_id = session_id;
        });
        let _ = self
            .inner
            .events_tx
            .send(RecorderEvent::StateChanged { session_id, state });
        info!(
            "Session {}: {} -> {}",
            session_id.unwrap_or_default(),
            from,
            state
        );
    }

    fn spawn_status_ticker(
        &self,
        session_id: i64,
        clock: Arc<StdMutex<ActiveClock>>,
        cancel: CancellationToken,
    ) {
        let recorder = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATUS_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let elapsed = lock_clock(&clock).active();
                        recorder.inner.status_tx.send_modify(|status| {
                            if status.session_id == Some(session_id) {
                                status.elapsed = elapsed;
                            }
                        });
                    }
                }
            }
        });
    }

    /// Sleeps until the active time reaches the limit, rechecking after pauses
    fn spawn_duration_timer(
        &self,
        session_id: i64,
        max_duration: Duration,
        clock: Arc<StdMutex<ActiveClock>>,
        cancel: CancellationToken,
    ) {
        let recorder = self.clone();
        tokio::spawn(async move {
            loop {
                let remaining = max_duration.saturating_sub(lock_clock(&clock).active());
                if remaining.is_zero() {
                    info!("Session {} reached its duration limit", session_id);
                    recorder.auto_stop(session_id, StopReason::DurationLimit).await;
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(remaining) => {}
                }
            }
        });
    }
}

fn spawn_flush_timer(
    handle: Arc<dyn StreamHandle>,
    interval: Duration,
    clock: Arc<StdMutex<ActiveClock>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !lock_clock(&clock).is_paused() {
                        handle.request_chunk_now();
                    }
                }
            }
        }
    });
}

/// Single consumer of a session's chunk channel
///
/// Returns after the final chunk or once the source drops its sink.
async fn consume_events(
    recorder: Recorder,
    session_id: i64,
    mut events: mpsc::Receiver<CaptureEvent>,
    stager: Arc<Mutex<ChunkStager>>,
    handle: Arc<dyn StreamHandle>,
    threshold: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            CaptureEvent::Chunk { payload, is_final } => {
                let (outcome, buffered, recorded) = {
                    let mut stager = stager.lock().await;
                    let outcome = stager.on_chunk_produced(payload).await;
                    (outcome, stager.buffered_bytes(), stager.bytes_recorded())
                };
                if outcome.flushed {
                    handle.request_chunk_now();
                }
                recorder.inner.status_tx.send_modify(|status| {
                    if status.session_id == Some(session_id) {
                        status.bytes_recorded = recorded;
                        status.buffered_bytes = buffered;
                        status.memory_percent = memory_percent(buffered, threshold);
                    }
                });
                if is_final {
                    break;
                }
            }
            CaptureEvent::Ended => {
                info!("Capture source of session {} ended", session_id);
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    recorder.auto_stop(session_id, StopReason::SourceEnded).await;
                });
            }
            CaptureEvent::DeviceWarning(message) => {
                warn!("Session {}: {}", session_id, message);
                let _ = recorder.inner.events_tx.send(RecorderEvent::DeviceWarning {
                    session_id,
                    message,
                });
            }
        }
    }
    debug!("Chunk consumer of session {} finished", session_id);
}
