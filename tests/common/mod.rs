#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

use screen_recorder::capture::{
    CaptureConstraints, CapturePlatform, CaptureSettings, CaptureSink, StreamHandle,
};
use screen_recorder::catalog::Catalog;
use screen_recorder::error::{CaptureError, StorageError};
use screen_recorder::recorder::{Recorder, RecorderOptions, SessionConfig};
use screen_recorder::session::{Chunk, SessionLimits};
use screen_recorder::store::{
    DurableStore, NewRecording, RecordingSummary, SqliteStore, StagedSession,
};

/// Helper to open a fresh, initialized store in a temporary directory
/// Keep the returned guard alive for the duration of the test
pub async fn open_store() -> (SqliteStore, tempfile::TempDir) {
    let (pool, guard) = screen_recorder::db::create_test_connection_in_temporary_file()
        .await
        .unwrap();
    screen_recorder::db::init_database_schema(&pool)
        .await
        .unwrap();
    (SqliteStore::new(pool), guard)
}

/// Helper to build a chunk for direct staging
pub fn chunk(session_id: i64, seq: i64, arrival_ms: i64, payload: &[u8]) -> Chunk {
    Chunk {
        session_id,
        seq,
        arrival_ms,
        payload: Bytes::copy_from_slice(payload),
    }
}

pub fn test_settings() -> CaptureSettings {
    CaptureSettings {
        width: 1280,
        height: 720,
        frame_rate: 30,
        bitrate_bps: 2_500_000,
        system_audio: true,
        microphone: false,
        camera: false,
    }
}

/// Limits that never trigger on their own during a short test
pub fn relaxed_limits() -> SessionLimits {
    SessionLimits {
        max_duration: Duration::from_secs(3600),
        max_buffered_bytes: 50 * 1024 * 1024,
        flush_interval: Duration::from_secs(3600),
    }
}

pub fn session_config(limits: SessionLimits) -> SessionConfig {
    SessionConfig {
        capture: test_settings(),
        limits,
    }
}

pub fn test_options() -> RecorderOptions {
    RecorderOptions {
        retention: Duration::from_secs(24 * 3600),
        sweep_interval: Duration::from_secs(3600),
    }
}

/// Helper to wire a recorder onto a store and a scripted platform
pub fn recorder_with(
    store: Arc<dyn DurableStore>,
    platform: Arc<ScriptedPlatform>,
) -> (Recorder, Catalog) {
    let catalog = Catalog::new(store);
    let recorder = Recorder::new(catalog.clone(), platform, test_options());
    (recorder, catalog)
}

/// Poll until `condition` holds or a few seconds pass
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Scripted capture source
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub enum ScriptedFailure {
    Unavailable,
    PermissionDenied,
}

/// Capture platform whose streams are driven by the test
pub struct ScriptedPlatform {
    mime_types: Vec<String>,
    failure: Option<ScriptedFailure>,
    streams: StdMutex<Vec<Arc<ScriptedStream>>>,
    pub last_constraints: StdMutex<Option<CaptureConstraints>>,
}

impl ScriptedPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mime_types: vec!["video/webm".to_string()],
            failure: None,
            streams: StdMutex::new(Vec::new()),
            last_constraints: StdMutex::new(None),
        })
    }

    pub fn with_mime_types(mime_types: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            mime_types: mime_types.iter().map(|s| s.to_string()).collect(),
            failure: None,
            streams: StdMutex::new(Vec::new()),
            last_constraints: StdMutex::new(None),
        })
    }

    pub fn failing(failure: ScriptedFailure) -> Arc<Self> {
        Arc::new(Self {
            mime_types: vec!["video/webm".to_string()],
            failure: Some(failure),
            streams: StdMutex::new(Vec::new()),
            last_constraints: StdMutex::new(None),
        })
    }

    /// The stream handed out by the most recent capture request
    pub fn stream(&self) -> Arc<ScriptedStream> {
        self.streams.lock().unwrap().last().cloned().expect("no capture requested")
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap().len()
    }
}

#[async_trait]
impl CapturePlatform for ScriptedPlatform {
    fn supported_mime_types(&self) -> Vec<String> {
        self.mime_types.clone()
    }

    async fn request_capture(
        &self,
        constraints: &CaptureConstraints,
        sink: CaptureSink,
    ) -> Result<Arc<dyn StreamHandle>, CaptureError> {
        *self.last_constraints.lock().unwrap() = Some(constraints.clone());
        match self.failure {
            Some(ScriptedFailure::Unavailable) => {
                return Err(CaptureError::Unavailable("no display".to_string()))
            }
            Some(ScriptedFailure::PermissionDenied) => {
                return Err(CaptureError::PermissionDenied("user declined".to_string()))
            }
            None => {}
        }
        let stream = Arc::new(ScriptedStream {
            mime_type: constraints.mime_type.clone(),
            sink: Mutex::new(Some(sink)),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            flush_requests: AtomicUsize::new(0),
        });
        self.streams.lock().unwrap().push(Arc::clone(&stream));
        Ok(stream)
    }
}

/// A capture stream that emits exactly what the test pushes
pub struct ScriptedStream {
    mime_type: String,
    sink: Mutex<Option<CaptureSink>>,
    paused: AtomicBool,
    stopped: AtomicBool,
    flush_requests: AtomicUsize,
}

impl ScriptedStream {
    /// Emit a chunk unless paused or finished; returns whether it was sent
    pub async fn push(&self, payload: &[u8]) -> bool {
        if self.paused.load(Ordering::SeqCst) {
            return false;
        }
        match self.sink.lock().await.as_ref() {
            Some(sink) => sink.chunk(Bytes::copy_from_slice(payload), false).await,
            None => false,
        }
    }

    /// Simulate the source ending on its own
    pub async fn end(&self) {
        if let Some(sink) = self.sink.lock().await.take() {
            sink.ended().await;
        }
    }

    pub async fn warn(&self, message: &str) {
        if let Some(sink) = self.sink.lock().await.as_ref() {
            sink.device_warning(message).await;
        }
    }

    pub fn flush_requests(&self) -> usize {
        self.flush_requests.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamHandle for ScriptedStream {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn request_chunk_now(&self) {
        self.flush_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(sink) = self.sink.lock().await.take() {
            sink.chunk(Bytes::new(), true).await;
        }
    }
}

// ============================================================================
// Store with injectable failures
// ============================================================================

/// Delegates to a real store but can be told to fail chunk or recording writes
pub struct FlakyStore {
    inner: SqliteStore,
    pub fail_chunks: AtomicBool,
    pub fail_recordings: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_chunks: AtomicBool::new(false),
            fail_recordings: AtomicBool::new(false),
        })
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }

    fn injected() -> StorageError {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "injected failure",
        ))
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn put_recording(&self, recording: NewRecording) -> Result<RecordingSummary, StorageError> {
        if self.fail_recordings.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.put_recording(recording).await
    }

    async fn get_recording(&self, id: i64) -> Result<Option<RecordingSummary>, StorageError> {
        self.inner.get_recording(id).await
    }

    async fn recording_payload(&self, id: i64) -> Result<Option<Bytes>, StorageError> {
        self.inner.recording_payload(id).await
    }

    async fn list_recordings(&self) -> Result<Vec<RecordingSummary>, StorageError> {
        self.inner.list_recordings().await
    }

    async fn rename_recording(&self, id: i64, title: &str) -> Result<bool, StorageError> {
        self.inner.rename_recording(id, title).await
    }

    async fn delete_recording(&self, id: i64) -> Result<bool, StorageError> {
        self.inner.delete_recording(id).await
    }

    async fn put_chunk(&self, chunk: &Chunk) -> Result<(), StorageError> {
        if self.fail_chunks.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.put_chunk(chunk).await
    }

    async fn chunks_for_session(&self, session_id: i64) -> Result<Vec<Chunk>, StorageError> {
        self.inner.chunks_for_session(session_id).await
    }

    async fn delete_chunks_for_session(&self, session_id: i64) -> Result<u64, StorageError> {
        self.inner.delete_chunks_for_session(session_id).await
    }

    async fn delete_chunks_older_than(
        &self,
        cutoff_ms: i64,
        exclude_session: Option<i64>,
    ) -> Result<u64, StorageError> {
        self.inner
            .delete_chunks_older_than(cutoff_ms, exclude_session)
            .await
    }

    async fn clear_chunks(&self) -> Result<u64, StorageError> {
        self.inner.clear_chunks().await
    }

    async fn staged_sessions(&self) -> Result<Vec<StagedSession>, StorageError> {
        self.inner.staged_sessions().await
    }
}
