//! Inbound capture port.
//!
//! A [`CapturePlatform`] turns constraints into a running stream. The stream
//! pushes [`CaptureEvent`]s into a bounded [`CaptureSink`]; the recorder drains
//! the other end with a single consumer task, so chunks are processed in
//! arrival order and never dropped.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::constants::{CHUNK_CHANNEL_CAPACITY, FALLBACK_MIME_TYPE, MIME_PREFERENCE};
use crate::error::CaptureError;

/// What the user asked to capture
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate_bps: u64,
    pub system_audio: bool,
    pub microphone: bool,
    pub camera: bool,
}

/// Settings plus the negotiated container
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub settings: CaptureSettings,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Opaque encoded bytes. `is_final` marks the last chunk after `stop()`.
    Chunk { payload: Bytes, is_final: bool },
    /// The source terminated on its own (display share revoked, encoder exited)
    Ended,
    /// An optional device (microphone, camera) could not be captured
    DeviceWarning(String),
}

/// Producer end of the chunk channel handed to a capture source
#[derive(Debug, Clone)]
pub struct CaptureSink {
    tx: mpsc::Sender<CaptureEvent>,
}

/// Create a bounded chunk channel
pub fn channel() -> (CaptureSink, mpsc::Receiver<CaptureEvent>) {
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    (CaptureSink { tx }, rx)
}

impl CaptureSink {
    /// Deliver a chunk, waiting for channel capacity.
    /// Returns false once the consumer has gone away.
    pub async fn chunk(&self, payload: Bytes, is_final: bool) -> bool {
        self.tx
            .send(CaptureEvent::Chunk { payload, is_final })
            .await
            .is_ok()
    }

    pub async fn ended(&self) -> bool {
        self.tx.send(CaptureEvent::Ended).await.is_ok()
    }

    pub async fn device_warning(&self, message: impl Into<String>) -> bool {
        self.tx
            .send(CaptureEvent::DeviceWarning(message.into()))
            .await
            .is_ok()
    }
}

/// Control surface of a running capture stream
///
/// After `stop()` returns, the source must have delivered its final chunk
/// (`is_final = true`) or dropped its sink.
#[async_trait]
pub trait StreamHandle: Send + Sync {
    fn mime_type(&self) -> &str;

    /// Ask the source to emit whatever it has buffered, without ending the stream
    fn request_chunk_now(&self);

    fn pause(&self);

    fn resume(&self);

    async fn stop(&self);
}

#[async_trait]
pub trait CapturePlatform: Send + Sync {
    /// Containers this platform can encode into
    fn supported_mime_types(&self) -> Vec<String>;

    async fn request_capture(
        &self,
        constraints: &CaptureConstraints,
        sink: CaptureSink,
    ) -> Result<Arc<dyn StreamHandle>, CaptureError>;
}

/// Pick the most preferred container the platform supports
pub fn negotiate_mime_type(supported: &[String]) -> String {
    MIME_PREFERENCE
        .iter()
        .find(|preferred| {
            supported
                .iter()
                .any(|s| s.eq_ignore_ascii_case(preferred))
        })
        .map(|preferred| preferred.to_string())
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
}

/// File extension for a container mime type
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    if mime_type.contains("mp4") {
        "mp4"
    } else {
        "webm"
    }
}

/// Guess the container of raw payload bytes from its magic number
pub fn sniff_mime_type(payload: &[u8]) -> &'static str {
    if payload.len() >= 8 && &payload[4..8] == b"ftyp" {
        "video/mp4"
    } else {
        FALLBACK_MIME_TYPE
    }
}
