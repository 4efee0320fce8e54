//! Chunk stager: volatile buffer plus best-effort durable staging.

use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::session::{now_ms, Chunk};
use crate::store::DurableStore;

#[derive(Debug)]
struct BufferedChunk {
    chunk: Chunk,
    staged: bool,
}

/// Result of handing one chunk to the stager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    /// The chunk reached durable storage
    pub staged: bool,
    /// The volatile buffer crossed its threshold and was flushed
    pub flushed: bool,
}

/// Receives the chunks of one session in arrival order
pub struct ChunkStager {
    store: Arc<dyn DurableStore>,
    session_id: i64,
    threshold: u64,
    buffer: Vec<BufferedChunk>,
    buffered_bytes: u64,
    bytes_recorded: u64,
    next_seq: i64,
    last_arrival_ms: i64,
}

impl ChunkStager {
    pub fn new(store: Arc<dyn DurableStore>, session_id: i64, threshold: u64) -> Self {
        Self {
            store,
            session_id,
            threshold,
            buffer: Vec::new(),
            buffered_bytes: 0,
            bytes_recorded: 0,
            next_seq: 0,
            last_arrival_ms: i64::MIN,
        }
    }

    /// Bytes currently held in the volatile buffer
    pub fn buffered_bytes(&self) -> u64 {
        self.buffered_bytes
    }

    /// Bytes received over the whole session
    pub fn bytes_recorded(&self) -> u64 {
        self.bytes_recorded
    }

    pub fn buffered_chunks(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer a chunk and stage it durably
    ///
    /// Empty payloads are ignored. Arrival timestamps never go backwards
    /// within a session, so arrival order and sequence order agree.
    pub async fn on_chunk_produced(&mut self, payload: Bytes) -> StageOutcome {
        if payload.is_empty() {
            return StageOutcome {
                staged: false,
                flushed: false,
            };
        }

        let arrival_ms = now_ms().max(self.last_arrival_ms);
        self.last_arrival_ms = arrival_ms;
        let chunk = Chunk {
            session_id: self.session_id,
            seq: self.next_seq,
            arrival_ms,
            payload,
        };
        self.next_seq += 1;

        let staged = match self.store.put_chunk(&chunk).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to stage chunk {} of session {}: {}",
                    chunk.seq, self.session_id, e
                );
                false
            }
        };

        let len = chunk.len() as u64;
        debug!(
            "Session {} chunk {}: {} bytes (staged: {})",
            self.session_id, chunk.seq, len, staged
        );
        self.buffered_bytes += len;
        self.bytes_recorded += len;
        self.buffer.push(BufferedChunk { chunk, staged });

        let flushed = if self.buffered_bytes > self.threshold {
            self.flush_and_clear_volatile_buffer().await;
            true
        } else {
            false
        };

        StageOutcome { staged, flushed }
    }

    /// Drop every buffered chunk that is safely staged
    ///
    /// Chunks whose staging failed are retried first; those that still fail
    /// stay in memory as the only copy. Returns the number of chunks kept.
    pub async fn flush_and_clear_volatile_buffer(&mut self) -> usize {
        for entry in self.buffer.iter_mut().filter(|entry| !entry.staged) {
            match self.store.put_chunk(&entry.chunk).await {
                Ok(()) => entry.staged = true,
                Err(e) => warn!(
                    "Retry staging chunk {} of session {} failed: {}",
                    entry.chunk.seq, self.session_id, e
                ),
            }
        }

        let before = self.buffer.len();
        self.buffer.retain(|entry| !entry.staged);
        self.buffered_bytes = self.buffer.iter().map(|e| e.chunk.len() as u64).sum();

        info!(
            "Session {}: cleared {} chunks from memory, {} retained",
            self.session_id,
            before - self.buffer.len(),
            self.buffer.len()
        );
        self.buffer.len()
    }

    /// Take the chunks still held in memory, in arrival order
    pub fn take_tail(&mut self) -> Vec<Chunk> {
        self.buffered_bytes = 0;
        self.buffer.drain(..).map(|entry| entry.chunk).collect()
    }
}
