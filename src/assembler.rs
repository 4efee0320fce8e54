//! Turns the chunks of a session into one finished recording.

use bytes::BytesMut;
use log::{error, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::capture::sniff_mime_type;
use crate::catalog::Catalog;
use crate::error::StorageError;
use crate::session::Chunk;
use crate::store::{DurableStore, NewRecording, RecordingSummary};

/// Everything the assembler needs to know about a stopped session
#[derive(Debug, Clone)]
pub struct AssemblyInput {
    pub session_id: i64,
    pub created_at_ms: i64,
    pub duration_secs: f64,
    pub mime_type: String,
    /// Chunks still held in memory when the session stopped
    pub tail: Vec<Chunk>,
}

/// Merge staged chunks with the volatile tail into one total order
///
/// A chunk present in both sets is kept once. Order is arrival time, then
/// sequence number.
pub fn merge_chunks(staged: Vec<Chunk>, tail: Vec<Chunk>) -> Vec<Chunk> {
    let mut by_seq: BTreeMap<i64, Chunk> = BTreeMap::new();
    for chunk in staged.into_iter().chain(tail) {
        by_seq.entry(chunk.seq).or_insert(chunk);
    }
    let mut merged: Vec<Chunk> = by_seq.into_values().collect();
    merged.sort_by_key(|chunk| (chunk.arrival_ms, chunk.seq));
    merged
}

pub struct Assembler {
    store: Arc<dyn DurableStore>,
    catalog: Catalog,
}

impl Assembler {
    pub fn new(store: Arc<dyn DurableStore>, catalog: Catalog) -> Self {
        Self { store, catalog }
    }

    /// Persist the session as a finished recording, then drop its staged chunks
    ///
    /// Staged chunks are only deleted once the recording is stored. If the
    /// commit fails, tail chunks that were never staged are staged now so a
    /// later recovery sees the whole session, and the error is returned.
    pub async fn assemble(&self, input: AssemblyInput) -> Result<RecordingSummary, StorageError> {
        let staged = self.store.chunks_for_session(input.session_id).await?;
        let staged_seqs: HashSet<i64> = staged.iter().map(|chunk| chunk.seq).collect();
        let unstaged: Vec<Chunk> = input
            .tail
            .iter()
            .filter(|chunk| !staged_seqs.contains(&chunk.seq))
            .cloned()
            .collect();
        let chunks = merge_chunks(staged, input.tail);

        let total: usize = chunks.iter().map(Chunk::len).sum();
        let mut payload = BytesMut::with_capacity(total);
        for chunk in &chunks {
            payload.extend_from_slice(&chunk.payload);
        }

        let recording = NewRecording {
            created_at_ms: input.created_at_ms,
            duration_secs: input.duration_secs,
            mime_type: input.mime_type,
            title: None,
            payload: payload.freeze(),
        };

        let summary = match self.catalog.create(recording).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(
                    "Failed to commit session {} ({} chunks, {} not yet staged): {}",
                    input.session_id,
                    chunks.len(),
                    unstaged.len(),
                    e
                );
                self.stage_for_recovery(input.session_id, &unstaged).await;
                return Err(e);
            }
        };

        info!(
            "Session {} committed as recording {} ({} chunks, {} bytes)",
            input.session_id,
            summary.id,
            chunks.len(),
            summary.size_bytes
        );
        self.discard_staged(input.session_id).await;
        Ok(summary)
    }

    /// Assemble the staged chunks of a session that never finished
    ///
    /// Returns `None` when nothing is staged for the session.
    pub async fn recover(&self, session_id: i64) -> Result<Option<RecordingSummary>, StorageError> {
        let staged = self.store.chunks_for_session(session_id).await?;
        let (first, last) = match (staged.first(), staged.last()) {
            (Some(first), Some(last)) => (first.arrival_ms, last.arrival_ms),
            _ => return Ok(None),
        };
        let mime_type = sniff_mime_type(&staged[0].payload).to_string();

        let input = AssemblyInput {
            session_id,
            created_at_ms: first,
            duration_secs: (last - first).max(0) as f64 / 1000.0,
            mime_type,
            tail: Vec::new(),
        };
        info!("Recovering {} staged chunks of session {}", staged.len(), session_id);
        self.assemble(input).await.map(Some)
    }

    /// Best effort: a chunk that cannot be staged is lost with the process
    async fn stage_for_recovery(&self, session_id: i64, chunks: &[Chunk]) {
        let mut staged = 0;
        for chunk in chunks {
            match self.store.put_chunk(chunk).await {
                Ok(()) => staged += 1,
                Err(e) => warn!(
                    "Failed to stage chunk {} of session {} for recovery: {}",
                    chunk.seq, session_id, e
                ),
            }
        }
        if staged > 0 {
            info!(
                "Staged {} tail chunks of session {} for recovery",
                staged, session_id
            );
        }
    }

    async fn discard_staged(&self, session_id: i64) {
        match self.store.delete_chunks_for_session(session_id).await {
            Ok(count) => info!("Deleted {} staged chunks of session {}", count, session_id),
            Err(e) => warn!(
                "Failed to delete staged chunks of session {}; the sweep will purge them: {}",
                session_id, e
            ),
        }
    }
}
