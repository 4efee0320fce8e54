//! Catalog of finished recordings.

use bytes::Bytes;
use chrono::DateTime;
use log::{debug, info};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::capture::extension_for_mime;
use crate::constants::PLAYBACK_CACHE_BYTES;
use crate::error::{CatalogError, StorageError};
use crate::store::{DurableStore, NewRecording, RecordingSummary, StagedSession};

/// Least recently used payloads, bounded by their total size
struct PlaybackCache {
    budget: usize,
    used: usize,
    /// Oldest first
    entries: VecDeque<(i64, Bytes)>,
}

impl PlaybackCache {
    fn new(budget: usize) -> Self {
        Self {
            budget,
            used: 0,
            entries: VecDeque::new(),
        }
    }

    fn get(&mut self, id: i64) -> Option<Bytes> {
        let index = self.entries.iter().position(|(key, _)| *key == id)?;
        let entry = self.entries.remove(index)?;
        let bytes = entry.1.clone();
        self.entries.push_back(entry);
        Some(bytes)
    }

    fn contains(&self, id: i64) -> bool {
        self.entries.iter().any(|(key, _)| *key == id)
    }

    fn insert(&mut self, id: i64, bytes: Bytes) {
        self.remove(id);
        if bytes.len() > self.budget {
            debug!("Recording {} is larger than the playback cache, not cached", id);
            return;
        }
        while self.used + bytes.len() > self.budget {
            match self.entries.pop_front() {
                Some((evicted, old)) => {
                    self.used -= old.len();
                    debug!("Evicted recording {} from the playback cache", evicted);
                }
                None => break,
            }
        }
        self.used += bytes.len();
        self.entries.push_back((id, bytes));
    }

    fn remove(&mut self, id: i64) {
        if let Some(index) = self.entries.iter().position(|(key, _)| *key == id) {
            if let Some((_, old)) = self.entries.remove(index) {
                self.used -= old.len();
            }
        }
    }
}

/// Create/list/rename/delete over finished recordings
///
/// Clones share the same store and playback cache.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn DurableStore>,
    playback: Arc<Mutex<PlaybackCache>>,
}

impl Catalog {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_playback_budget(store, PLAYBACK_CACHE_BYTES)
    }

    /// Catalog whose playback cache holds at most `bytes` of payload
    pub fn with_playback_budget(store: Arc<dyn DurableStore>, bytes: usize) -> Self {
        Self {
            store,
            playback: Arc::new(Mutex::new(PlaybackCache::new(bytes))),
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub async fn create(&self, recording: NewRecording) -> Result<RecordingSummary, StorageError> {
        self.store.put_recording(recording).await
    }

    /// All recordings, newest first
    pub async fn list(&self) -> Result<Vec<RecordingSummary>, CatalogError> {
        Ok(self.store.list_recordings().await?)
    }

    pub async fn get(&self, id: i64) -> Result<RecordingSummary, CatalogError> {
        self.store
            .get_recording(id)
            .await?
            .ok_or(CatalogError::NotFound(id))
    }

    pub async fn rename(&self, id: i64, title: &str) -> Result<RecordingSummary, CatalogError> {
        if !self.store.rename_recording(id, title).await? {
            return Err(CatalogError::NotFound(id));
        }
        info!("Renamed recording {} to '{}'", id, title);
        self.get(id).await
    }

    /// Delete a recording; deleting a missing id is a no-op
    ///
    /// Returns whether a recording was removed.
    pub async fn delete(&self, id: i64) -> Result<bool, CatalogError> {
        self.revoke_playback(id);
        let removed = self.store.delete_recording(id).await?;
        if removed {
            info!("Deleted recording {}", id);
        } else {
            debug!("Recording {} already absent", id);
        }
        Ok(removed)
    }

    /// Payload bytes for playback, cached after the first load
    ///
    /// The cache evicts the least recently played recordings once its byte
    /// budget is exceeded.
    pub async fn playback(&self, id: i64) -> Result<Bytes, CatalogError> {
        if let Some(bytes) = self.playback.lock().ok().and_then(|mut cache| cache.get(id)) {
            return Ok(bytes);
        }
        let bytes = self.payload(id).await?;
        if let Ok(mut cache) = self.playback.lock() {
            cache.insert(id, bytes.clone());
        }
        Ok(bytes)
    }

    /// Payload bytes read straight from the store, bypassing the playback cache
    pub async fn payload(&self, id: i64) -> Result<Bytes, CatalogError> {
        self.store
            .recording_payload(id)
            .await?
            .ok_or(CatalogError::NotFound(id))
    }

    /// Whether a playback handle for this recording is currently cached
    pub fn has_playback(&self, id: i64) -> bool {
        self.playback
            .lock()
            .map(|cache| cache.contains(id))
            .unwrap_or(false)
    }

    /// Write a recording into `dir` under its download file name
    pub async fn export(&self, id: i64, dir: &Path) -> Result<PathBuf, CatalogError> {
        let summary = self.get(id).await?;
        let payload = self.payload(id).await?;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(download_filename(
            &summary.title,
            summary.created_at_ms,
            &summary.mime_type,
        ));
        tokio::fs::write(&path, &payload).await?;
        info!("Exported recording {} to {}", id, path.display());
        Ok(path)
    }

    /// Sessions whose staged chunks were never assembled
    pub async fn orphaned_sessions(&self) -> Result<Vec<StagedSession>, CatalogError> {
        Ok(self.store.staged_sessions().await?)
    }

    /// Drop every staged chunk, finished recordings are untouched
    pub async fn clear_staged_chunks(&self) -> Result<u64, CatalogError> {
        let count = self.store.clear_chunks().await?;
        info!("Cleared {} staged chunks", count);
        Ok(count)
    }

    fn revoke_playback(&self, id: i64) {
        if let Ok(mut cache) = self.playback.lock() {
            cache.remove(id);
        }
    }
}

/// Replace characters that are not allowed in file names
pub fn sanitize_filename(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect()
}

/// `{title}-{YYYY-MM-DDTHH-MM-SS}.{ext}` with the creation time in UTC
pub fn download_filename(title: &str, created_at_ms: i64, mime_type: &str) -> String {
    let stamp = DateTime::from_timestamp_millis(created_at_ms)
        .map(|dt| dt.format("%Y-%m-%dT%H-%M-%S").to_string())
        .unwrap_or_else(|| created_at_ms.to_string());
    format!(
        "{}-{}.{}",
        sanitize_filename(title),
        stamp,
        extension_for_mime(mime_type)
    )
}
