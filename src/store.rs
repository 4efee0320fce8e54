//! Durable store for finished recordings and staged chunks.
//!
//! [`DurableStore`] is the seam the pipeline talks to; [`SqliteStore`] is the
//! implementation backed by the sqlx pool from [`crate::db`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::StorageError;
use crate::queries::{chunks, recordings};
use crate::session::Chunk;

/// A finished recording without its payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSummary {
    pub id: i64,
    pub created_at_ms: i64,
    pub duration_secs: f64,
    pub size_bytes: i64,
    pub mime_type: String,
    pub title: String,
    /// Whether the title was set by the user rather than defaulted
    pub custom_title: bool,
}

/// A recording ready to be persisted
#[derive(Debug, Clone)]
pub struct NewRecording {
    pub created_at_ms: i64,
    pub duration_secs: f64,
    pub mime_type: String,
    /// `None` assigns the ordinal default title
    pub title: Option<String>,
    pub payload: Bytes,
}

/// Aggregate view of the staged chunks left behind by one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedSession {
    pub session_id: i64,
    pub chunk_count: i64,
    pub total_bytes: i64,
    pub first_arrival_ms: i64,
    pub last_arrival_ms: i64,
}

/// Default title for the n-th recording in a catalog
pub fn default_title(ordinal: i64) -> String {
    format!("Recording {}", ordinal)
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Persist a finished recording and return its stored summary
    async fn put_recording(&self, recording: NewRecording) -> Result<RecordingSummary, StorageError>;

    async fn get_recording(&self, id: i64) -> Result<Option<RecordingSummary>, StorageError>;

    async fn recording_payload(&self, id: i64) -> Result<Option<Bytes>, StorageError>;

    /// All recordings, newest first
    async fn list_recordings(&self) -> Result<Vec<RecordingSummary>, StorageError>;

    /// Returns false when no recording has this id
    async fn rename_recording(&self, id: i64, title: &str) -> Result<bool, StorageError>;

    /// Returns false when no recording has this id
    async fn delete_recording(&self, id: i64) -> Result<bool, StorageError>;

    async fn put_chunk(&self, chunk: &Chunk) -> Result<(), StorageError>;

    /// Staged chunks of a session ordered by (arrival, seq)
    async fn chunks_for_session(&self, session_id: i64) -> Result<Vec<Chunk>, StorageError>;

    async fn delete_chunks_for_session(&self, session_id: i64) -> Result<u64, StorageError>;

    /// Delete staged chunks that arrived before `cutoff_ms`, sparing `exclude_session`
    async fn delete_chunks_older_than(
        &self,
        cutoff_ms: i64,
        exclude_session: Option<i64>,
    ) -> Result<u64, StorageError>;

    async fn clear_chunks(&self) -> Result<u64, StorageError>;

    async fn staged_sessions(&self) -> Result<Vec<StagedSession>, StorageError>;
}

/// SQLite-backed [`DurableStore`]
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap a pool whose schema has already been initialized
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn summary_from_row(row: &SqliteRow) -> Result<RecordingSummary, StorageError> {
    Ok(RecordingSummary {
        id: row.try_get(0)?,
        created_at_ms: row.try_get(1)?,
        duration_secs: row.try_get(2)?,
        size_bytes: row.try_get(3)?,
        mime_type: row.try_get(4)?,
        title: row.try_get(5)?,
        custom_title: row.try_get::<i64, _>(6)? != 0,
    })
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn put_recording(&self, recording: NewRecording) -> Result<RecordingSummary, StorageError> {
        let mut tx = self.pool.begin().await?;

        let (title, custom_title) = match recording.title {
            Some(title) => (title, true),
            None => {
                let count: i64 = sqlx::query_scalar(&recordings::count())
                    .fetch_one(&mut *tx)
                    .await?;
                (default_title(count + 1), false)
            }
        };

        let size_bytes = recording.payload.len() as i64;
        let sql = recordings::insert(
            recording.created_at_ms,
            recording.duration_secs,
            size_bytes,
            &recording.mime_type,
            &title,
            custom_title,
        );
        let result = sqlx::query(&sql)
            .bind(recording.payload.as_ref())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(RecordingSummary {
            id: result.last_insert_rowid(),
            created_at_ms: recording.created_at_ms,
            duration_secs: recording.duration_secs,
            size_bytes,
            mime_type: recording.mime_type,
            title,
            custom_title,
        })
    }

    async fn get_recording(&self, id: i64) -> Result<Option<RecordingSummary>, StorageError> {
        let sql = recordings::select_summary_by_id(id);
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(summary_from_row).transpose()
    }

    async fn recording_payload(&self, id: i64) -> Result<Option<Bytes>, StorageError> {
        let sql = recordings::select_payload_by_id(id);
        let payload: Option<Vec<u8>> = sqlx::query_scalar(&sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payload.map(Bytes::from))
    }

    async fn list_recordings(&self) -> Result<Vec<RecordingSummary>, StorageError> {
        let sql = recordings::select_all_summaries();
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(summary_from_row).collect()
    }

    async fn rename_recording(&self, id: i64, title: &str) -> Result<bool, StorageError> {
        let sql = recordings::update_title(id, title);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_recording(&self, id: i64) -> Result<bool, StorageError> {
        let sql = recordings::delete_by_id(id);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_chunk(&self, chunk: &Chunk) -> Result<(), StorageError> {
        let sql = chunks::insert(
            chunk.session_id,
            chunk.seq,
            chunk.arrival_ms,
            chunk.payload.len() as i64,
        );
        sqlx::query(&sql)
            .bind(chunk.payload.as_ref())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn chunks_for_session(&self, session_id: i64) -> Result<Vec<Chunk>, StorageError> {
        let sql = chunks::select_by_session(session_id);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<Chunk, StorageError> {
                let payload: Vec<u8> = row.try_get(2)?;
                Ok(Chunk {
                    session_id,
                    seq: row.try_get(0)?,
                    arrival_ms: row.try_get(1)?,
                    payload: Bytes::from(payload),
                })
            })
            .collect()
    }

    async fn delete_chunks_for_session(&self, session_id: i64) -> Result<u64, StorageError> {
        let sql = chunks::delete_by_session(session_id);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_chunks_older_than(
        &self,
        cutoff_ms: i64,
        exclude_session: Option<i64>,
    ) -> Result<u64, StorageError> {
        let sql = chunks::delete_older_than(cutoff_ms, exclude_session);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn clear_chunks(&self) -> Result<u64, StorageError> {
        let result = sqlx::query(&chunks::delete_all()).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn staged_sessions(&self) -> Result<Vec<StagedSession>, StorageError> {
        let sql = chunks::select_session_summaries();
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<StagedSession, StorageError> {
                Ok(StagedSession {
                    session_id: row.try_get(0)?,
                    chunk_count: row.try_get(1)?,
                    total_bytes: row.try_get::<Option<i64>, _>(2)?.unwrap_or(0),
                    first_arrival_ms: row.try_get(3)?,
                    last_arrival_ms: row.try_get(4)?,
                })
            })
            .collect()
    }
}
