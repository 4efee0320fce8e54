//! Background purge of stale staged chunks.

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::session::now_ms;
use crate::store::DurableStore;

/// Delete staged chunks that arrived more than `retention` before `now_ms`
///
/// Chunks of `exclude_session` (the live session, if any) are never touched.
pub async fn purge_stale_chunks(
    store: &dyn DurableStore,
    retention: Duration,
    now_ms: i64,
    exclude_session: Option<i64>,
) -> Result<u64, StorageError> {
    let cutoff_ms = now_ms - retention.as_millis() as i64;
    let deleted = store
        .delete_chunks_older_than(cutoff_ms, exclude_session)
        .await?;
    if deleted > 0 {
        info!(
            "Purged {} staged chunks older than {} hours",
            deleted,
            retention.as_secs() / 3600
        );
    }
    Ok(deleted)
}

/// Run [`purge_stale_chunks`] every `interval` until `cancel` fires
///
/// The first sweep runs immediately.
pub fn spawn_sweep_task(
    store: Arc<dyn DurableStore>,
    interval: Duration,
    retention: Duration,
    exclude_session: Option<i64>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) =
                        purge_stale_chunks(store.as_ref(), retention, now_ms(), exclude_session).await
                    {
                        warn!("Staged chunk sweep failed: {}", e);
                    }
                }
            }
        }
    })
}
