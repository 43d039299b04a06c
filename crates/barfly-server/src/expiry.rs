//! Background task that deletes sessions past their TTL.

use barfly_store::{SqliteStore, StoreError};
use std::time::Duration;
use tokio::time::sleep;

/// Deletes every session created more than `ttl_secs` before `now_ms`.
///
/// Each deletion is an ordinary change, so live views observe it as a
/// `Removed` delta.
pub async fn sweep_expired(
    store: &SqliteStore,
    ttl_secs: u64,
    now_ms: i64,
) -> Result<usize, StoreError> {
    let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1_000)).unwrap_or(i64::MAX);
    store.expire_sessions(now_ms.saturating_sub(ttl_ms)).await
}

/// Starts a background loop that sweeps expired sessions every
/// `interval_seconds`. Runs until the runtime shuts down.
pub async fn start_expiry_task(store: SqliteStore, ttl_secs: u64, interval_seconds: u64) {
    let interval = Duration::from_secs(interval_seconds.max(1));
    tracing::info!(ttl_secs, interval_seconds, "starting session expiry task");

    loop {
        sleep(interval).await;

        let now_ms = chrono::Utc::now().timestamp_millis();
        match sweep_expired(&store, ttl_secs, now_ms).await {
            Ok(0) => tracing::debug!("no expired sessions to delete"),
            Ok(count) => tracing::info!(count, "deleted expired sessions"),
            Err(e) => tracing::error!(error = %e, "failed to delete expired sessions"),
        }
    }
}
