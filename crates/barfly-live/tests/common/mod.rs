//! Shared fixtures: an on-disk store and a wrapper that injects faults.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use barfly_db::DbRuntimeSettings;
use barfly_geo::{destination, KeyRange};
use barfly_live::{DeltaStream, LiveConfig, LiveError};
use barfly_store::{ChangeFeed, Page, RecordStore, SqliteStore, StoreError, StoreSettings};
use barfly_types::{Collection, Delta, GeoPoint, IndexedRecord, RoomMessage};
use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::sync::{broadcast, watch};

pub const BELFAST: GeoPoint = GeoPoint::new(54.5973, -5.9301);

pub fn open_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("live.db");
    let store = SqliteStore::open(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
        StoreSettings::default(),
    )
    .expect("open store");
    (dir, store)
}

pub fn fast_config() -> LiveConfig {
    LiveConfig {
        page_size: 2,
        retry_backoff_ms: 10,
        max_backoff_ms: 50,
        ..LiveConfig::default()
    }
}

pub fn from_belfast(bearing: f64, meters: f64) -> GeoPoint {
    destination(BELFAST, bearing, meters)
}

/// Next delta, failing the test if none arrives in time.
pub async fn next_delta<R>(stream: &mut DeltaStream<R>) -> Delta<R> {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no delta within 5s")
        .expect("stream ended")
        .expect("stream delivered an error")
}

/// Asserts nothing arrives for a short while.
pub async fn assert_quiet<R: std::fmt::Debug>(stream: &mut DeltaStream<R>) {
    if let Ok(item) = tokio::time::timeout(Duration::from_millis(300), stream.next()).await {
        panic!("expected no delta, got {item:?}");
    }
}

pub async fn next_item<R>(stream: &mut DeltaStream<R>) -> Option<Result<Delta<R>, LiveError>> {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream stalled")
}

/// Wraps a [`SqliteStore`] with switches for feed loss, failing range reads,
/// and slow range reads.
#[derive(Clone)]
pub struct FlakyStore {
    inner: SqliteStore,
    sever_tx: broadcast::Sender<()>,
    gate: Arc<watch::Sender<bool>>,
    failing_reads: Arc<AtomicUsize>,
    read_delay: Arc<watch::Sender<Duration>>,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore) -> Self {
        let (sever_tx, _) = broadcast::channel(4);
        let (gate, _) = watch::channel(true);
        let (read_delay, _) = watch::channel(Duration::ZERO);
        Self {
            inner,
            sever_tx,
            gate: Arc::new(gate),
            failing_reads: Arc::new(AtomicUsize::new(0)),
            read_delay: Arc::new(read_delay),
        }
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }

    /// Ends every feed handed out so far.
    pub fn sever_feeds(&self) {
        let _ = self.sever_tx.send(());
    }

    /// While closed, new feed subscriptions wait.
    pub fn set_gate(&self, open: bool) {
        self.gate.send_replace(open);
    }

    /// Makes the next `n` range reads fail.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay.send_replace(delay);
    }

    async fn before_read(&self) -> Result<(), StoreError> {
        let delay = *self.read_delay.borrow();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StoreError::Unavailable("injected read failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn wait_for_gate(&self) {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
    }

    fn severable<R: Send + 'static>(&self, feed: ChangeFeed<R>) -> ChangeFeed<R> {
        let mut sever = self.sever_tx.subscribe();
        Box::pin(feed.take_until(async move {
            let _ = sever.recv().await;
        }))
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn range_query(
        &self,
        range: &KeyRange,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<Page<IndexedRecord>, StoreError> {
        self.before_read().await?;
        self.inner.range_query(range, page_token, limit).await
    }

    async fn room_range(
        &self,
        room_id: &str,
        after_sequence: u64,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<Page<RoomMessage>, StoreError> {
        self.before_read().await?;
        self.inner
            .room_range(room_id, after_sequence, page_token, limit)
            .await
    }

    async fn subscribe_sessions(&self) -> Result<ChangeFeed<IndexedRecord>, StoreError> {
        self.wait_for_gate().await;
        Ok(self.severable(self.inner.subscribe_sessions().await?))
    }

    async fn subscribe_messages(&self) -> Result<ChangeFeed<RoomMessage>, StoreError> {
        self.wait_for_gate().await;
        Ok(self.severable(self.inner.subscribe_messages().await?))
    }

    async fn feed_cursor(&self, collection: Collection) -> Result<u64, StoreError> {
        self.inner.feed_cursor(collection).await
    }

    async fn get_session(&self, id: &str) -> Result<IndexedRecord, StoreError> {
        self.inner.get_session(id).await
    }

    async fn get_message(&self, id: &str) -> Result<RoomMessage, StoreError> {
        self.inner.get_message(id).await
    }
}
