//! Entry point for opening live views.

use std::sync::Arc;

use barfly_geo::plan_bounds;
use barfly_store::RecordStore;
use barfly_types::{IndexedRecord, RoomMessage, SearchQuery};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::fetcher::CandidateFetcher;
use crate::hub::FeedHub;
use crate::stream::{CancelHandle, DeltaStream};
use crate::view::{ProximityView, RoomView, ViewLogic};
use crate::worker::ViewTask;
use crate::{LiveConfig, LiveError};

/// Opens and drives live views over a [`RecordStore`].
///
/// Each collection's change feed is read by a single background task shared
/// by all views. Construct the engine inside a Tokio runtime.
pub struct LiveSyncEngine {
    store: Arc<dyn RecordStore>,
    config: LiveConfig,
    sessions: Arc<FeedHub<IndexedRecord>>,
    messages: Arc<FeedHub<RoomMessage>>,
}

impl LiveSyncEngine {
    pub fn new(store: Arc<dyn RecordStore>, config: LiveConfig) -> Self {
        let sessions = FeedHub::spawn(Arc::clone(&store), &config);
        let messages = FeedHub::spawn(Arc::clone(&store), &config);
        tracing::info!(
            page_size = config.page_size,
            init_timeout_ms = config.init_timeout_ms,
            "live sync engine started"
        );
        Self {
            store,
            config,
            sessions,
            messages,
        }
    }

    pub fn fetcher(&self) -> CandidateFetcher {
        CandidateFetcher::new(Arc::clone(&self.store), self.config.page_size)
    }

    /// Opens a live view of the sessions within `query`'s circle.
    ///
    /// Returns once the baseline is built; the stream starts with one
    /// `Added` per member in (`created_at`, id) order.
    ///
    /// # Errors
    ///
    /// Invalid centers and radii are rejected before any store access.
    /// Snapshot failures surface as `InitializationFailed` or
    /// `InitializationTimeout`.
    pub async fn subscribe_nearby(
        &self,
        query: SearchQuery,
    ) -> Result<(DeltaStream<IndexedRecord>, CancelHandle), LiveError> {
        let ranges = plan_bounds(&query)?;
        tracing::debug!(
            lat = query.center.lat,
            lng = query.center.lng,
            radius_m = query.radius_m,
            ranges = ranges.len(),
            "opening proximity view"
        );
        let view = ProximityView::new(query, ranges, Arc::clone(&self.store), self.config.clone());
        self.open(view, &self.sessions).await
    }

    /// Opens a live view of `room_id`'s messages with a sequence above
    /// `after`, in sequence order.
    pub async fn subscribe_room(
        &self,
        room_id: &str,
        after: u64,
    ) -> Result<(DeltaStream<RoomMessage>, CancelHandle), LiveError> {
        tracing::debug!(room_id, after, "opening room view");
        let view = RoomView::new(
            room_id.to_string(),
            after,
            Arc::clone(&self.store),
            self.config.clone(),
        );
        self.open(view, &self.messages).await
    }

    /// One-shot proximity read: the sessions within `query`, oldest first.
    pub async fn nearby(&self, query: SearchQuery) -> Result<Vec<IndexedRecord>, LiveError> {
        let ranges = plan_bounds(&query)?;
        let deadline = self.config.init_timeout();
        let members = tokio::time::timeout(
            deadline,
            self.fetcher().snapshot(&ranges, &query, &self.config),
        )
        .await
        .map_err(|_| LiveError::InitializationTimeout(deadline))??;

        let mut records: Vec<IndexedRecord> = members.into_values().collect();
        records.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(records)
    }

    async fn open<V: ViewLogic>(
        &self,
        view: V,
        hub: &Arc<FeedHub<V::Record>>,
    ) -> Result<(DeltaStream<V::Record>, CancelHandle), LiveError> {
        let view_id = Uuid::new_v4();
        let (out_tx, out_rx) = mpsc::channel(self.config.delivery_capacity.max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = ViewTask::new(
            view_id,
            view,
            Arc::clone(hub),
            out_tx,
            cancel_rx.clone(),
            self.config.clone(),
        );
        tokio::spawn(task.run(ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => Ok((
                DeltaStream::new(view_id, out_rx, cancel_rx),
                CancelHandle::new(view_id, cancel_tx),
            )),
            Ok(Err(e)) => Err(e),
            // The view task ended without reporting, which only a panic does.
            Err(_) => Err(LiveError::FeedDisconnected),
        }
    }
}
