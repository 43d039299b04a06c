//! The storage seam consumed by the live sync engine.

use std::pin::Pin;

use async_trait::async_trait;
use barfly_geo::KeyRange;
use barfly_types::{ChangeEvent, Collection, IndexedRecord, RoomMessage};
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::{FeedError, StoreError};

/// An ordered stream of change events for one collection.
///
/// The stream ends when the backing store shuts down. An `Err` item means the
/// subscriber may have missed events.
pub type ChangeFeed<R> = Pin<Box<dyn Stream<Item = Result<ChangeEvent<R>, FeedError>> + Send>>;

/// One page of a range read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<R> {
    pub records: Vec<R>,
    /// Opaque continuation token; `None` when the range is exhausted.
    pub next_page_token: Option<String>,
}

impl<R> Page<R> {
    pub fn last(records: Vec<R>) -> Self {
        Self {
            records,
            next_page_token: None,
        }
    }
}

/// A record type that has a change feed.
pub trait FeedRecord: Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn record_id(&self) -> &str;
}

impl FeedRecord for IndexedRecord {
    const COLLECTION: Collection = Collection::Sessions;

    fn record_id(&self) -> &str {
        &self.id
    }
}

impl FeedRecord for RoomMessage {
    const COLLECTION: Collection = Collection::Messages;

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Read access to the record store.
///
/// Implementations must deliver each collection's feed in sequence order with
/// no gaps, and must make [`feed_cursor`](Self::feed_cursor) reflect every
/// change already visible to range reads.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Reads session records whose geohash falls in `range`, ordered by
    /// `(geohash, id)`, at most `limit` per page.
    async fn range_query(
        &self,
        range: &KeyRange,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<Page<IndexedRecord>, StoreError>;

    /// Reads messages of `room_id` with a sequence above `after_sequence`, in
    /// sequence order.
    async fn room_range(
        &self,
        room_id: &str,
        after_sequence: u64,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<Page<RoomMessage>, StoreError>;

    /// Opens the session change feed. Events committed after this returns are
    /// guaranteed to be delivered on the feed.
    async fn subscribe_sessions(&self) -> Result<ChangeFeed<IndexedRecord>, StoreError>;

    /// Opens the message change feed, with the same guarantee as
    /// [`subscribe_sessions`](Self::subscribe_sessions).
    async fn subscribe_messages(&self) -> Result<ChangeFeed<RoomMessage>, StoreError>;

    /// The sequence of the last committed change in `collection`, or 0.
    async fn feed_cursor(&self, collection: Collection) -> Result<u64, StoreError>;

    async fn get_session(&self, id: &str) -> Result<IndexedRecord, StoreError>;

    async fn get_message(&self, id: &str) -> Result<RoomMessage, StoreError>;
}
