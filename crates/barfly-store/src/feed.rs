//! In-process fan-out of committed changes.

use barfly_types::{ChangeEvent, IndexedRecord, RoomMessage};
use futures_util::stream;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{ChangeFeed, FeedError, FeedRecord};

/// Broadcast senders for each collection's change feed.
///
/// A subscriber that falls more than `capacity` events behind receives
/// [`FeedError::Lagged`] and must resynchronise.
#[derive(Debug, Clone)]
pub(crate) struct FeedBroadcaster {
    sessions: broadcast::Sender<ChangeEvent<IndexedRecord>>,
    messages: broadcast::Sender<ChangeEvent<RoomMessage>>,
}

impl FeedBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sessions, _) = broadcast::channel(capacity);
        let (messages, _) = broadcast::channel(capacity);
        Self { sessions, messages }
    }

    pub fn session_feed(&self) -> ChangeFeed<IndexedRecord> {
        into_feed(self.sessions.subscribe())
    }

    pub fn message_feed(&self) -> ChangeFeed<RoomMessage> {
        into_feed(self.messages.subscribe())
    }

    pub(crate) fn publish<R: Broadcast>(&self, event: ChangeEvent<R>) {
        // No receivers is not an error; nobody is listening yet.
        let _ = R::sender(self).send(event);
    }
}

/// Selects the broadcast sender for a record type.
pub(crate) trait Broadcast: FeedRecord + Sized {
    fn sender(feeds: &FeedBroadcaster) -> &broadcast::Sender<ChangeEvent<Self>>;
}

impl Broadcast for IndexedRecord {
    fn sender(feeds: &FeedBroadcaster) -> &broadcast::Sender<ChangeEvent<Self>> {
        &feeds.sessions
    }
}

impl Broadcast for RoomMessage {
    fn sender(feeds: &FeedBroadcaster) -> &broadcast::Sender<ChangeEvent<Self>> {
        &feeds.messages
    }
}

fn into_feed<R: FeedRecord>(rx: broadcast::Receiver<ChangeEvent<R>>) -> ChangeFeed<R> {
    let feed = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => Some((Ok(event), rx)),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    collection = %R::COLLECTION,
                    skipped,
                    "change feed subscriber lagged"
                );
                Some((Err(FeedError::Lagged(skipped)), rx))
            }
            Err(RecvError::Closed) => None,
        }
    });
    Box::pin(feed)
}
