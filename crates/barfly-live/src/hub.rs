//! Per-collection change feed fan-out.
//!
//! One reader task per collection owns the store's change feed and hands each
//! event to the registered views: every proximity view sees every session
//! change, while room views only see their own room's messages. Hand-off uses
//! `try_send`, so a slow view never stalls the reader; a view whose queue is
//! full is unregistered and recovers through a resync.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use barfly_store::{ChangeFeed, FeedRecord, RecordStore, StoreError};
use barfly_types::{ChangeEvent, IndexedRecord, RoomMessage};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;

use crate::{LiveConfig, LiveError};

/// A record type the hub can route.
#[async_trait]
pub(crate) trait Routed: FeedRecord {
    /// Routing key, or `None` for records every registration receives.
    fn route_key(&self) -> Option<&str>;

    async fn open_feed(store: &dyn RecordStore) -> Result<ChangeFeed<Self>, StoreError>;
}

#[async_trait]
impl Routed for IndexedRecord {
    fn route_key(&self) -> Option<&str> {
        None
    }

    async fn open_feed(store: &dyn RecordStore) -> Result<ChangeFeed<Self>, StoreError> {
        store.subscribe_sessions().await
    }
}

#[async_trait]
impl Routed for RoomMessage {
    fn route_key(&self) -> Option<&str> {
        Some(&self.room_id)
    }

    async fn open_feed(store: &dyn RecordStore) -> Result<ChangeFeed<Self>, StoreError> {
        store.subscribe_messages().await
    }
}

/// Which events a registration receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Topic {
    All,
    Key(String),
}

type Sender<R> = mpsc::Sender<ChangeEvent<R>>;

struct Registry<R> {
    connected: bool,
    next_id: u64,
    all: HashMap<u64, Sender<R>>,
    keyed: HashMap<String, HashMap<u64, Sender<R>>>,
}

impl<R> Registry<R> {
    fn remove(&mut self, id: u64, topic: &Topic) {
        match topic {
            Topic::All => {
                self.all.remove(&id);
            }
            Topic::Key(key) => {
                if let Some(group) = self.keyed.get_mut(key) {
                    group.remove(&id);
                    if group.is_empty() {
                        self.keyed.remove(key);
                    }
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.all.len() + self.keyed.values().map(HashMap::len).sum::<usize>()
    }
}

type SharedRegistry<R> = Arc<Mutex<Registry<R>>>;

fn lock<R>(registry: &SharedRegistry<R>) -> MutexGuard<'_, Registry<R>> {
    // The registry holds no invariants a panicking holder could break.
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A view's subscription to the hub. Dropping it unregisters the view.
pub(crate) struct Registration<R> {
    id: u64,
    topic: Topic,
    rx: mpsc::Receiver<ChangeEvent<R>>,
    registry: SharedRegistry<R>,
}

impl<R> Registration<R> {
    /// The next routed event, or `None` once the hub has dropped this
    /// registration (feed loss or hand-off overflow).
    pub(crate) async fn recv(&mut self) -> Option<ChangeEvent<R>> {
        self.rx.recv().await
    }
}

impl<R> Drop for Registration<R> {
    fn drop(&mut self) {
        lock(&self.registry).remove(self.id, &self.topic);
    }
}

/// Fan-out point for one collection's change feed.
pub(crate) struct FeedHub<R> {
    registry: SharedRegistry<R>,
    connected: watch::Receiver<bool>,
    handoff_capacity: usize,
}

impl<R: Routed> FeedHub<R> {
    /// Starts the reader task for `R`'s collection. The task stops once the
    /// hub is dropped.
    pub(crate) fn spawn(store: Arc<dyn RecordStore>, config: &LiveConfig) -> Arc<Self> {
        let registry: SharedRegistry<R> = Arc::new(Mutex::new(Registry {
            connected: false,
            next_id: 0,
            all: HashMap::new(),
            keyed: HashMap::new(),
        }));
        let (connected_tx, connected_rx) = watch::channel(false);

        tokio::spawn(run_reader(
            store,
            Arc::clone(&registry),
            connected_tx,
            config.clone(),
        ));

        Arc::new(Self {
            registry,
            connected: connected_rx,
            handoff_capacity: config.handoff_capacity.max(1),
        })
    }

    /// Registers a view, waiting until the hub holds a live feed.
    ///
    /// Every event committed after this returns is delivered to the
    /// registration unless the hub drops it.
    pub(crate) async fn register(&self, topic: Topic) -> Result<Registration<R>, LiveError> {
        let mut connected = self.connected.clone();
        loop {
            {
                let mut registry = lock(&self.registry);
                if registry.connected {
                    let id = registry.next_id;
                    registry.next_id += 1;
                    let (tx, rx) = mpsc::channel(self.handoff_capacity);
                    match &topic {
                        Topic::All => {
                            registry.all.insert(id, tx);
                        }
                        Topic::Key(key) => {
                            registry.keyed.entry(key.clone()).or_default().insert(id, tx);
                        }
                    }
                    return Ok(Registration {
                        id,
                        topic,
                        rx,
                        registry: Arc::clone(&self.registry),
                    });
                }
            }
            if connected.wait_for(|c| *c).await.is_err() {
                return Err(LiveError::FeedDisconnected);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn registered(&self) -> usize {
        lock(&self.registry).len()
    }
}

async fn run_reader<R: Routed>(
    store: Arc<dyn RecordStore>,
    registry: SharedRegistry<R>,
    connected: watch::Sender<bool>,
    config: LiveConfig,
) {
    let collection = R::COLLECTION;
    let mut attempt = 0;

    loop {
        let opened = tokio::select! {
            _ = connected.closed() => break,
            opened = R::open_feed(store.as_ref()) => opened,
        };

        match opened {
            Ok(mut feed) => {
                attempt = 0;
                lock(&registry).connected = true;
                connected.send_replace(true);
                tracing::info!(collection = %collection, "change feed connected");

                loop {
                    let item = tokio::select! {
                        _ = connected.closed() => return,
                        item = feed.next() => item,
                    };
                    match item {
                        Some(Ok(event)) => dispatch(&registry, event),
                        Some(Err(e)) => {
                            tracing::warn!(collection = %collection, error = %e, "change feed lost");
                            break;
                        }
                        None => {
                            tracing::warn!(collection = %collection, "change feed ended");
                            break;
                        }
                    }
                }

                disconnect(&registry);
                connected.send_replace(false);
            }
            Err(e) => {
                tracing::warn!(
                    collection = %collection,
                    attempt,
                    error = %e,
                    "failed to open change feed"
                );
            }
        }

        attempt += 1;
        tokio::select! {
            _ = connected.closed() => break,
            _ = tokio::time::sleep(config.backoff(attempt)) => {}
        }
    }

    tracing::debug!(collection = %collection, "change feed reader stopped");
}

/// Drops every registration. Views observe their queue closing and resync.
fn disconnect<R>(registry: &SharedRegistry<R>) {
    let mut registry = lock(registry);
    let dropped = registry.len();
    registry.connected = false;
    registry.all.clear();
    registry.keyed.clear();
    tracing::info!(dropped, "released all views after feed loss");
}

fn dispatch<R: Routed>(registry: &SharedRegistry<R>, event: ChangeEvent<R>) {
    let mut registry = lock(registry);
    let mut evicted = Vec::new();

    let key = event.record.route_key().map(str::to_string);
    let keyed = key
        .as_ref()
        .and_then(|k| registry.keyed.get(k).map(|group| (k, group)));
    let targets = registry
        .all
        .iter()
        .map(|(id, tx)| (Topic::All, *id, tx))
        .chain(keyed.into_iter().flat_map(|(k, group)| {
            group
                .iter()
                .map(move |(id, tx)| (Topic::Key(k.clone()), *id, tx))
        }));

    for (topic, id, tx) in targets {
        match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    collection = %R::COLLECTION,
                    sequence = event.sequence,
                    "view fell behind the change feed; forcing resync"
                );
                evicted.push((topic, id));
            }
            Err(TrySendError::Closed(_)) => evicted.push((topic, id)),
        }
    }

    for (topic, id) in evicted {
        registry.remove(id, &topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barfly_db::DbRuntimeSettings;
    use barfly_store::{SqliteStore, StoreSettings};
    use barfly_types::GeoPoint;
    use serde_json::json;
    use std::time::Duration;

    fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hub.db");
        let store = SqliteStore::open(
            path.to_str().expect("utf-8 path"),
            DbRuntimeSettings::default(),
            StoreSettings::default(),
        )
        .expect("open store");
        (dir, store)
    }

    async fn recv(registration: &mut Registration<RoomMessage>) -> Option<ChangeEvent<RoomMessage>> {
        tokio::time::timeout(Duration::from_secs(5), registration.recv())
            .await
            .expect("hub delivered nothing")
    }

    #[tokio::test]
    async fn routes_messages_by_room() {
        let (_dir, store) = open_store();
        let hub: Arc<FeedHub<RoomMessage>> =
            FeedHub::spawn(Arc::new(store.clone()), &LiveConfig::default());

        let mut crown = hub
            .register(Topic::Key("crown".to_string()))
            .await
            .expect("register");
        let mut duke = hub
            .register(Topic::Key("duke".to_string()))
            .await
            .expect("register");
        assert_eq!(hub.registered(), 2);

        store.append_message("duke", json!({})).await.expect("append");
        store.append_message("crown", json!({})).await.expect("append");

        let got = recv(&mut crown).await.expect("open");
        assert_eq!(got.record.room_id, "crown");
        let got = recv(&mut duke).await.expect("open");
        assert_eq!(got.record.room_id, "duke");

        drop(duke);
        assert_eq!(hub.registered(), 1);
    }

    #[tokio::test]
    async fn session_changes_reach_every_registration() {
        let (_dir, store) = open_store();
        let hub: Arc<FeedHub<IndexedRecord>> =
            FeedHub::spawn(Arc::new(store.clone()), &LiveConfig::default());

        let mut a = hub.register(Topic::All).await.expect("register");
        let mut b = hub.register(Topic::All).await.expect("register");
        let created = store
            .create_session(GeoPoint::new(54.5973, -5.9301), json!({}))
            .await
            .expect("create");

        for registration in [&mut a, &mut b] {
            let event = tokio::time::timeout(Duration::from_secs(5), registration.recv())
                .await
                .expect("timely")
                .expect("open");
            assert_eq!(event.record.id, created.record.id);
        }
    }

    #[tokio::test]
    async fn overflowing_registration_is_dropped() {
        let (_dir, store) = open_store();
        let config = LiveConfig {
            handoff_capacity: 1,
            ..LiveConfig::default()
        };
        let hub: Arc<FeedHub<RoomMessage>> = FeedHub::spawn(Arc::new(store.clone()), &config);
        let mut slow = hub
            .register(Topic::Key("crown".to_string()))
            .await
            .expect("register");

        for _ in 0..3 {
            store.append_message("crown", json!({})).await.expect("append");
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.registered() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("slow registration evicted");

        // The buffered event is still delivered, then the queue closes.
        let first = recv(&mut slow).await.expect("buffered event");
        assert_eq!(first.record.sequence, 1);
        assert!(recv(&mut slow).await.is_none());
    }
}
