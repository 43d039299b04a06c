//! Membership state for the two kinds of live view.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use barfly_geo::{within_radius, KeyRange};
use barfly_store::RecordStore;
use barfly_types::{
    ChangeEvent, ChangeKind, Collection, Delta, IndexedRecord, RoomMessage, SearchQuery,
};

use crate::fetcher::CandidateFetcher;
use crate::hub::{Routed, Topic};
use crate::{LiveConfig, LiveError};

/// A change arrived with a sequence past the next expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SequenceGap {
    pub expected: u64,
    pub got: u64,
}

#[async_trait]
pub(crate) trait ViewLogic: Send + 'static {
    type Record: Routed;

    fn topic(&self) -> Topic;

    /// Reloads membership from the store and returns the deltas that take a
    /// subscriber from the previous membership to the new one.
    ///
    /// State is only replaced once every read has succeeded, so a resync
    /// that fails or is abandoned leaves the view untouched.
    async fn resync(&mut self) -> Result<Vec<Delta<Self::Record>>, LiveError>;

    /// Applies one feed event in order.
    fn apply(
        &mut self,
        event: ChangeEvent<Self::Record>,
    ) -> Result<Option<Delta<Self::Record>>, SequenceGap>;
}

fn by_age(a: &&IndexedRecord, b: &&IndexedRecord) -> Ordering {
    (a.created_at, &a.id).cmp(&(b.created_at, &b.id))
}

/// Records within a fixed circle.
pub(crate) struct ProximityView {
    query: SearchQuery,
    ranges: Vec<KeyRange>,
    fetcher: CandidateFetcher,
    store: Arc<dyn RecordStore>,
    config: LiveConfig,
    members: HashMap<String, IndexedRecord>,
    last_seen: u64,
}

impl ProximityView {
    pub(crate) fn new(
        query: SearchQuery,
        ranges: Vec<KeyRange>,
        store: Arc<dyn RecordStore>,
        config: LiveConfig,
    ) -> Self {
        Self {
            query,
            ranges,
            fetcher: CandidateFetcher::new(Arc::clone(&store), config.page_size),
            store,
            config,
            members: HashMap::new(),
            last_seen: 0,
        }
    }

    fn in_ranges(&self, record: &IndexedRecord) -> bool {
        self.ranges
            .iter()
            .any(|range| range.contains(record.geohash.as_str()))
    }
}

/// Deltas turning membership `old` into `new`: removals, then additions,
/// then updates for survivors whose version advanced. Each group is in
/// (`created_at`, id) order.
pub(crate) fn reconcile(
    old: &HashMap<String, IndexedRecord>,
    new: &HashMap<String, IndexedRecord>,
    cursor: u64,
) -> Vec<Delta<IndexedRecord>> {
    let mut removed: Vec<&IndexedRecord> =
        old.values().filter(|r| !new.contains_key(&r.id)).collect();
    let mut added: Vec<&IndexedRecord> =
        new.values().filter(|r| !old.contains_key(&r.id)).collect();
    let mut updated: Vec<&IndexedRecord> = new
        .values()
        .filter(|r| old.get(&r.id).is_some_and(|prev| r.version > prev.version))
        .collect();
    removed.sort_by(by_age);
    added.sort_by(by_age);
    updated.sort_by(by_age);

    removed
        .into_iter()
        .map(|r| Delta::removed(cursor, r.clone()))
        .chain(added.into_iter().map(|r| Delta::added(r.version, r.clone())))
        .chain(updated.into_iter().map(|r| Delta::updated(r.version, r.clone())))
        .collect()
}

#[async_trait]
impl ViewLogic for ProximityView {
    type Record = IndexedRecord;

    fn topic(&self) -> Topic {
        Topic::All
    }

    async fn resync(&mut self) -> Result<Vec<Delta<IndexedRecord>>, LiveError> {
        // The cursor is read before the snapshot, so anything the snapshot
        // misses arrives on the feed with a higher sequence.
        let cursor = self.store.feed_cursor(Collection::Sessions).await?;
        let fresh = self
            .fetcher
            .snapshot(&self.ranges, &self.query, &self.config)
            .await?;

        let deltas = reconcile(&self.members, &fresh, cursor);
        tracing::debug!(
            cursor,
            members = fresh.len(),
            deltas = deltas.len(),
            "proximity view resynchronised"
        );
        self.members = fresh;
        self.last_seen = cursor;
        Ok(deltas)
    }

    fn apply(
        &mut self,
        event: ChangeEvent<IndexedRecord>,
    ) -> Result<Option<Delta<IndexedRecord>>, SequenceGap> {
        let sequence = event.sequence;
        if sequence <= self.last_seen {
            tracing::debug!(sequence, last_seen = self.last_seen, "dropping replayed change");
            return Ok(None);
        }
        if sequence > self.last_seen + 1 {
            return Err(SequenceGap {
                expected: self.last_seen + 1,
                got: sequence,
            });
        }
        self.last_seen = sequence;

        let record = event.record;
        let member_version = self.members.get(&record.id).map(|m| m.version);
        if member_version.is_some_and(|version| sequence <= version) {
            tracing::debug!(sequence, record_id = %record.id, "change already reflected");
            return Ok(None);
        }
        let is_member = member_version.is_some();

        if event.kind == ChangeKind::Delete {
            return Ok(self
                .members
                .remove(&record.id)
                .map(|_| Delta::removed(sequence, record)));
        }

        let in_ranges = self.in_ranges(&record);
        if !is_member && !in_ranges {
            return Ok(None);
        }
        let inside = in_ranges
            && match within_radius(&self.query, record.location) {
                Ok(inside) => inside,
                Err(e) => {
                    tracing::warn!(
                        sequence,
                        record_id = %record.id,
                        error = %e,
                        "skipping change with invalid location"
                    );
                    return Ok(None);
                }
            };

        Ok(match (is_member, inside) {
            (false, true) => {
                self.members.insert(record.id.clone(), record.clone());
                Some(Delta::added(sequence, record))
            }
            (true, true) => {
                self.members.insert(record.id.clone(), record.clone());
                Some(Delta::updated(sequence, record))
            }
            (true, false) => {
                self.members.remove(&record.id);
                Some(Delta::removed(sequence, record))
            }
            (false, false) => None,
        })
    }
}

/// Messages of one chat room past a sequence.
pub(crate) struct RoomView {
    room_id: String,
    store: Arc<dyn RecordStore>,
    config: LiveConfig,
    last_seen: u64,
}

impl RoomView {
    pub(crate) fn new(
        room_id: String,
        after: u64,
        store: Arc<dyn RecordStore>,
        config: LiveConfig,
    ) -> Self {
        Self {
            room_id,
            store,
            config,
            last_seen: after,
        }
    }

    async fn read_tail(&self) -> Result<Vec<RoomMessage>, barfly_store::StoreError> {
        let mut messages = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .store
                .room_range(
                    &self.room_id,
                    self.last_seen,
                    token.as_deref(),
                    self.config.page_size,
                )
                .await?;
            messages.extend(page.records);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Ok(messages),
            }
        }
    }
}

#[async_trait]
impl ViewLogic for RoomView {
    type Record = RoomMessage;

    fn topic(&self) -> Topic {
        Topic::Key(self.room_id.clone())
    }

    async fn resync(&mut self) -> Result<Vec<Delta<RoomMessage>>, LiveError> {
        let mut attempt = 0;
        let messages = loop {
            attempt += 1;
            match self.read_tail().await {
                Ok(messages) => break messages,
                Err(e) if attempt >= self.config.max_init_attempts => {
                    return Err(LiveError::InitializationFailed {
                        attempts: attempt,
                        last: Box::new(LiveError::Store(e)),
                    });
                }
                Err(e) => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        room_id = %self.room_id,
                        attempt,
                        ?delay,
                        error = %e,
                        "retrying room read"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        if let Some(last) = messages.last() {
            self.last_seen = last.sequence;
        }
        Ok(messages
            .into_iter()
            .map(|m| Delta::added(m.sequence, m))
            .collect())
    }

    fn apply(
        &mut self,
        event: ChangeEvent<RoomMessage>,
    ) -> Result<Option<Delta<RoomMessage>>, SequenceGap> {
        // Messages are append-only; anything else is not a room change.
        if event.kind != ChangeKind::Create || event.record.room_id != self.room_id {
            return Ok(None);
        }
        let sequence = event.record.sequence;
        if sequence <= self.last_seen {
            return Ok(None);
        }
        if sequence > self.last_seen + 1 {
            return Err(SequenceGap {
                expected: self.last_seen + 1,
                got: sequence,
            });
        }
        self.last_seen = sequence;
        Ok(Some(Delta::added(sequence, event.record)))
    }
}
