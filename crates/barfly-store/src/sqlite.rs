//! SQLite-backed [`RecordStore`].
//!
//! Reads and writes run on the blocking pool. Writes are serialised through a
//! single lock: each one opens a transaction, applies its mutation, appends a
//! `change_log` row with the next per-collection sequence, commits, and then
//! broadcasts the event before releasing the lock.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use barfly_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use barfly_geo::{encode, KeyRange, INDEX_PRECISION};
use barfly_types::{
    ChangeEvent, ChangeKind, Collection, GeoPoint, GeohashKey, IndexedRecord, RoomMessage,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;

use crate::feed::{Broadcast, FeedBroadcaster};
use crate::{ChangeFeed, FeedRecord, Page, RecordStore, StoreError};

const SESSION_COLUMNS: &str = "id, lat, lng, geohash, created_at, version, payload_json";
const MESSAGE_COLUMNS: &str = "id, room_id, sequence, created_at, payload_json";

/// Tunables for [`SqliteStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Per-collection broadcast buffer. Subscribers further behind than this
    /// observe a lag error.
    pub feed_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            feed_capacity: 1024,
        }
    }
}

/// Record store over a pooled SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    write_lock: Arc<Mutex<()>>,
    feeds: FeedBroadcaster,
}

impl SqliteStore {
    /// Wraps an already-migrated pool.
    pub fn new(pool: DbPool, settings: StoreSettings) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            feeds: FeedBroadcaster::new(settings.feed_capacity),
        }
    }

    /// Opens the database at `db_path`, applies pending migrations, and
    /// returns a store over it.
    ///
    /// # Errors
    ///
    /// Fails if the pool cannot be built or a migration fails.
    pub fn open(
        db_path: &str,
        db_settings: DbRuntimeSettings,
        settings: StoreSettings,
    ) -> Result<Self, StoreError> {
        let pool = create_pool(db_path, db_settings)?;
        {
            let conn = pool.get()?;
            let applied = run_migrations(&conn)?;
            tracing::info!(db_path, applied, "record store ready");
        }
        Ok(Self::new(pool, settings))
    }

    /// Creates a session at `location`. The geohash and `created_at` are
    /// assigned here, never by the caller.
    pub async fn create_session(
        &self,
        location: GeoPoint,
        payload: serde_json::Value,
    ) -> Result<ChangeEvent<IndexedRecord>, StoreError> {
        let geohash = encode(location, INDEX_PRECISION)?;
        let id = uuid::Uuid::new_v4().to_string();

        self.commit_change(move |tx, seq| {
            let created_at = next_created_at(tx, now_ms())?;
            let payload_json = serde_json::to_string(&payload)?;
            tx.execute(
                "INSERT INTO sessions (id, lat, lng, geohash, created_at, version, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    location.lat,
                    location.lng,
                    geohash.as_str(),
                    created_at,
                    seq as i64,
                    payload_json,
                ],
            )?;
            let record = IndexedRecord {
                id,
                location,
                geohash,
                created_at,
                version: seq,
                payload,
            };
            Ok((ChangeKind::Create, record))
        })
        .await
    }

    /// Moves a session, re-deriving its geohash.
    pub async fn move_session(
        &self,
        id: &str,
        location: GeoPoint,
    ) -> Result<ChangeEvent<IndexedRecord>, StoreError> {
        let geohash = encode(location, INDEX_PRECISION)?;
        let id = id.to_string();

        self.commit_change(move |tx, seq| {
            let mut record = load_session(tx, &id)?;
            tx.execute(
                "UPDATE sessions SET lat = ?2, lng = ?3, geohash = ?4, version = ?5 WHERE id = ?1",
                params![id, location.lat, location.lng, geohash.as_str(), seq as i64],
            )?;
            record.location = location;
            record.geohash = geohash;
            record.version = seq;
            Ok((ChangeKind::Update, record))
        })
        .await
    }

    /// Replaces a session's payload. The location is untouched.
    pub async fn update_session_payload(
        &self,
        id: &str,
        payload: serde_json::Value,
    ) -> Result<ChangeEvent<IndexedRecord>, StoreError> {
        let id = id.to_string();

        self.commit_change(move |tx, seq| {
            let mut record = load_session(tx, &id)?;
            tx.execute(
                "UPDATE sessions SET payload_json = ?2, version = ?3 WHERE id = ?1",
                params![id, serde_json::to_string(&payload)?, seq as i64],
            )?;
            record.payload = payload;
            record.version = seq;
            Ok((ChangeKind::Update, record))
        })
        .await
    }

    /// Deletes a session. The emitted event carries its last state.
    pub async fn delete_session(&self, id: &str) -> Result<ChangeEvent<IndexedRecord>, StoreError> {
        let id = id.to_string();

        self.commit_change(move |tx, seq| {
            let mut record = load_session(tx, &id)?;
            tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            record.version = seq;
            Ok((ChangeKind::Delete, record))
        })
        .await
    }

    /// Appends a message to `room_id` with the next room sequence.
    pub async fn append_message(
        &self,
        room_id: &str,
        payload: serde_json::Value,
    ) -> Result<ChangeEvent<RoomMessage>, StoreError> {
        let room_id = room_id.to_string();
        let id = uuid::Uuid::new_v4().to_string();

        self.commit_change(move |tx, _seq| {
            let sequence: i64 = tx.query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM messages WHERE room_id = ?1",
                params![room_id],
                |row| row.get(0),
            )?;
            let created_at = now_ms();
            tx.execute(
                "INSERT INTO messages (id, room_id, sequence, created_at, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    room_id,
                    sequence,
                    created_at,
                    serde_json::to_string(&payload)?
                ],
            )?;
            let message = RoomMessage {
                id,
                room_id,
                sequence: sequence as u64,
                created_at,
                payload,
            };
            Ok((ChangeKind::Create, message))
        })
        .await
    }

    /// Deletes every session created before `cutoff_ms`, one change per
    /// session. Returns the number deleted.
    pub async fn expire_sessions(&self, cutoff_ms: i64) -> Result<usize, StoreError> {
        let ids: Vec<String> = self
            .read(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id FROM sessions WHERE created_at < ?1 ORDER BY created_at")?;
                let ids = stmt
                    .query_map(params![cutoff_ms], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(ids)
            })
            .await?;

        let mut expired = 0;
        for id in ids {
            match self.delete_session(&id).await {
                Ok(_) => expired += 1,
                // Deleted concurrently by its owner.
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    async fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }

    async fn commit_change<R, F>(&self, apply: F) -> Result<ChangeEvent<R>, StoreError>
    where
        R: Broadcast + Serialize,
        F: FnOnce(&Transaction<'_>, u64) -> Result<(ChangeKind, R), StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let lock = Arc::clone(&self.write_lock);
        let feeds = self.feeds.clone();

        tokio::task::spawn_blocking(move || {
            let _guard = lock
                .lock()
                .map_err(|_| StoreError::Unavailable("write lock poisoned".to_string()))?;
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let collection = R::COLLECTION;

            let seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM change_log WHERE collection = ?1",
                params![collection.as_str()],
                |row| row.get(0),
            )?;
            let seq = seq as u64;

            let (kind, record) = apply(&tx, seq)?;
            tx.execute(
                "INSERT INTO change_log (collection, seq, kind, record_id, record_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    collection.as_str(),
                    seq as i64,
                    kind_str(kind),
                    record.record_id(),
                    serde_json::to_string(&record)?,
                ],
            )?;
            tx.commit()?;

            tracing::debug!(
                collection = %collection,
                seq,
                kind = kind_str(kind),
                record_id = record.record_id(),
                "committed change"
            );
            let event = ChangeEvent {
                kind,
                sequence: seq,
                record,
            };
            feeds.publish(event.clone());
            Ok(event)
        })
        .await?
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn range_query(
        &self,
        range: &KeyRange,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<Page<IndexedRecord>, StoreError> {
        let after = page_token.map(parse_range_token).transpose()?;
        let range = range.clone();
        let limit = limit.max(1);

        self.read(move |conn| {
            let (after_hash, after_id) = after.unwrap_or_default();
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE geohash >= ?1 AND geohash < ?2 AND (geohash, id) > (?3, ?4)
                 ORDER BY geohash, id
                 LIMIT ?5"
            ))?;
            let mut records = stmt
                .query_map(
                    params![range.start, range.end, after_hash, after_id, limit as i64 + 1],
                    session_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            let next_page_token = if records.len() > limit {
                records.truncate(limit);
                records
                    .last()
                    .map(|r| format!("{}:{}", r.geohash.as_str(), r.id))
            } else {
                None
            };
            Ok(Page {
                records,
                next_page_token,
            })
        })
        .await
    }

    async fn room_range(
        &self,
        room_id: &str,
        after_sequence: u64,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<Page<RoomMessage>, StoreError> {
        let after = match page_token {
            Some(token) => token
                .parse::<u64>()
                .map_err(|_| StoreError::InvalidPageToken(token.to_string()))?
                .max(after_sequence),
            None => after_sequence,
        };
        let room_id = room_id.to_string();
        let limit = limit.max(1);

        self.read(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE room_id = ?1 AND sequence > ?2
                 ORDER BY sequence
                 LIMIT ?3"
            ))?;
            let mut records = stmt
                .query_map(
                    params![room_id, after as i64, limit as i64 + 1],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            let next_page_token = if records.len() > limit {
                records.truncate(limit);
                records.last().map(|m| m.sequence.to_string())
            } else {
                None
            };
            Ok(Page {
                records,
                next_page_token,
            })
        })
        .await
    }

    async fn subscribe_sessions(&self) -> Result<ChangeFeed<IndexedRecord>, StoreError> {
        Ok(self.feeds.session_feed())
    }

    async fn subscribe_messages(&self) -> Result<ChangeFeed<RoomMessage>, StoreError> {
        Ok(self.feeds.message_feed())
    }

    async fn feed_cursor(&self, collection: Collection) -> Result<u64, StoreError> {
        self.read(move |conn| {
            let seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM change_log WHERE collection = ?1",
                params![collection.as_str()],
                |row| row.get(0),
            )?;
            Ok(seq as u64)
        })
        .await
    }

    async fn get_session(&self, id: &str) -> Result<IndexedRecord, StoreError> {
        let id = id.to_string();
        self.read(move |conn| load_session(conn, &id)).await
    }

    async fn get_message(&self, id: &str) -> Result<RoomMessage, StoreError> {
        let id = id.to_string();
        self.read(move |conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                message_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound {
                collection: Collection::Messages,
                id,
            })
        })
        .await
    }
}

fn load_session(conn: &Connection, id: &str) -> Result<IndexedRecord, StoreError> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
        params![id],
        session_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound {
        collection: Collection::Sessions,
        id: id.to_string(),
    })
}

fn parse_range_token(token: &str) -> Result<(String, String), StoreError> {
    token
        .split_once(':')
        .map(|(hash, id)| (hash.to_string(), id.to_string()))
        .ok_or_else(|| StoreError::InvalidPageToken(token.to_string()))
}

fn payload_from_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let json: String = row.get(idx)?;
    serde_json::from_str(&json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<IndexedRecord> {
    Ok(IndexedRecord {
        id: row.get(0)?,
        location: GeoPoint::new(row.get(1)?, row.get(2)?),
        geohash: GeohashKey::from_encoded(row.get::<_, String>(3)?),
        created_at: row.get(4)?,
        version: row.get::<_, i64>(5)? as u64,
        payload: payload_from_column(row, 6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<RoomMessage> {
    Ok(RoomMessage {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sequence: row.get::<_, i64>(2)? as u64,
        created_at: row.get(3)?,
        payload: payload_from_column(row, 4)?,
    })
}

/// `now`, bumped past every creation time handed out before so creation
/// times stay strictly increasing even across deletes and clock steps.
fn next_created_at(conn: &Connection, now: i64) -> Result<i64, StoreError> {
    let last: i64 = conn.query_row(
        "SELECT last_created_at FROM session_clock WHERE id = 1",
        [],
        |row| row.get(0),
    )?;
    let created_at = now.max(last + 1);
    conn.execute(
        "UPDATE session_clock SET last_created_at = ?1 WHERE id = 1",
        params![created_at],
    )?;
    Ok(created_at)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn kind_str(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Create => "create",
        ChangeKind::Update => "update",
        ChangeKind::Delete => "delete",
    }
}
