use barfly_db::DbRuntimeSettings;
use barfly_geo::{plan_bounds, KeyRange};
use barfly_store::{FeedError, RecordStore, SqliteStore, StoreError, StoreSettings};
use barfly_types::{ChangeKind, Collection, GeoPoint, SearchQuery};
use futures_util::StreamExt;
use serde_json::json;
use tempfile::TempDir;

const BELFAST: GeoPoint = GeoPoint::new(54.5973, -5.9301);

fn open_store(settings: StoreSettings) -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.db");
    let store = SqliteStore::open(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
        settings,
    )
    .expect("open store");
    (dir, store)
}

fn whole_key_space() -> KeyRange {
    KeyRange {
        start: "0".to_string(),
        end: "~".to_string(),
    }
}

#[tokio::test]
async fn writes_assign_dense_sequences_and_versions() {
    let (_dir, store) = open_store(StoreSettings::default());

    let created = store
        .create_session(BELFAST, json!({"name": "Kelly's Cellars"}))
        .await
        .expect("create");
    assert_eq!(created.kind, ChangeKind::Create);
    assert_eq!(created.sequence, 1);
    assert_eq!(created.record.version, 1);
    assert_eq!(created.record.geohash.precision(), 10);
    assert!(created.record.geohash.as_str().starts_with("gcey"));

    let moved = store
        .move_session(&created.record.id, GeoPoint::new(54.60, -5.93))
        .await
        .expect("move");
    assert_eq!(moved.sequence, 2);
    assert_eq!(moved.record.version, 2);
    assert_eq!(moved.record.created_at, created.record.created_at);

    let stored = store.get_session(&created.record.id).await.expect("get");
    assert_eq!(stored, moved.record);
    assert_eq!(store.feed_cursor(Collection::Sessions).await.expect("cursor"), 2);
    assert_eq!(store.feed_cursor(Collection::Messages).await.expect("cursor"), 0);
}

#[tokio::test]
async fn created_at_is_strictly_increasing() {
    let (_dir, store) = open_store(StoreSettings::default());
    let mut last = i64::MIN;
    for _ in 0..5 {
        let event = store.create_session(BELFAST, json!({})).await.expect("create");
        assert!(event.record.created_at > last);
        last = event.record.created_at;
    }
}

#[tokio::test]
async fn invalid_location_is_rejected_before_writing() {
    let (_dir, store) = open_store(StoreSettings::default());
    let err = store
        .create_session(GeoPoint::new(95.0, 0.0), json!({}))
        .await
        .expect_err("latitude out of range");
    assert!(matches!(err, StoreError::Geo(_)));
    assert_eq!(store.feed_cursor(Collection::Sessions).await.expect("cursor"), 0);
}

#[tokio::test]
async fn missing_records_are_not_found() {
    let (_dir, store) = open_store(StoreSettings::default());
    assert!(matches!(
        store.get_session("nope").await,
        Err(StoreError::NotFound {
            collection: Collection::Sessions,
            ..
        })
    ));
    assert!(matches!(
        store.move_session("nope", BELFAST).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(matches!(
        store.get_message("nope").await,
        Err(StoreError::NotFound {
            collection: Collection::Messages,
            ..
        })
    ));
    // A failed write must not consume a sequence.
    assert_eq!(store.feed_cursor(Collection::Sessions).await.expect("cursor"), 0);
}

#[tokio::test]
async fn range_query_paginates_in_key_order() {
    let (_dir, store) = open_store(StoreSettings::default());
    for i in 0..7 {
        store
            .create_session(GeoPoint::new(54.59 + i as f64 * 0.001, -5.93), json!({ "i": i }))
            .await
            .expect("create");
    }

    let range = whole_key_space();
    let mut seen = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0;
    loop {
        let page = store
            .range_query(&range, token.as_deref(), 3)
            .await
            .expect("range query");
        assert!(page.records.len() <= 3);
        seen.extend(page.records);
        pages += 1;
        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 7);
    let keys: Vec<(String, String)> = seen
        .iter()
        .map(|r| (r.geohash.as_str().to_string(), r.id.clone()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[tokio::test]
async fn range_query_respects_bounds() {
    let (_dir, store) = open_store(StoreSettings::default());
    let near = store.create_session(BELFAST, json!({})).await.expect("create");
    store
        .create_session(GeoPoint::new(-33.8688, 151.2093), json!({}))
        .await
        .expect("create");

    let ranges = plan_bounds(&SearchQuery::new(BELFAST, 1_000.0)).expect("plan");
    let mut found = Vec::new();
    for range in &ranges {
        let page = store.range_query(range, None, 100).await.expect("query");
        found.extend(page.records.into_iter().map(|r| r.id));
    }
    assert_eq!(found, vec![near.record.id]);
}

#[tokio::test]
async fn bad_page_token_is_rejected() {
    let (_dir, store) = open_store(StoreSettings::default());
    let err = store
        .range_query(&whole_key_space(), Some("garbage"), 10)
        .await
        .expect_err("token without separator");
    assert!(matches!(err, StoreError::InvalidPageToken(_)));

    let err = store
        .room_range("room", 0, Some("not-a-number"), 10)
        .await
        .expect_err("non-numeric room token");
    assert!(matches!(err, StoreError::InvalidPageToken(_)));
}

#[tokio::test]
async fn room_sequences_are_per_room_and_contiguous() {
    let (_dir, store) = open_store(StoreSettings::default());
    let mut writers = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        let room = if i % 2 == 0 { "crown-bar" } else { "duke-of-york" };
        writers.push(tokio::spawn(async move {
            store
                .append_message(room, json!({ "text": format!("msg {i}") }))
                .await
                .expect("append")
        }));
    }
    for w in writers {
        w.await.expect("join");
    }

    for room in ["crown-bar", "duke-of-york"] {
        let page = store.room_range(room, 0, None, 100).await.expect("range");
        let seqs: Vec<u64> = page.records.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5], "room {room}");
    }

    let tail = store.room_range("crown-bar", 3, None, 100).await.expect("range");
    let seqs: Vec<u64> = tail.records.iter().map(|m| m.sequence).collect();
    assert_eq!(seqs, vec![4, 5]);

    let first = store.room_range("crown-bar", 0, None, 2).await.expect("range");
    assert_eq!(first.next_page_token.as_deref(), Some("2"));
    let second = store
        .room_range("crown-bar", 0, first.next_page_token.as_deref(), 2)
        .await
        .expect("range");
    assert_eq!(second.records[0].sequence, 3);

    assert_eq!(store.feed_cursor(Collection::Messages).await.expect("cursor"), 10);
}

#[tokio::test]
async fn feed_delivers_committed_changes_in_order() {
    let (_dir, store) = open_store(StoreSettings::default());
    let mut feed = store.subscribe_sessions().await.expect("subscribe");

    let created = store.create_session(BELFAST, json!({})).await.expect("create");
    let id = created.record.id.clone();
    store
        .update_session_payload(&id, json!({"status": "open"}))
        .await
        .expect("update");
    let deleted = store.delete_session(&id).await.expect("delete");
    assert_eq!(deleted.record.payload, json!({"status": "open"}));

    let mut kinds = Vec::new();
    for expected_seq in 1..=3 {
        let event = feed.next().await.expect("feed open").expect("no lag");
        assert_eq!(event.sequence, expected_seq);
        assert_eq!(event.record.id, id);
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![ChangeKind::Create, ChangeKind::Update, ChangeKind::Delete]
    );
}

#[tokio::test]
async fn slow_feed_subscriber_observes_lag() {
    let (_dir, store) = open_store(StoreSettings { feed_capacity: 2 });
    let mut feed = store.subscribe_messages().await.expect("subscribe");
    for i in 0..5 {
        store
            .append_message("room", json!({ "i": i }))
            .await
            .expect("append");
    }

    let first = feed.next().await.expect("feed open");
    assert!(matches!(first, Err(FeedError::Lagged(3))), "got {first:?}");
    let next = feed.next().await.expect("feed open").expect("event");
    assert_eq!(next.sequence, 4);
}

#[tokio::test]
async fn expire_sessions_deletes_only_old_records() {
    let (_dir, store) = open_store(StoreSettings::default());
    let old = store.create_session(BELFAST, json!({})).await.expect("create");
    let fresh = store.create_session(BELFAST, json!({})).await.expect("create");

    let expired = store
        .expire_sessions(fresh.record.created_at)
        .await
        .expect("expire");
    assert_eq!(expired, 1);
    assert!(store.get_session(&old.record.id).await.is_err());
    assert!(store.get_session(&fresh.record.id).await.is_ok());
    assert_eq!(store.feed_cursor(Collection::Sessions).await.expect("cursor"), 3);
}
