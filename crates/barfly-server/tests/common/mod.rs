#![allow(dead_code)]

use barfly_db::DbRuntimeSettings;
use barfly_live::LiveConfig;
use barfly_server::AppState;
use barfly_store::{SqliteStore, StoreSettings};
use barfly_types::GeoPoint;
use tempfile::TempDir;

pub const BELFAST: GeoPoint = GeoPoint::new(54.5973, -5.9301);

/// Builds application state over a fresh on-disk database. Keep the
/// returned directory alive for the duration of the test.
pub fn test_state() -> (AppState, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("barfly.db");
    let store = SqliteStore::open(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
        StoreSettings::default(),
    )
    .expect("open store");
    let live = LiveConfig {
        init_timeout_ms: 2_000,
        retry_backoff_ms: 10,
        max_backoff_ms: 50,
        ..LiveConfig::default()
    };
    (AppState::new(store, live), dir)
}
