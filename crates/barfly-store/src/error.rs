//! Error types for the record store.

use barfly_types::Collection;

/// Errors returned by [`RecordStore`](crate::RecordStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("store database setup failed: {0}")]
    PoolInit(#[from] barfly_db::PoolError),

    #[error("store migration failed: {0}")]
    Migration(#[from] barfly_db::MigrationError),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid location: {0}")]
    Geo(#[from] barfly_geo::GeoError),

    #[error("{collection} record not found: {id}")]
    NotFound { collection: Collection, id: String },

    #[error("invalid page token: {0:?}")]
    InvalidPageToken(String),

    #[error("store task failed: {0}")]
    Join(String),

    /// The backing store cannot serve requests right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Join(e.to_string())
    }
}

/// Errors carried inside a change feed. Any of them means the subscriber may
/// have missed events and must rebuild its state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("change feed lagged; {0} events were skipped")]
    Lagged(u64),

    #[error("change feed interrupted: {0}")]
    Interrupted(String),
}
