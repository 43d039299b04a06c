//! Record store for the Barfly platform.
//!
//! The live sync engine only talks to storage through the [`RecordStore`]
//! trait: geohash range queries with pagination, per-room sequence ranges,
//! point lookups, and one ordered change feed per collection. Any store that
//! can range-scan a sortable key and publish a change feed can back it.
//!
//! [`SqliteStore`] is the bundled implementation. Every write runs in a
//! single transaction that also appends to the `change_log` table, and the
//! resulting [`ChangeEvent`](barfly_types::ChangeEvent) is broadcast while
//! the write lock is still held, so the feed is published in commit order.

mod error;
mod feed;
mod sqlite;
mod traits;

pub use error::{FeedError, StoreError};
pub use sqlite::{SqliteStore, StoreSettings};
pub use traits::{ChangeFeed, FeedRecord, Page, RecordStore};
