//! Live proximity and chat-room views for the Barfly platform.
//!
//! A live view turns a one-shot query into an ordered stream of
//! [`Delta`](barfly_types::Delta)s. It is opened from a snapshot of the
//! record store and then kept current by diffing the store's change feed
//! incrementally; nothing is re-queried per change.
//!
//! - [`CandidateFetcher`] reads the planned geohash ranges, paginating each
//!   one and reporting ranges that failed.
//! - Each view runs as its own task. A single reader per collection fans
//!   the change feed out to the registered views.
//! - When a view loses the feed it rebuilds its snapshot and emits only the
//!   difference from what the subscriber already holds.

mod config;
mod engine;
mod error;
mod fetcher;
mod hub;
mod stream;
mod view;
mod worker;

pub use config::LiveConfig;
pub use engine::LiveSyncEngine;
pub use error::LiveError;
pub use fetcher::{CandidateFetcher, FetchOutcome};
pub use stream::{CancelHandle, DeltaStream};
