//! Database layer for the Barfly platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. Both the record tables and the change log
//! that backs the live feed are created through versioned migrations managed
//! by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: concurrent readers (snapshot range scans from
//!   many live views) with a single serialized writer.
//! - **`r2d2` connection pool**: bounded connection reuse for the blocking
//!   store calls that run on `spawn_blocking`.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
