//! Embedded, versioned schema migrations.
//!
//! Each migration runs once, inside a transaction that also records its name
//! in `_barfly_migrations`, so a failed migration leaves no trace.

use std::collections::HashSet;

use rusqlite::Connection;
use thiserror::Error;

/// `(name, sql)` pairs in apply order. Append only.
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_records", include_str!("migrations/001_records.sql")),
    ("002_change_log", include_str!("migrations/002_change_log.sql")),
    ("003_session_clock", include_str!("migrations/003_session_clock.sql")),
];

const TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _barfly_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

#[derive(Debug, Error)]
pub enum MigrationError {
    /// A migration's SQL, or recording it, failed. Nothing from it was kept.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to read migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Applies every pending migration and returns how many ran.
///
/// # Errors
///
/// Stops at the first failing migration; earlier ones stay applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply_pending(conn, MIGRATIONS)
}

fn applied_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM _barfly_migrations")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<String>>>()?;
    Ok(names)
}

fn apply_one(conn: &Connection, name: &str, sql: &str) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.execute("INSERT INTO _barfly_migrations (name) VALUES (?1)", [name])?;
    tx.commit()
}

fn apply_pending(conn: &Connection, migrations: &[(&str, &str)]) -> Result<usize, MigrationError> {
    conn.execute_batch(TRACKING_TABLE)
        .map_err(MigrationError::StateQuery)?;
    let done = applied_names(conn).map_err(MigrationError::StateQuery)?;

    let mut applied = 0;
    for &(name, sql) in migrations {
        if done.contains(name) {
            continue;
        }
        apply_one(conn, name, sql).map_err(|source| MigrationError::ExecutionFailed {
            name: name.to_string(),
            source,
        })?;
        tracing::info!(migration = name, "applied migration");
        applied += 1;
    }
    tracing::debug!(applied, known = migrations.len(), "schema up to date");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, table: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table],
            |row| row.get(0),
        )
        .expect("query sqlite_master")
    }

    #[test]
    fn fresh_database_gets_every_migration_once() {
        let conn = Connection::open_in_memory().expect("open");
        assert_eq!(run_migrations(&conn).expect("first run"), MIGRATIONS.len());
        assert_eq!(run_migrations(&conn).expect("second run"), 0);

        for table in ["sessions", "messages", "change_log", "session_clock"] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
    }

    #[test]
    fn room_sequence_is_unique_per_room() {
        let conn = Connection::open_in_memory().expect("open");
        run_migrations(&conn).expect("migrate");

        let insert = |id: &str, room: &str| {
            conn.execute(
                "INSERT INTO messages (id, room_id, sequence, created_at, payload_json)
                 VALUES (?1, ?2, 1, 0, '{}')",
                [id, room],
            )
        };
        insert("m1", "room-a").expect("first message");
        insert("m2", "room-b").expect("same sequence in another room");
        assert!(insert("m3", "room-a").is_err(), "duplicate room sequence");
    }

    #[test]
    fn failed_migration_rolls_back_its_schema_changes() {
        let conn = Connection::open_in_memory().expect("open");
        let broken = [(
            "900_broken",
            "CREATE TABLE half_done (id INTEGER PRIMARY KEY);
             INSERT INTO no_such_table VALUES (1);",
        )];

        match apply_pending(&conn, &broken) {
            Err(MigrationError::ExecutionFailed { name, .. }) => assert_eq!(name, "900_broken"),
            other => panic!("expected ExecutionFailed, got {other:?}"),
        }
        assert!(!table_exists(&conn, "half_done"));
        assert!(applied_names(&conn).expect("names").is_empty());
    }
}
