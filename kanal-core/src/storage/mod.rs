// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Encrypted Storage
//!
//! SQLite-backed persistence for everything that must survive a restart:
//! the identity seed, peer keys with their trust level, the retry queue,
//! and the per-peer envelope counters. Counter persistence is not optional
//! bookkeeping: a send counter that resets after a crash would reuse a
//! nonce, and a lost receive counter would reopen the replay window.
//!
//! Secret material (identity seed, queued envelopes) is sealed under a
//! storage key before it touches the database; row metadata needed for
//! queries (ids, timestamps, counters) stays in the clear.

pub mod error;
pub mod migration;

mod counters;
mod identity;
mod peers;
mod retry;

pub use counters::EnvelopeCounters;
pub use error::StorageError;
pub use migration::{all_migrations, Migration, MigrationAction, MigrationRunner};

use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::crypto::SharedSecret;

/// Encrypted SQLite storage.
pub struct Storage {
    conn: Connection,
    encryption_key: SharedSecret,
}

impl Storage {
    /// Opens (or creates) a database at the given path and runs pending
    /// migrations.
    pub fn open<P: AsRef<Path>>(path: P, encryption_key: SharedSecret) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::init(conn, encryption_key)
    }

    /// Opens an in-memory database. Used by tests and ephemeral sessions.
    pub fn in_memory(encryption_key: SharedSecret) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, encryption_key)
    }

    fn init(conn: Connection, encryption_key: SharedSecret) -> Result<Self, StorageError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        MigrationRunner::run(&conn, &encryption_key, &all_migrations())?;

        let version = MigrationRunner::current_version(&conn)?;
        info!(schema_version = version, "storage opened");

        Ok(Storage {
            conn,
            encryption_key,
        })
    }

    /// Returns the current schema version.
    pub fn schema_version(&self) -> Result<u32, StorageError> {
        MigrationRunner::current_version(&self.conn)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn key(&self) -> &SharedSecret {
        &self.encryption_key
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::open_test_storage;
    use super::*;

    #[test]
    fn test_open_runs_all_migrations() {
        let storage = open_test_storage();
        assert_eq!(storage.schema_version().unwrap(), 2);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let storage = open_test_storage();
        // Re-running against an up-to-date database is a no-op
        MigrationRunner::run(storage.conn(), storage.key(), &all_migrations()).unwrap();
        assert_eq!(storage.schema_version().unwrap(), 2);
    }

    #[test]
    fn test_out_of_order_migrations_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let key = SharedSecret::from_bytes([7u8; 32]);
        let bad = vec![
            Migration {
                version: 2,
                name: "second",
                action: MigrationAction::Sql("CREATE TABLE b (id INTEGER);"),
            },
            Migration {
                version: 1,
                name: "first",
                action: MigrationAction::Sql("CREATE TABLE a (id INTEGER);"),
            },
        ];
        assert!(matches!(
            MigrationRunner::run(&conn, &key, &bad),
            Err(StorageError::Migration(_))
        ));
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        let key = SharedSecret::from_bytes([7u8; 32]);
        let bad = vec![
            Migration {
                version: 1,
                name: "good",
                action: MigrationAction::Sql("CREATE TABLE a (id INTEGER);"),
            },
            Migration {
                version: 2,
                name: "broken",
                action: MigrationAction::Sql("THIS IS NOT SQL;"),
            },
        ];
        assert!(MigrationRunner::run(&conn, &key, &bad).is_err());

        // The good migration must not have been committed
        assert_eq!(MigrationRunner::current_version(&conn).unwrap(), 0);
        let table_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='a'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!table_exists);
    }
}
