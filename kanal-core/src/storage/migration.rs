// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Database Schema Migration Framework
//!
//! Provides versioned schema migrations with transactional safety.
//! Each migration has a version number, name, and either SQL or a Rust callback.
//! The runner tracks applied versions in a `schema_version` table and runs
//! pending migrations in order within a single transaction.

use rusqlite::Connection;

use crate::crypto::SharedSecret;

use super::StorageError;

/// A single schema migration step.
pub struct Migration {
    /// Monotonically increasing version number (starting at 1).
    pub version: u32,
    /// Human-readable name for this migration.
    pub name: &'static str,
    /// The migration action: either SQL or a Rust callback.
    pub action: MigrationAction,
}

/// The action a migration performs.
pub enum MigrationAction {
    /// Pure SQL migration.
    Sql(&'static str),
    /// Rust callback migration (for data transformations that need the storage key).
    Callback(fn(&Connection, &SharedSecret) -> Result<(), StorageError>),
}

/// Runs schema migrations against a database connection.
pub struct MigrationRunner;

impl MigrationRunner {
    /// Runs all pending migrations in a transaction.
    ///
    /// Creates the `schema_version` table if it doesn't exist, then applies
    /// any migrations whose version is greater than the current schema version.
    /// All pending migrations run within a single transaction — if any migration
    /// fails, all changes are rolled back.
    pub fn run(
        conn: &Connection,
        key: &SharedSecret,
        migrations: &[Migration],
    ) -> Result<(), StorageError> {
        // Created outside the migration transaction: the current version has
        // to be readable before the transaction starts.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )?;

        let current_version = Self::current_version(conn)?;

        let pending: Vec<&Migration> = migrations
            .iter()
            .filter(|m| m.version > current_version)
            .collect();

        if pending.is_empty() {
            return Ok(());
        }

        for window in pending.windows(2) {
            if window[0].version >= window[1].version {
                return Err(StorageError::Migration(format!(
                    "Migrations are not in order: v{} before v{}",
                    window[0].version, window[1].version
                )));
            }
        }

        conn.execute_batch("BEGIN EXCLUSIVE TRANSACTION;")?;

        for migration in &pending {
            match &migration.action {
                MigrationAction::Sql(sql) => {
                    if let Err(e) = conn.execute_batch(sql) {
                        conn.execute_batch("ROLLBACK;")?;
                        return Err(StorageError::Migration(format!(
                            "Migration v{} '{}' failed: {}",
                            migration.version, migration.name, e
                        )));
                    }
                }
                MigrationAction::Callback(cb) => {
                    if let Err(e) = cb(conn, key) {
                        conn.execute_batch("ROLLBACK;")?;
                        return Err(StorageError::Migration(format!(
                            "Migration v{} '{}' callback failed: {}",
                            migration.version, migration.name, e
                        )));
                    }
                }
            }

            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);

            if let Err(e) = conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![migration.version, now as i64],
            ) {
                conn.execute_batch("ROLLBACK;")?;
                return Err(StorageError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e
                )));
            }
        }

        conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    /// Returns the current schema version, or 0 if no migrations have been applied.
    pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        let version: Option<u32> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap_or(None);

        Ok(version.unwrap_or(0))
    }
}

/// Returns all registered migrations in version order.
///
/// This is the single source of truth for the database schema.
/// New migrations are appended to the end of this list.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "baseline_schema",
            action: MigrationAction::Sql(MIGRATION_V1_BASELINE),
        },
        Migration {
            version: 2,
            name: "retry_queue_seq",
            action: MigrationAction::Sql(MIGRATION_V2_RETRY_SEQ),
        },
    ]
}

/// Migration v1: Baseline schema.
const MIGRATION_V1_BASELINE: &str = "
    -- Identity (encrypted master seed)
    CREATE TABLE IF NOT EXISTS identity (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        seed_encrypted BLOB NOT NULL,
        nickname TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    -- Peer keys with trust state
    CREATE TABLE IF NOT EXISTS peer_keys (
        peer_id TEXT PRIMARY KEY,
        public_key BLOB NOT NULL,
        trust TEXT NOT NULL DEFAULT 'unverified',
        fetched_at INTEGER NOT NULL
    );

    -- Retry queue (sealed envelopes awaiting acknowledgment)
    CREATE TABLE IF NOT EXISTS retry_entries (
        message_id TEXT PRIMARY KEY,
        recipient_id TEXT NOT NULL,
        envelope BLOB NOT NULL,
        attempt INTEGER NOT NULL DEFAULT 0,
        next_retry INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );

    -- Envelope counters per peer (sent: last issued, received: last accepted)
    CREATE TABLE IF NOT EXISTS envelope_counters (
        peer_id TEXT PRIMARY KEY,
        sent INTEGER NOT NULL DEFAULT 0,
        received INTEGER
    );

    -- Indexes
    CREATE INDEX IF NOT EXISTS idx_retry_next ON retry_entries(next_retry);
    CREATE INDEX IF NOT EXISTS idx_retry_recipient ON retry_entries(recipient_id);
";

/// Migration v2: Enqueue sequence column for stable FIFO ordering.
///
/// created_at has second granularity; two messages queued within the same
/// second need the sequence number to keep their order across a restart.
const MIGRATION_V2_RETRY_SEQ: &str = "
    ALTER TABLE retry_entries ADD COLUMN seq INTEGER NOT NULL DEFAULT 0;
    CREATE INDEX IF NOT EXISTS idx_retry_seq ON retry_entries(seq);
";
