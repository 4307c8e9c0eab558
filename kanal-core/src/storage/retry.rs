// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Retry queue persistence.
//!
//! The in-memory queue is authoritative during a session; the protocol
//! engine mirrors every mutation here so queued envelopes survive a
//! restart. Envelope bytes are sealed under the storage key.

use rusqlite::{params, Row};

use crate::crypto::{open_at_rest, seal_at_rest};
use crate::queue::RetryEntry;

use super::{Storage, StorageError};

fn row_to_columns(row: &Row) -> Result<(String, String, Vec<u8>, u32, i64, i64, i64), rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

impl Storage {
    /// Saves (or replaces) a retry entry.
    ///
    /// Used both for new enqueues and for attempt-count updates, since the
    /// message id is the primary key.
    pub fn save_retry_entry(&self, entry: &RetryEntry) -> Result<(), StorageError> {
        let sealed = seal_at_rest(&entry.envelope, self.key())
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        self.conn().execute(
            "INSERT OR REPLACE INTO retry_entries
             (message_id, recipient_id, envelope, attempt, next_retry, created_at, seq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.message_id,
                entry.recipient_id,
                sealed,
                entry.attempt,
                entry.next_retry as i64,
                entry.created_at as i64,
                entry.seq as i64
            ],
        )?;
        Ok(())
    }

    /// Deletes a retry entry (acknowledged, exhausted, or permanently
    /// failed). Returns true if a row was removed.
    pub fn delete_retry_entry(&self, message_id: &str) -> Result<bool, StorageError> {
        let changed = self.conn().execute(
            "DELETE FROM retry_entries WHERE message_id = ?1",
            params![message_id],
        )?;
        Ok(changed > 0)
    }

    /// Loads all retry entries in enqueue order, ready for
    /// [`crate::queue::RetryQueue::rehydrate`].
    pub fn load_retry_entries(&self) -> Result<Vec<RetryEntry>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, recipient_id, envelope, attempt, next_retry, created_at, seq
             FROM retry_entries ORDER BY seq",
        )?;
        let rows = stmt.query_map([], row_to_columns)?;

        let mut entries = Vec::new();
        for row in rows {
            let (message_id, recipient_id, sealed, attempt, next_retry, created_at, seq) = row?;
            let envelope = open_at_rest(&sealed, self.key())
                .map_err(|e| StorageError::Encryption(e.to_string()))?;
            entries.push(RetryEntry {
                message_id,
                recipient_id,
                envelope,
                attempt,
                next_retry: next_retry as u64,
                created_at: created_at as u64,
                seq: seq as u64,
            });
        }
        Ok(entries)
    }
}
