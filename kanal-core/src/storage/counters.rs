// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Envelope counter persistence.
//!
//! Per peer, `sent` is the last counter issued for an outbound envelope
//! and `received` the last counter accepted from that peer. Both must be
//! written before the corresponding envelope is acted on: losing `sent`
//! means nonce reuse on the next send, losing `received` reopens the
//! replay window for everything already accepted.

use std::collections::HashMap;

use rusqlite::params;

use super::{Storage, StorageError};

/// A peer's persisted counter pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeCounters {
    pub peer_id: String,
    /// Last counter issued for an outbound envelope.
    pub sent: u64,
    /// Last counter accepted on an inbound envelope, if any was accepted.
    pub received: Option<u64>,
}

impl Storage {
    /// Records the last issued send counter for a peer.
    pub fn record_sent_counter(&self, peer_id: &str, counter: u64) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO envelope_counters (peer_id, sent) VALUES (?1, ?2)
             ON CONFLICT(peer_id) DO UPDATE SET sent = ?2",
            params![peer_id, counter as i64],
        )?;
        Ok(())
    }

    /// Records the last accepted receive counter for a peer.
    pub fn record_received_counter(&self, peer_id: &str, counter: u64) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO envelope_counters (peer_id, received) VALUES (?1, ?2)
             ON CONFLICT(peer_id) DO UPDATE SET received = ?2",
            params![peer_id, counter as i64],
        )?;
        Ok(())
    }

    /// Loads all counter pairs.
    pub fn load_counters(&self) -> Result<Vec<EnvelopeCounters>, StorageError> {
        let mut stmt = self
            .conn()
            .prepare("SELECT peer_id, sent, received FROM envelope_counters")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?,
            ))
        })?;

        let mut counters = Vec::new();
        for row in rows {
            let (peer_id, sent, received) = row?;
            counters.push(EnvelopeCounters {
                peer_id,
                sent: sent as u64,
                received: received.map(|r| r as u64),
            });
        }
        Ok(counters)
    }

    /// Loads the send counters as a map, ready for engine restore.
    pub fn load_send_counters(&self) -> Result<HashMap<String, u64>, StorageError> {
        Ok(self
            .load_counters()?
            .into_iter()
            .filter(|c| c.sent > 0)
            .map(|c| (c.peer_id, c.sent))
            .collect())
    }

    /// Loads the receive counters as a map, ready for engine restore.
    pub fn load_recv_counters(&self) -> Result<HashMap<String, u64>, StorageError> {
        Ok(self
            .load_counters()?
            .into_iter()
            .filter_map(|c| c.received.map(|r| (c.peer_id, r)))
            .collect())
    }
}
