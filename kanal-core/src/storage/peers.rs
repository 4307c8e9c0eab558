// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Peer key persistence.

use rusqlite::{params, Row};

use crate::keystore::{PeerKey, TrustLevel};

use super::{Storage, StorageError};

fn trust_to_str(trust: TrustLevel) -> &'static str {
    match trust {
        TrustLevel::Unverified => "unverified",
        TrustLevel::Verified => "verified",
        TrustLevel::Revoked => "revoked",
    }
}

fn trust_from_str(s: &str) -> Result<TrustLevel, StorageError> {
    match s {
        "unverified" => Ok(TrustLevel::Unverified),
        "verified" => Ok(TrustLevel::Verified),
        "revoked" => Ok(TrustLevel::Revoked),
        other => Err(StorageError::Serialization(format!(
            "unknown trust level: {other}"
        ))),
    }
}

fn row_to_peer(row: &Row) -> Result<(String, Vec<u8>, String, i64), rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
    ))
}

fn peer_from_columns(
    peer_id: String,
    key_bytes: Vec<u8>,
    trust: String,
    fetched_at: i64,
) -> Result<PeerKey, StorageError> {
    let public_key: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
        StorageError::Serialization(format!("peer key for {peer_id} has wrong length"))
    })?;
    Ok(PeerKey {
        peer_id,
        public_key,
        trust: trust_from_str(&trust)?,
        fetched_at: fetched_at as u64,
    })
}

impl Storage {
    /// Saves (or replaces) a peer key record.
    pub fn save_peer(&self, peer: &PeerKey) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO peer_keys (peer_id, public_key, trust, fetched_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                peer.peer_id,
                peer.public_key.as_slice(),
                trust_to_str(peer.trust),
                peer.fetched_at as i64
            ],
        )?;
        Ok(())
    }

    /// Loads a single peer record.
    pub fn load_peer(&self, peer_id: &str) -> Result<Option<PeerKey>, StorageError> {
        let row = self
            .conn()
            .query_row(
                "SELECT peer_id, public_key, trust, fetched_at
                 FROM peer_keys WHERE peer_id = ?1",
                params![peer_id],
                row_to_peer,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        row.map(|(id, key, trust, fetched)| peer_from_columns(id, key, trust, fetched))
            .transpose()
    }

    /// Loads all peer records.
    pub fn load_peers(&self) -> Result<Vec<PeerKey>, StorageError> {
        let mut stmt = self.conn().prepare(
            "SELECT peer_id, public_key, trust, fetched_at FROM peer_keys ORDER BY peer_id",
        )?;
        let rows = stmt.query_map([], row_to_peer)?;

        let mut peers = Vec::new();
        for row in rows {
            let (id, key, trust, fetched) = row?;
            peers.push(peer_from_columns(id, key, trust, fetched)?);
        }
        Ok(peers)
    }

    /// Deletes a peer record. Returns true if a row was removed.
    pub fn delete_peer(&self, peer_id: &str) -> Result<bool, StorageError> {
        let changed = self
            .conn()
            .execute("DELETE FROM peer_keys WHERE peer_id = ?1", params![peer_id])?;
        Ok(changed > 0)
    }
}
