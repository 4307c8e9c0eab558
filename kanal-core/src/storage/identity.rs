// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Identity persistence.
//!
//! Exactly one identity row per database. The master seed is sealed under
//! the storage key; nickname and creation time are plain columns so the
//! row can be inspected without decrypting anything.

use rusqlite::params;
use zeroize::Zeroize;

use crate::crypto::{open_at_rest, seal_at_rest};
use crate::keystore::Identity;

use super::{Storage, StorageError};

impl Storage {
    /// Saves (or replaces) the local identity.
    pub fn save_identity(&self, identity: &Identity) -> Result<(), StorageError> {
        let sealed = seal_at_rest(identity.master_seed(), self.key())
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        self.conn().execute(
            "INSERT OR REPLACE INTO identity (id, seed_encrypted, nickname, created_at)
             VALUES (1, ?1, ?2, ?3)",
            params![sealed, identity.nickname(), identity.created_at() as i64],
        )?;
        Ok(())
    }

    /// Loads the local identity, if one was saved.
    pub fn load_identity(&self) -> Result<Option<Identity>, StorageError> {
        let row = self
            .conn()
            .query_row(
                "SELECT seed_encrypted, nickname, created_at FROM identity WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((sealed, nickname, created_at)) = row else {
            return Ok(None);
        };

        let mut seed_bytes = open_at_rest(&sealed, self.key())
            .map_err(|e| StorageError::Encryption(e.to_string()))?;
        if seed_bytes.len() != 32 {
            seed_bytes.zeroize();
            return Err(StorageError::Serialization(
                "identity seed has wrong length".to_string(),
            ));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&seed_bytes);
        seed_bytes.zeroize();

        Ok(Some(Identity::from_seed(seed, nickname, created_at as u64)))
    }

    /// Returns true if an identity has been saved.
    pub fn has_identity(&self) -> Result<bool, StorageError> {
        let count: u32 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM identity", [], |row| row.get(0))?;
        Ok(count > 0)
    }
}
