// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Local Identity
//!
//! One identity per device installation, created on first run. All key
//! material is derived from a 32-byte master seed: the Ed25519 signing
//! keypair directly, the X25519 exchange keypair via HKDF with domain
//! separation. The seed is what gets backed up; everything else is
//! recomputable.

use ring::rand::SystemRandom;
use zeroize::Zeroize;

use crate::crypto::envelope::{self, SealedBox, SharedSecret};
use crate::crypto::password_kdf::{derive_key_argon2id, derive_key_pbkdf2_legacy, WorkFactor};
use crate::crypto::signing::{Signature, SigningKeyPair};
use crate::crypto::Hkdf;

use super::KeyStoreError;

/// Domain separation string for the exchange keypair seed.
const EXCHANGE_SEED_INFO: &[u8] = b"Kanal_Exchange_Seed";
/// Direction tag for backup encryption (a backup has only one direction).
const BACKUP_SEAL_TAG: &[u8] = b"Kanal_Identity_Backup";
/// Backup format tag: Argon2id-derived key.
const BACKUP_FORMAT_ARGON2ID: u8 = 0x01;
/// Backup format tag of exports created before the Argon2id migration:
/// PBKDF2-derived key, fixed iteration count, no work factor bytes.
const BACKUP_FORMAT_PBKDF2: u8 = 0x00;

/// User identity: long-term key pair, nickname, creation time.
pub struct Identity {
    /// Master seed all keys derive from (32 bytes).
    master_seed: [u8; 32],
    /// Ed25519 signing keypair.
    signing_keypair: SigningKeyPair,
    /// X25519 exchange public key.
    exchange_public_key: [u8; 32],
    /// User-chosen nickname.
    nickname: String,
    /// Unix timestamp of identity creation.
    created_at: u64,
}

impl Drop for Identity {
    fn drop(&mut self) {
        self.master_seed.zeroize();
    }
}

// Ring keypairs are not Clone; re-derive everything from the seed instead.
impl Clone for Identity {
    fn clone(&self) -> Self {
        Self::from_seed(self.master_seed, self.nickname.clone(), self.created_at)
    }
}

impl Identity {
    /// Creates a new identity with a random master seed.
    pub fn create(nickname: &str) -> Self {
        let rng = SystemRandom::new();
        let master_seed = ring::rand::generate::<[u8; 32]>(&rng)
            .expect("System RNG should not fail")
            .expose();

        Self::from_seed(master_seed, nickname.to_string(), unix_now())
    }

    /// Reconstructs an identity from a seed (backup restore, key rotation).
    pub fn from_seed(master_seed: [u8; 32], nickname: String, created_at: u64) -> Self {
        let signing_keypair = SigningKeyPair::from_seed(&master_seed);

        let exchange_seed = Hkdf::derive_key(&master_seed, &[], EXCHANGE_SEED_INFO);
        let exchange_secret = x25519_dalek::StaticSecret::from(exchange_seed);
        let exchange_public_key = *x25519_dalek::PublicKey::from(&exchange_secret).as_bytes();

        Identity {
            master_seed,
            signing_keypair,
            exchange_public_key,
            nickname,
            created_at,
        }
    }

    /// Returns the nickname.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Sets the nickname.
    pub fn set_nickname(&mut self, nickname: &str) {
        self.nickname = nickname.to_string();
    }

    /// Returns the creation timestamp.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Returns the Ed25519 signing public key bytes.
    pub fn signing_public_key(&self) -> &[u8; 32] {
        self.signing_keypair.public_key().as_bytes()
    }

    /// Returns the X25519 exchange public key bytes.
    pub fn exchange_public_key(&self) -> &[u8; 32] {
        &self.exchange_public_key
    }

    /// Returns the stable public identifier (hex fingerprint of signing key).
    pub fn public_id(&self) -> String {
        self.signing_keypair.public_key().fingerprint()
    }

    /// Signs a message with the identity signing key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_keypair.sign(message)
    }

    /// Returns the master seed for at-rest persistence.
    pub(crate) fn master_seed(&self) -> &[u8; 32] {
        &self.master_seed
    }

    /// Returns the X25519 exchange secret for shared-secret derivation.
    pub(super) fn exchange_secret(&self) -> x25519_dalek::StaticSecret {
        let exchange_seed = Hkdf::derive_key(&self.master_seed, &[], EXCHANGE_SEED_INFO);
        x25519_dalek::StaticSecret::from(exchange_seed)
    }

    /// Exports the identity as an encrypted backup.
    ///
    /// Format: `0x01 || m_cost u32 LE || t_cost u32 LE || p_cost u32 LE ||
    /// salt (16 bytes) || sealed payload`. The payload is
    /// `nickname_len u32 LE || nickname || master_seed (32) || created_at u64 LE`.
    pub fn export_backup(
        &self,
        passphrase: &str,
        work: WorkFactor,
    ) -> Result<IdentityBackup, KeyStoreError> {
        let rng = SystemRandom::new();
        let salt = ring::rand::generate::<[u8; 16]>(&rng)
            .map_err(|_| KeyStoreError::BackupFailed)?
            .expose();

        let key = derive_key_argon2id(passphrase.as_bytes(), &salt, work)
            .map_err(|_| KeyStoreError::BackupFailed)?;

        let name_bytes = self.nickname.as_bytes();
        let mut plaintext = Vec::with_capacity(4 + name_bytes.len() + 32 + 8);
        plaintext.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
        plaintext.extend_from_slice(name_bytes);
        plaintext.extend_from_slice(&self.master_seed);
        plaintext.extend_from_slice(&self.created_at.to_le_bytes());

        let sealed = envelope::seal(&plaintext, &key, BACKUP_SEAL_TAG, 0)
            .map_err(|_| KeyStoreError::BackupFailed)?;
        plaintext.zeroize();

        let mut data = Vec::with_capacity(1 + 12 + 16 + sealed.ciphertext.len());
        data.push(BACKUP_FORMAT_ARGON2ID);
        data.extend_from_slice(&work.m_cost.to_le_bytes());
        data.extend_from_slice(&work.t_cost.to_le_bytes());
        data.extend_from_slice(&work.p_cost.to_le_bytes());
        data.extend_from_slice(&salt);
        data.extend_from_slice(&sealed.ciphertext);

        Ok(IdentityBackup::new(data))
    }

    /// Imports an identity from an encrypted backup.
    ///
    /// Accepts current Argon2id exports and legacy PBKDF2 ones (format
    /// tag `0x00`: `tag || salt (16) || sealed payload`). Fails with a
    /// single `InvalidPassphrase` error for every failure mode after the
    /// structural length check, so a caller (or attacker) cannot tell a
    /// wrong passphrase from a tampered ciphertext.
    pub fn import_backup(backup: &IdentityBackup, passphrase: &str) -> Result<Self, KeyStoreError> {
        let data = backup.as_bytes();

        let (key, ciphertext) = match data.first() {
            Some(&BACKUP_FORMAT_ARGON2ID) => {
                // tag (1) + work factor (12) + salt (16)
                // + tag-only ciphertext (16) + minimum payload (4 + 32 + 8)
                if data.len() < 1 + 12 + 16 + 16 + 44 {
                    return Err(KeyStoreError::InvalidPassphrase);
                }
                let work = WorkFactor {
                    m_cost: u32::from_le_bytes(data[1..5].try_into().expect("length checked")),
                    t_cost: u32::from_le_bytes(data[5..9].try_into().expect("length checked")),
                    p_cost: u32::from_le_bytes(data[9..13].try_into().expect("length checked")),
                };
                let key = derive_key_argon2id(passphrase.as_bytes(), &data[13..29], work)
                    .map_err(|_| KeyStoreError::InvalidPassphrase)?;
                (key, data[29..].to_vec())
            }
            Some(&BACKUP_FORMAT_PBKDF2) => {
                // tag (1) + salt (16) + tag-only ciphertext (16)
                // + minimum payload (4 + 32 + 8)
                if data.len() < 1 + 16 + 16 + 44 {
                    return Err(KeyStoreError::InvalidPassphrase);
                }
                let key = derive_key_pbkdf2_legacy(passphrase.as_bytes(), &data[1..17])
                    .map_err(|_| KeyStoreError::InvalidPassphrase)?;
                (key, data[17..].to_vec())
            }
            _ => return Err(KeyStoreError::InvalidPassphrase),
        };

        let sealed = SealedBox {
            counter: 0,
            ciphertext,
        };
        let mut guard = crate::crypto::ReplayGuard::new();
        let plaintext = envelope::open(&sealed, &key, BACKUP_SEAL_TAG, &mut guard)
            .map_err(|_| KeyStoreError::InvalidPassphrase)?;

        if plaintext.len() < 4 {
            return Err(KeyStoreError::InvalidPassphrase);
        }
        let name_len = u32::from_le_bytes(plaintext[..4].try_into().expect("length checked")) as usize;
        if plaintext.len() != 4 + name_len + 32 + 8 {
            return Err(KeyStoreError::InvalidPassphrase);
        }

        let nickname = String::from_utf8(plaintext[4..4 + name_len].to_vec())
            .map_err(|_| KeyStoreError::InvalidPassphrase)?;
        let master_seed: [u8; 32] = plaintext[4 + name_len..4 + name_len + 32]
            .try_into()
            .expect("length checked");
        let created_at = u64::from_le_bytes(
            plaintext[4 + name_len + 32..]
                .try_into()
                .expect("length checked"),
        );

        Ok(Self::from_seed(master_seed, nickname, created_at))
    }
}

/// An encrypted identity backup blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityBackup {
    data: Vec<u8>,
}

impl IdentityBackup {
    /// Wraps raw backup bytes.
    pub fn new(data: Vec<u8>) -> Self {
        IdentityBackup { data }
    }

    /// Returns the raw backup bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Encodes the backup as base64 for display or transfer.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Decodes a backup from its base64 form.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyStoreError> {
        use base64::Engine;
        let data = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| KeyStoreError::InvalidPassphrase)?;
        Ok(IdentityBackup { data })
    }
}

/// Returns the current unix timestamp in seconds.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_secs()
}

/// Derives the shared secret between a local exchange secret and a peer's
/// exchange public key. Deterministic and symmetric: A with B's public key
/// yields the same secret as B with A's.
pub(super) fn derive_shared(
    local: &x25519_dalek::StaticSecret,
    peer_public: &[u8; 32],
) -> SharedSecret {
    let peer = x25519_dalek::PublicKey::from(*peer_public);
    let dh = local.diffie_hellman(&peer);
    let key = Hkdf::derive_key(dh.as_bytes(), &[], b"Kanal_Shared_Secret");
    SharedSecret::from_bytes(key)
}
