// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Key Store
//!
//! Single owner of all key material. Other components hold the store by
//! reference and request operations (sign, derive) instead of reading raw
//! secret bytes. Peer public keys carry an explicit trust level; a rotated
//! peer key never silently inherits the old key's verification.

pub mod identity;

pub use identity::{Identity, IdentityBackup};

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::crypto::{SharedSecret, Signature};

/// Key store error types.
#[derive(Error, Debug)]
pub enum KeyStoreError {
    /// The identity or the requested peer key is absent.
    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),
    /// The peer's key is revoked and the operation is trust-gated.
    #[error("Untrusted peer: {0}")]
    UntrustedPeer(String),
    #[error("Backup encryption failed")]
    BackupFailed,
    #[error("Invalid backup or wrong passphrase")]
    InvalidPassphrase,
}

/// Trust classification of a peer's public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    /// Key fetched from the directory, never verified in person.
    Unverified,
    /// Key verified out of band (fingerprint comparison, QR scan).
    Verified,
    /// Key explicitly revoked; trust-gated operations must fail.
    Revoked,
}

/// A peer's public key record.
#[derive(Debug, Clone)]
pub struct PeerKey {
    /// Stable peer identifier.
    pub peer_id: String,
    /// X25519 exchange public key.
    pub public_key: [u8; 32],
    /// Current trust level.
    pub trust: TrustLevel,
    /// Unix timestamp of when this key was fetched or rotated in.
    pub fetched_at: u64,
}

/// Owns the local identity and all known peer keys.
///
/// Shared secrets are cached per peer and the cache is invalidated wholesale
/// when the identity rotates, so no component can keep deriving against a
/// dead identity.
pub struct KeyStore {
    identity: Identity,
    peers: HashMap<String, PeerKey>,
    secret_cache: HashMap<String, SharedSecret>,
}

impl KeyStore {
    /// Creates a key store around an existing identity.
    pub fn new(identity: Identity) -> Self {
        KeyStore {
            identity,
            peers: HashMap::new(),
            secret_cache: HashMap::new(),
        }
    }

    /// Returns the local identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Signs bytes with the local identity key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.identity.sign(message)
    }

    /// Adds or rotates a peer key.
    ///
    /// A new key for a known peer replaces the old one but always re-enters
    /// as `Unverified`: rotation never inherits verification. Re-adding the
    /// identical key is a no-op that preserves the current trust level.
    pub fn add_peer(&mut self, peer_id: &str, public_key: [u8; 32]) {
        let fetched_at = identity::unix_now();

        match self.peers.get(peer_id) {
            Some(existing) if existing.public_key == public_key => {}
            Some(existing) => {
                debug!(peer = peer_id, "peer key rotated, trust reset to unverified");
                let was = existing.trust;
                self.peers.insert(
                    peer_id.to_string(),
                    PeerKey {
                        peer_id: peer_id.to_string(),
                        public_key,
                        // A revoked peer stays revoked through rotation
                        trust: if was == TrustLevel::Revoked {
                            TrustLevel::Revoked
                        } else {
                            TrustLevel::Unverified
                        },
                        fetched_at,
                    },
                );
                self.secret_cache.remove(peer_id);
            }
            None => {
                self.peers.insert(
                    peer_id.to_string(),
                    PeerKey {
                        peer_id: peer_id.to_string(),
                        public_key,
                        trust: TrustLevel::Unverified,
                        fetched_at,
                    },
                );
            }
        }
    }

    /// Restores a peer record loaded from storage, trust level included.
    pub fn restore_peer(&mut self, peer: PeerKey) {
        self.peers.insert(peer.peer_id.clone(), peer);
    }

    /// Marks a peer's key as verified.
    pub fn verify_peer(&mut self, peer_id: &str) -> Result<(), KeyStoreError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| KeyStoreError::KeyUnavailable(peer_id.to_string()))?;
        peer.trust = TrustLevel::Verified;
        Ok(())
    }

    /// Revokes a peer's key. Trust-gated operations fail afterwards.
    pub fn revoke_peer(&mut self, peer_id: &str) -> Result<(), KeyStoreError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| KeyStoreError::KeyUnavailable(peer_id.to_string()))?;
        peer.trust = TrustLevel::Revoked;
        self.secret_cache.remove(peer_id);
        Ok(())
    }

    /// Returns a peer record.
    pub fn peer(&self, peer_id: &str) -> Option<&PeerKey> {
        self.peers.get(peer_id)
    }

    /// Returns all peer records.
    pub fn peers(&self) -> impl Iterator<Item = &PeerKey> {
        self.peers.values()
    }

    /// Derives (or returns the cached) shared secret for a peer.
    ///
    /// Fails with `KeyUnavailable` if the peer is unknown and with
    /// `UntrustedPeer` if the peer's key is revoked.
    pub fn derive_shared_secret(&mut self, peer_id: &str) -> Result<SharedSecret, KeyStoreError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or_else(|| KeyStoreError::KeyUnavailable(peer_id.to_string()))?;

        if peer.trust == TrustLevel::Revoked {
            return Err(KeyStoreError::UntrustedPeer(peer_id.to_string()));
        }

        if let Some(secret) = self.secret_cache.get(peer_id) {
            return Ok(secret.clone());
        }

        let secret = identity::derive_shared(&self.identity.exchange_secret(), &peer.public_key);
        self.secret_cache
            .insert(peer_id.to_string(), secret.clone());
        Ok(secret)
    }

    /// Rotates the local identity to a fresh key pair.
    ///
    /// All cached shared secrets derived from the old identity are
    /// invalidated. Peer records are kept: their keys did not change.
    pub fn rotate_identity(&mut self) -> &Identity {
        let nickname = self.identity.nickname().to_string();
        self.identity = Identity::create(&nickname);
        self.secret_cache.clear();
        debug!(id = %self.identity.public_id(), "identity rotated");
        &self.identity
    }
}
