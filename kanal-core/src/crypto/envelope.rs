// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Envelope Sealing (XChaCha20-Poly1305)
//!
//! Authenticated encryption for message envelopes. Nonces are never random:
//! each envelope carries a monotonic counter, and the 24-byte nonce is
//! `counter (8 bytes BE) || direction tag (16 bytes)` where the direction
//! tag is derived from the shared secret and the sender's key fingerprint.
//! The two directions of a conversation therefore can never collide on a
//! nonce, and the receiver can detect replays deterministically: a counter
//! that is not strictly greater than the last accepted one is rejected
//! before any decryption work happens.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::XChaCha20Poly1305;
use thiserror::Error;
use zeroize::Zeroize;

use super::kdf::Hkdf;

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
const NONCE_SIZE: usize = 24;
/// Bytes of the nonce occupied by the counter.
const COUNTER_SIZE: usize = 8;
/// Authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Envelope crypto error types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// Authentication tag mismatch: tampered ciphertext or wrong key.
    #[error("Envelope authentication failed")]
    AuthFailure,
    /// Counter was not strictly greater than the last accepted counter.
    #[error("Replay detected: counter {counter} not after {last_accepted}")]
    ReplayDetected { counter: u64, last_accepted: u64 },
    #[error("Envelope sealing failed")]
    SealFailed,
}

/// Symmetric shared secret derived from a local/peer key pair.
#[derive(Clone)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't expose key bytes in debug output
        f.debug_struct("SharedSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl SharedSecret {
    /// Creates a shared secret from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SharedSecret { bytes }
    }

    /// Returns a reference to the secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

/// A sealed envelope body: the counter that derived the nonce, plus the
/// ciphertext with its appended authentication tag.
///
/// Built transiently from a message; never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    /// Monotonic per-direction counter; also the nonce prefix.
    pub counter: u64,
    /// Ciphertext including the 16-byte authentication tag.
    pub ciphertext: Vec<u8>,
}

/// Tracks the last accepted counter for one sender.
///
/// Only advances on a successful open, so a forged envelope cannot be used
/// to burn counters.
#[derive(Debug, Clone, Default)]
pub struct ReplayGuard {
    last_accepted: Option<u64>,
}

impl ReplayGuard {
    /// Creates a guard that accepts any counter on first use.
    pub fn new() -> Self {
        ReplayGuard::default()
    }

    /// Restores a guard from a persisted counter (process restart).
    pub fn resume(last_accepted: Option<u64>) -> Self {
        ReplayGuard { last_accepted }
    }

    /// Returns the last accepted counter, if any envelope was accepted.
    pub fn last_accepted(&self) -> Option<u64> {
        self.last_accepted
    }

    fn check(&self, counter: u64) -> Result<(), CryptoError> {
        match self.last_accepted {
            Some(last) if counter <= last => Err(CryptoError::ReplayDetected {
                counter,
                last_accepted: last,
            }),
            _ => Ok(()),
        }
    }

    fn advance(&mut self, counter: u64) {
        self.last_accepted = Some(counter);
    }
}

/// Derives the 24-byte nonce for a given counter and direction.
///
/// `sender_tag` is the sender's key fingerprint bytes; mixing it in keeps
/// the two directions of a conversation on disjoint nonce spaces even
/// though they share one secret.
fn derive_nonce(secret: &SharedSecret, sender_tag: &[u8], counter: u64) -> [u8; NONCE_SIZE] {
    let direction = Hkdf::derive_key(secret.as_bytes(), sender_tag, b"Kanal_Envelope_Nonce");

    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..COUNTER_SIZE].copy_from_slice(&counter.to_be_bytes());
    nonce[COUNTER_SIZE..].copy_from_slice(&direction[..NONCE_SIZE - COUNTER_SIZE]);
    nonce
}

/// Seals a plaintext into an envelope body.
///
/// The caller owns the counter and must never reuse a value for the same
/// (secret, sender) pair; the protocol engine issues counters monotonically
/// per recipient.
pub fn seal(
    plaintext: &[u8],
    secret: &SharedSecret,
    sender_tag: &[u8],
    counter: u64,
) -> Result<SealedBox, CryptoError> {
    let nonce_bytes = derive_nonce(secret, sender_tag, counter);

    let cipher = XChaCha20Poly1305::new(secret.as_bytes().into());
    let nonce = chacha20poly1305::XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::SealFailed)?;

    Ok(SealedBox {
        counter,
        ciphertext,
    })
}

/// Opens a sealed envelope body, enforcing replay protection.
///
/// Fails with `ReplayDetected` before any decryption if the counter is not
/// strictly greater than the guard's last accepted counter, and with
/// `AuthFailure` if the authentication tag does not verify. The guard
/// advances only when the open succeeds.
pub fn open(
    sealed: &SealedBox,
    secret: &SharedSecret,
    sender_tag: &[u8],
    guard: &mut ReplayGuard,
) -> Result<Vec<u8>, CryptoError> {
    guard.check(sealed.counter)?;

    let nonce_bytes = derive_nonce(secret, sender_tag, sealed.counter);

    let cipher = XChaCha20Poly1305::new(secret.as_bytes().into());
    let nonce = chacha20poly1305::XNonce::from_slice(&nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, sealed.ciphertext.as_slice())
        .map_err(|_| CryptoError::AuthFailure)?;

    guard.advance(sealed.counter);
    Ok(plaintext)
}

/// Seals data at rest under a storage key.
///
/// Uses a random nonce prepended to the ciphertext, since at-rest blobs
/// are rewritten in place and have no counter to derive a nonce from.
pub fn seal_at_rest(plaintext: &[u8], secret: &SharedSecret) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(secret.as_bytes().into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::SealFailed)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens an at-rest blob produced by [`seal_at_rest`].
pub fn open_at_rest(data: &[u8], secret: &SharedSecret) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::AuthFailure);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_SIZE);

    let cipher = XChaCha20Poly1305::new(secret.as_bytes().into());
    cipher
        .decrypt(chacha20poly1305::XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthFailure)
}
