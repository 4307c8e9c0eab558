// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Ed25519 Signing
//!
//! Identity signatures for the relay handshake and key attestation.
//! All signing uses the audited `ring` implementation.

use ring::signature::{self, Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Signing error types.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Invalid seed for keypair derivation")]
    InvalidSeed,
    #[error("Signature verification failed")]
    VerificationFailed,
}

/// Ed25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    bytes: [u8; 32],
}

impl PublicKey {
    /// Creates a public key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey { bytes }
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Returns the hex fingerprint of this key.
    ///
    /// Used as the stable identifier for peers on the wire.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Verifies a signature over a message.
    pub fn verify(&self, message: &[u8], sig: &Signature) -> Result<(), SigningError> {
        let key = signature::UnparsedPublicKey::new(&signature::ED25519, &self.bytes);
        key.verify(message, sig.as_bytes())
            .map_err(|_| SigningError::VerificationFailed)
    }
}

/// Ed25519 signature (64 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    bytes: [u8; 64],
}

impl Signature {
    /// Creates a signature from raw bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Signature { bytes }
    }

    /// Returns the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.bytes
    }
}

/// Ed25519 signing keypair, deterministically derived from a seed.
pub struct SigningKeyPair {
    keypair: Ed25519KeyPair,
    public_key: PublicKey,
}

impl SigningKeyPair {
    /// Derives a keypair from a 32-byte seed.
    ///
    /// The same seed always yields the same keypair, which is what allows
    /// an identity to be restored from a backup.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let keypair = Ed25519KeyPair::from_seed_unchecked(seed)
            .expect("32-byte seed is always a valid Ed25519 seed");

        let mut public_bytes = [0u8; 32];
        public_bytes.copy_from_slice(keypair.public_key().as_ref());

        SigningKeyPair {
            keypair,
            public_key: PublicKey::from_bytes(public_bytes),
        }
    }

    /// Returns the public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Signs a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.keypair.sign(message);
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(sig.as_ref());
        Signature::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = SigningKeyPair::from_seed(&[7u8; 32]);
        let sig = keypair.sign(b"hello relay");
        keypair.public_key().verify(b"hello relay", &sig).unwrap();
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let keypair = SigningKeyPair::from_seed(&[7u8; 32]);
        let sig = keypair.sign(b"hello relay");
        assert!(keypair.public_key().verify(b"hello reIay", &sig).is_err());
    }

    #[test]
    fn test_deterministic_from_seed() {
        let a = SigningKeyPair::from_seed(&[42u8; 32]);
        let b = SigningKeyPair::from_seed(&[42u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_fingerprint_is_hex() {
        let keypair = SigningKeyPair::from_seed(&[1u8; 32]);
        let fp = keypair.public_key().fingerprint();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
