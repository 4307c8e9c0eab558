// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! HKDF Key Derivation
//!
//! Domain-separated key derivation used for exchange seeds, nonce direction
//! tags, and shared-secret expansion.

use ring::hkdf;
use thiserror::Error;

/// KDF error types.
#[derive(Error, Debug)]
pub enum KdfError {
    #[error("Key derivation failed")]
    DerivationFailed,
}

/// HKDF-SHA256 wrapper producing 32-byte keys.
pub struct Hkdf;

struct OkmLen;

impl hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        32
    }
}

impl Hkdf {
    /// Derives a 32-byte key from input key material.
    ///
    /// `info` provides domain separation; two derivations with different
    /// info strings never yield related keys.
    pub fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> [u8; 32] {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, salt);
        let prk = salt.extract(ikm);
        let info_parts = [info];
        let okm = prk
            .expand(&info_parts, OkmLen)
            .expect("32-byte output is within HKDF-SHA256 bounds");

        let mut out = [0u8; 32];
        okm.fill(&mut out)
            .expect("output buffer matches requested length");
        out
    }
}
