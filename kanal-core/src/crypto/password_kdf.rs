// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Password-Based Key Derivation
//!
//! Argon2id derivation for identity backup export, with PBKDF2 fallback for
//! importing legacy exports. The work factor is configurable so callers can
//! raise it over time without a format change (the parameters travel with
//! the backup).

use ring::pbkdf2;
use std::num::NonZeroU32;
use zeroize::Zeroize;

use super::envelope::SharedSecret;

/// Password KDF error types.
#[derive(Debug, thiserror::Error)]
pub enum PasswordKdfError {
    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),
}

/// Argon2id work factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkFactor {
    /// Memory cost in KiB.
    pub m_cost: u32,
    /// Time cost (iterations).
    pub t_cost: u32,
    /// Parallelism lanes.
    pub p_cost: u32,
}

impl Default for WorkFactor {
    /// OWASP-recommended parameters: m=64MB, t=3, p=4.
    fn default() -> Self {
        WorkFactor {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl WorkFactor {
    /// Reduced parameters for tests (fast, NOT for production data).
    pub fn insecure_fast() -> Self {
        WorkFactor {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

/// PBKDF2 iterations used by legacy exports.
const LEGACY_PBKDF2_ITERATIONS: u32 = 100_000;

/// Derives a 32-byte key from a passphrase using Argon2id.
pub fn derive_key_argon2id(
    passphrase: &[u8],
    salt: &[u8],
    work: WorkFactor,
) -> Result<SharedSecret, PasswordKdfError> {
    let params = argon2::Params::new(work.m_cost, work.t_cost, work.p_cost, Some(32))
        .map_err(|e| PasswordKdfError::DerivationFailed(e.to_string()))?;

    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key_bytes = [0u8; 32];
    argon2
        .hash_password_into(passphrase, salt, &mut key_bytes)
        .map_err(|e| PasswordKdfError::DerivationFailed(e.to_string()))?;

    let key = SharedSecret::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}

/// Derives a 32-byte key from a passphrase using PBKDF2-HMAC-SHA256.
///
/// Only for decrypting exports created before the Argon2id migration.
pub fn derive_key_pbkdf2_legacy(
    passphrase: &[u8],
    salt: &[u8],
) -> Result<SharedSecret, PasswordKdfError> {
    let mut key_bytes = [0u8; 32];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::new(LEGACY_PBKDF2_ITERATIONS).expect("iteration count is non-zero"),
        salt,
        passphrase,
        &mut key_bytes,
    );

    let key = SharedSecret::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}
