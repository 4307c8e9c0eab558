// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

pub mod envelope;
pub mod kdf;
pub mod password_kdf;
pub mod signing;

pub use envelope::{
    open, open_at_rest, seal, seal_at_rest, CryptoError, ReplayGuard, SealedBox, SharedSecret,
};
pub use kdf::{Hkdf, KdfError};
pub use password_kdf::{
    derive_key_argon2id, derive_key_pbkdf2_legacy, PasswordKdfError, WorkFactor,
};
pub use signing::{PublicKey, Signature, SigningError, SigningKeyPair};
