// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Identity and Key Store Tests
//!
//! Backup export/import through the text form, trust transitions across
//! key rotation, and signature verification against the public key.

use kanal_core::crypto::{PublicKey, WorkFactor};
use kanal_core::keystore::{Identity, IdentityBackup, KeyStore, KeyStoreError, TrustLevel};

// === Backup ===

#[test]
fn test_backup_roundtrip_through_base64() {
    let identity = Identity::create("alice");
    let backup = identity
        .export_backup("correct horse battery staple", WorkFactor::insecure_fast())
        .unwrap();

    // The text form is what actually gets written down or pasted.
    let text = backup.to_base64();
    let parsed = IdentityBackup::from_base64(&text).unwrap();
    let restored = Identity::import_backup(&parsed, "correct horse battery staple").unwrap();

    assert_eq!(restored.public_id(), identity.public_id());
    assert_eq!(restored.nickname(), "alice");
}

#[test]
fn test_backup_rejects_wrong_passphrase() {
    let identity = Identity::create("alice");
    let backup = identity
        .export_backup("right", WorkFactor::insecure_fast())
        .unwrap();

    assert!(matches!(
        Identity::import_backup(&backup, "wrong"),
        Err(KeyStoreError::InvalidPassphrase)
    ));
}

#[test]
fn test_backup_rejects_garbage_base64() {
    assert!(IdentityBackup::from_base64("not base64 at all!!!").is_err());
}

#[test]
fn test_restored_identity_signs_identically_verifiable() {
    let identity = Identity::create("alice");
    let backup = identity
        .export_backup("pass", WorkFactor::insecure_fast())
        .unwrap();
    let restored = Identity::import_backup(&backup, "pass").unwrap();

    let signature = restored.sign(b"challenge bytes");
    let public = PublicKey::from_bytes(*identity.signing_public_key());
    assert!(public.verify(b"challenge bytes", &signature).is_ok());
}

// === Trust transitions ===

#[test]
fn test_verified_peer_survives_identical_readd() {
    let bob = Identity::create("bob");
    let mut store = KeyStore::new(Identity::create("alice"));
    store.add_peer("bob-id", *bob.exchange_public_key());
    store.verify_peer("bob-id").unwrap();

    store.add_peer("bob-id", *bob.exchange_public_key());
    assert_eq!(store.peer("bob-id").unwrap().trust, TrustLevel::Verified);
}

#[test]
fn test_rotated_peer_key_loses_verification() {
    let mut store = KeyStore::new(Identity::create("alice"));
    store.add_peer("bob-id", *Identity::create("bob").exchange_public_key());
    store.verify_peer("bob-id").unwrap();

    store.add_peer("bob-id", *Identity::create("bob-new").exchange_public_key());
    assert_eq!(store.peer("bob-id").unwrap().trust, TrustLevel::Unverified);
}

#[test]
fn test_local_rotation_changes_shared_secrets() {
    let bob = Identity::create("bob");
    let mut store = KeyStore::new(Identity::create("alice"));
    store.add_peer("bob-id", *bob.exchange_public_key());

    let before = store.derive_shared_secret("bob-id").unwrap();
    store.rotate_identity();
    let after = store.derive_shared_secret("bob-id").unwrap();

    assert_ne!(before.as_bytes(), after.as_bytes());
}
