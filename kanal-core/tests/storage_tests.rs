// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Storage Tests
//!
//! Everything here opens a real database file and reopens it, because the
//! point of the storage layer is surviving a process restart: identity,
//! peer trust, queued envelopes, and the envelope counters that keep
//! nonces unique and the replay window closed.

use std::collections::HashMap;

use kanal_core::crypto::SharedSecret;
use kanal_core::keystore::{Identity, KeyStore, PeerKey, TrustLevel};
use kanal_core::queue::{RetryEntry, RetryQueue};
use kanal_core::storage::Storage;

use tempfile::TempDir;

fn storage_key() -> SharedSecret {
    SharedSecret::from_bytes([42u8; 32])
}

fn open_at(dir: &TempDir) -> Storage {
    Storage::open(dir.path().join("kanal.db"), storage_key()).unwrap()
}

// === Lifecycle ===

#[test]
fn test_open_creates_and_migrates() {
    let dir = TempDir::new().unwrap();
    let storage = open_at(&dir);
    assert!(storage.schema_version().unwrap() >= 1);
}

#[test]
fn test_reopen_keeps_schema_version() {
    let dir = TempDir::new().unwrap();
    let version = open_at(&dir).schema_version().unwrap();
    assert_eq!(open_at(&dir).schema_version().unwrap(), version);
}

// === Identity ===

#[test]
fn test_identity_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let identity = Identity::create("alice");
    let public_id = identity.public_id();

    open_at(&dir).save_identity(&identity).unwrap();

    let loaded = open_at(&dir).load_identity().unwrap().unwrap();
    assert_eq!(loaded.public_id(), public_id);
    assert_eq!(loaded.nickname(), "alice");
    // Derived key material must match, or old envelopes become unreadable.
    assert_eq!(loaded.exchange_public_key(), identity.exchange_public_key());
}

#[test]
fn test_identity_seed_requires_storage_key() {
    let dir = TempDir::new().unwrap();
    open_at(&dir).save_identity(&Identity::create("alice")).unwrap();

    let wrong_key = Storage::open(
        dir.path().join("kanal.db"),
        SharedSecret::from_bytes([0u8; 32]),
    )
    .unwrap();
    assert!(wrong_key.load_identity().is_err());
}

// === Peer keys ===

#[test]
fn test_peer_trust_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let peer = PeerKey {
        peer_id: "bob-id".into(),
        public_key: [0x0b; 32],
        trust: TrustLevel::Verified,
        fetched_at: 1_700_000_000,
    };
    open_at(&dir).save_peer(&peer).unwrap();

    let loaded = open_at(&dir).load_peer("bob-id").unwrap().unwrap();
    assert_eq!(loaded.trust, TrustLevel::Verified);
    assert_eq!(loaded.public_key, [0x0b; 32]);
}

#[test]
fn test_peers_restore_into_keystore() {
    let dir = TempDir::new().unwrap();
    let storage = open_at(&dir);
    storage
        .save_peer(&PeerKey {
            peer_id: "bob-id".into(),
            public_key: [0x0b; 32],
            trust: TrustLevel::Revoked,
            fetched_at: 1,
        })
        .unwrap();

    let mut keystore = KeyStore::new(Identity::create("alice"));
    for peer in open_at(&dir).load_peers().unwrap() {
        keystore.restore_peer(peer);
    }

    // A revoked peer stays unusable after a restart.
    assert!(keystore.derive_shared_secret("bob-id").is_err());
}

// === Retry queue ===

#[test]
fn test_retry_entries_rehydrate_in_order() {
    let dir = TempDir::new().unwrap();
    let storage = open_at(&dir);

    let mut queue = RetryQueue::new();
    for i in 0..3u8 {
        let entry = queue
            .enqueue(format!("msg-{i}"), "bob-id", vec![i], 100)
            .clone();
        storage.save_retry_entry(&entry).unwrap();
    }
    drop(storage);

    let entries = open_at(&dir).load_retry_entries().unwrap();
    let restored = RetryQueue::rehydrate(queue.config().clone(), entries);
    assert_eq!(restored.len(), 3);
    assert_eq!(restored.next_due(100).unwrap().message_id, "msg-0");
}

#[test]
fn test_acked_entry_gone_after_reopen() {
    let dir = TempDir::new().unwrap();
    let storage = open_at(&dir);
    let entry = RetryEntry {
        message_id: "msg-1".into(),
        recipient_id: "bob-id".into(),
        envelope: vec![1, 2, 3],
        attempt: 0,
        next_retry: 100,
        created_at: 100,
        seq: 0,
    };
    storage.save_retry_entry(&entry).unwrap();
    storage.delete_retry_entry("msg-1").unwrap();
    drop(storage);

    assert!(open_at(&dir).load_retry_entries().unwrap().is_empty());
}

// === Envelope counters ===

#[test]
fn test_counters_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let storage = open_at(&dir);
    storage.record_sent_counter("bob-id", 17).unwrap();
    storage.record_received_counter("bob-id", 9).unwrap();
    drop(storage);

    let storage = open_at(&dir);
    let send: HashMap<String, u64> = storage.load_send_counters().unwrap();
    let recv: HashMap<String, u64> = storage.load_recv_counters().unwrap();
    assert_eq!(send["bob-id"], 17);
    assert_eq!(recv["bob-id"], 9);
}

#[test]
fn test_counter_updates_are_monotonic_overwrites() {
    let dir = TempDir::new().unwrap();
    let storage = open_at(&dir);
    for counter in 1..=5 {
        storage.record_sent_counter("bob-id", counter).unwrap();
    }
    assert_eq!(storage.load_send_counters().unwrap()["bob-id"], 5);
}
