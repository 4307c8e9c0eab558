// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use kanal_core::codec::{self, Message, MessageBody, MessageId};
use kanal_core::crypto::seal;
use kanal_core::keystore::{Identity, KeyStore};
use kanal_core::network::{ConnectionState, Frame, MockTransport, WireEnvelope};
use kanal_core::protocol::{EngineConfig, EventHandler, ProtocolEngine, TransportEvent};

/// Event handler that records every dispatched event.
pub struct Collector {
    pub events: Arc<Mutex<Vec<TransportEvent>>>,
}

impl EventHandler for Collector {
    fn on_event(&self, event: TransportEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// An engine wired to a mock transport, plus the peer's key material so
/// tests can seal traffic from the other side of the conversation.
pub struct EnginePair {
    pub engine: ProtocolEngine<MockTransport>,
    pub peer_keystore: KeyStore,
    pub peer_id: String,
    pub events: Arc<Mutex<Vec<TransportEvent>>>,
}

/// Builds an engine with a known peer, not yet connected.
pub fn offline_pair(config: EngineConfig) -> EnginePair {
    let local = Identity::create("Local");
    let peer = Identity::create("Peer");
    let local_id = local.public_id();
    let peer_id = peer.public_id();

    let mut local_ks = KeyStore::new(local);
    let mut peer_ks = KeyStore::new(peer);
    local_ks.add_peer(&peer_id, *peer_ks.identity().exchange_public_key());
    peer_ks.add_peer(&local_id, *local_ks.identity().exchange_public_key());

    let mut engine = ProtocolEngine::new(local_ks, MockTransport::with_auto_handshake(), config);
    let events = Arc::new(Mutex::new(Vec::new()));
    engine.add_handler(Arc::new(Collector {
        events: Arc::clone(&events),
    }));

    EnginePair {
        engine,
        peer_keystore: peer_ks,
        peer_id,
        events,
    }
}

/// Builds an engine with a known peer, connected and authenticated.
pub fn connected_pair() -> EnginePair {
    connected_pair_with(EngineConfig::default())
}

pub fn connected_pair_with(config: EngineConfig) -> EnginePair {
    let mut pair = offline_pair(config);
    pair.engine.connect(1000).unwrap();
    pair.engine.poll(1000).unwrap();
    assert_eq!(
        pair.engine.connection_state(),
        ConnectionState::Authenticated
    );
    pair
}

/// Seals a message from the peer's side and wraps it in an envelope frame.
pub fn peer_envelope(
    pair: &mut EnginePair,
    body: MessageBody,
    counter: u64,
    now: u64,
) -> (Frame, MessageId) {
    let local_id = pair.engine.keystore().identity().public_id();
    let message = Message::new(&pair.peer_id, &local_id, body, now);
    let plaintext = codec::encode(&message);
    let secret = pair.peer_keystore.derive_shared_secret(&local_id).unwrap();
    let sealed = seal(&plaintext, &secret, pair.peer_id.as_bytes(), counter).unwrap();
    let wire = WireEnvelope {
        message_id: message.id.clone(),
        sender: pair.peer_id.clone(),
        recipient: local_id,
        counter,
        ciphertext: sealed.ciphertext,
    };
    (wire.into_frame(), message.id)
}

/// Ids of all messages surfaced through Received events, in order.
pub fn received_ids(events: &Arc<Mutex<Vec<TransportEvent>>>) -> Vec<MessageId> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            TransportEvent::Received { message } => Some(message.id.clone()),
            _ => None,
        })
        .collect()
}
