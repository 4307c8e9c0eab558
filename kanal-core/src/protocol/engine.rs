// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Protocol Engine
//!
//! The top-level coordinator. Outbound: encode, seal, enqueue, transmit.
//! Inbound: open, decode, deduplicate, acknowledge, dispatch. Failed
//! inbound envelopes (bad auth, replayed counter, malformed bytes) are
//! logged and dropped without an acknowledgment, so the sender keeps
//! retrying against a possibly-recovered state.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::{self, CallSignal, CallSignalKind, CodecError, Message, MessageBody, MessageId};
use crate::crypto::envelope::{self, CryptoError, ReplayGuard, SealedBox};
use crate::keystore::{KeyStore, KeyStoreError};
use crate::network::{
    AckPayload, ConnectionManager, ConnectionState, Frame, FrameType, NetworkError, Transport,
    TransportConfig, WireEnvelope,
};
use crate::queue::{AttemptOutcome, RetryConfig, RetryEntry, RetryQueue};
use crate::storage::{Storage, StorageError};

use super::calls::{CallConfig, CallDirection, CallError, CallTracker};
use super::dedup::{DedupWindow, DEFAULT_DEDUP_WINDOW};
use super::events::{CallEvent, EventDispatcher, EventHandler, TransportEvent};

/// Protocol engine error types.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error(transparent)]
    Key(#[from] KeyStoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Configuration for the protocol engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Transport and reconnect settings.
    pub transport: TransportConfig,
    /// Retry queue scheduling.
    pub retry: RetryConfig,
    /// Call signaling settings.
    pub calls: CallConfig,
    /// Inbound dedup window size, in entries.
    pub dedup_window: usize,
}

impl EngineConfig {
    /// Creates a config pointed at a server URL, defaults elsewhere.
    pub fn for_server(server_url: &str) -> Self {
        EngineConfig {
            transport: TransportConfig::for_server(server_url),
            ..Default::default()
        }
    }
}

/// The protocol engine.
///
/// Caller-driven: the embedding application calls `poll` when transport
/// data may be available and `tick` on a coarse timer (once a second is
/// plenty). All outcomes surface through registered event handlers.
pub struct ProtocolEngine<T: Transport> {
    keystore: KeyStore,
    connection: ConnectionManager<T>,
    queue: RetryQueue,
    dedup: DedupWindow,
    calls: CallTracker,
    dispatcher: EventDispatcher,
    /// Last issued outbound counter per recipient. Persisted; reuse after
    /// a restart would repeat a nonce.
    send_counters: HashMap<String, u64>,
    /// Replay guard per sender.
    replay_guards: HashMap<String, ReplayGuard>,
    /// Connection state at the last event dispatch, for change detection.
    last_state: ConnectionState,
    /// Durable mirror of queue entries and envelope counters. Absent for
    /// ephemeral sessions; everything then lives for this process only.
    storage: Option<Storage>,
}

impl<T: Transport> ProtocolEngine<T> {
    /// Creates an engine over a transport.
    pub fn new(keystore: KeyStore, transport: T, config: EngineConfig) -> Self {
        let identity = keystore.identity().clone();
        let dedup_window = if config.dedup_window == 0 {
            DEFAULT_DEDUP_WINDOW
        } else {
            config.dedup_window
        };
        ProtocolEngine {
            keystore,
            connection: ConnectionManager::new(transport, config.transport, identity),
            queue: RetryQueue::with_config(config.retry),
            dedup: DedupWindow::new(dedup_window),
            calls: CallTracker::with_config(config.calls),
            dispatcher: EventDispatcher::new(),
            send_counters: HashMap::new(),
            replay_guards: HashMap::new(),
            last_state: ConnectionState::Disconnected,
            storage: None,
        }
    }

    /// Creates an engine backed by durable storage.
    ///
    /// Queued envelopes and counters persisted by a previous run are
    /// restored before any traffic flows, and every later mutation is
    /// mirrored back, so undelivered messages survive a restart and
    /// counters never regress across one.
    pub fn with_storage(
        keystore: KeyStore,
        transport: T,
        config: EngineConfig,
        storage: Storage,
    ) -> Result<Self, ProtocolError> {
        let mut engine = Self::new(keystore, transport, config);
        let entries = storage.load_retry_entries()?;
        let send_counters = storage.load_send_counters()?;
        let recv_counters = storage.load_recv_counters()?;
        engine.restore_state(entries, send_counters, recv_counters);
        engine.storage = Some(storage);
        Ok(engine)
    }

    /// Restores persisted state after a process restart.
    ///
    /// `send_counters` holds the last issued counter per recipient;
    /// `recv_counters` the last accepted counter per sender. Both must be
    /// restored before any traffic flows.
    pub fn restore_state(
        &mut self,
        queue_entries: Vec<RetryEntry>,
        send_counters: HashMap<String, u64>,
        recv_counters: HashMap<String, u64>,
    ) {
        self.queue = RetryQueue::rehydrate(self.queue.config().clone(), queue_entries);
        self.send_counters = send_counters;
        self.replay_guards = recv_counters
            .into_iter()
            .map(|(sender, last)| (sender, ReplayGuard::resume(Some(last))))
            .collect();
    }

    /// Registers an event handler.
    pub fn add_handler(&mut self, handler: std::sync::Arc<dyn EventHandler>) {
        self.dispatcher.add_handler(handler);
    }

    /// Opens the relay connection.
    pub fn connect(&mut self, now: u64) -> Result<(), ProtocolError> {
        let result = self.connection.connect(now);
        self.emit_state_change();
        result.map_err(ProtocolError::from)
    }

    /// Closes the relay connection. Queued messages stay queued.
    pub fn disconnect(&mut self) -> Result<(), ProtocolError> {
        self.connection.disconnect()?;
        self.emit_state_change();
        Ok(())
    }

    /// Returns the connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Sends a message to a peer.
    ///
    /// The message is sealed and queued durably before any transmission is
    /// attempted; offline sends succeed and flow out once the connection
    /// comes back.
    pub fn send_message(
        &mut self,
        recipient: &str,
        body: MessageBody,
        now: u64,
    ) -> Result<MessageId, ProtocolError> {
        let sender = self.keystore.identity().public_id();
        let mut message = Message::new(&sender, recipient, body, now);
        message.set_sender_nickname(self.keystore.identity().nickname());
        self.seal_and_enqueue(&message, now)
    }

    /// Pumps inbound traffic. Call when transport data may be available.
    pub fn poll(&mut self, now: u64) -> Result<(), ProtocolError> {
        loop {
            match self.connection.poll(now) {
                Ok(Some(frame)) => match frame.frame_type {
                    FrameType::Envelope => self.handle_envelope(&frame.payload, now),
                    FrameType::Ack => self.handle_ack(&frame.payload),
                    _ => {}
                },
                Ok(None) => break,
                Err(e) => {
                    self.emit_state_change();
                    return Err(e.into());
                }
            }
        }
        self.emit_state_change();
        if self.connection.is_authenticated() {
            self.flush_queue(now);
        }
        Ok(())
    }

    /// Advances timers: reconnects, heartbeats, retries, call expiry.
    pub fn tick(&mut self, now: u64) {
        self.connection.tick(now);
        self.emit_state_change();

        if self.connection.is_authenticated() {
            self.flush_queue(now);
        }

        for call_id in self.calls.tick(now) {
            self.dispatcher
                .dispatch(TransportEvent::Call(CallEvent::Ended { call_id }));
        }
    }

    // --- call signaling ---

    /// Starts an outbound call. Returns the new call id.
    pub fn start_call(
        &mut self,
        recipient: &str,
        sdp: &str,
        now: u64,
    ) -> Result<u64, ProtocolError> {
        let call_id = rand::random::<u64>();
        self.calls
            .offer(call_id, recipient, CallDirection::Outbound, now)?;
        self.send_call_signal(
            recipient,
            CallSignal {
                call_id,
                kind: CallSignalKind::Offer {
                    sdp: sdp.to_string(),
                },
            },
            now,
        )?;
        Ok(call_id)
    }

    /// Answers an incoming call. Fails for outbound calls: only the
    /// called side answers.
    pub fn answer_call(&mut self, call_id: u64, sdp: &str, now: u64) -> Result<(), ProtocolError> {
        let peer = self.call_peer(call_id)?;
        self.calls.answer_local(call_id)?;
        self.send_call_signal(
            &peer,
            CallSignal {
                call_id,
                kind: CallSignalKind::Answer {
                    sdp: sdp.to_string(),
                },
            },
            now,
        )?;
        Ok(())
    }

    /// Signals that this device is ringing for an incoming call.
    pub fn signal_ringing(&mut self, call_id: u64, now: u64) -> Result<(), ProtocolError> {
        let peer = self.call_peer(call_id)?;
        self.send_call_signal(
            &peer,
            CallSignal {
                call_id,
                kind: CallSignalKind::Ringing,
            },
            now,
        )?;
        Ok(())
    }

    /// Sends ICE candidates for an active call.
    pub fn send_ice_candidates(
        &mut self,
        call_id: u64,
        candidates: Vec<String>,
        now: u64,
    ) -> Result<(), ProtocolError> {
        if !self.calls.ice_allowed(call_id) {
            return Err(CallError::UnknownCall(call_id).into());
        }
        let peer = self.call_peer(call_id)?;
        self.send_call_signal(
            &peer,
            CallSignal {
                call_id,
                kind: CallSignalKind::IceCandidates { candidates },
            },
            now,
        )?;
        Ok(())
    }

    /// Ends a call. Covers hangup and reject; the wire signal is the same.
    pub fn hangup_call(&mut self, call_id: u64, now: u64) -> Result<(), ProtocolError> {
        let peer = self.call_peer(call_id)?;
        self.calls.end(call_id)?;
        self.send_call_signal(
            &peer,
            CallSignal {
                call_id,
                kind: CallSignalKind::Hangup,
            },
            now,
        )?;
        Ok(())
    }

    // --- accessors ---

    /// Returns the key store.
    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Returns the key store mutably (peer management).
    pub fn keystore_mut(&mut self) -> &mut KeyStore {
        &mut self.keystore
    }

    /// Returns the retry queue.
    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    /// Returns the call tracker.
    pub fn calls(&self) -> &CallTracker {
        &self.calls
    }

    /// Last issued outbound counter per recipient, for persistence.
    pub fn send_counters(&self) -> &HashMap<String, u64> {
        &self.send_counters
    }

    /// Last accepted inbound counter per sender, for persistence.
    pub fn recv_counters(&self) -> HashMap<String, u64> {
        self.replay_guards
            .iter()
            .filter_map(|(sender, guard)| guard.last_accepted().map(|c| (sender.clone(), c)))
            .collect()
    }

    /// Returns the underlying connection manager.
    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    /// Returns the underlying connection manager mutably.
    pub fn connection_mut(&mut self) -> &mut ConnectionManager<T> {
        &mut self.connection
    }

    // --- internals ---

    fn seal_and_enqueue(
        &mut self,
        message: &Message,
        now: u64,
    ) -> Result<MessageId, ProtocolError> {
        let plaintext = codec::encode(message);
        let secret = self.keystore.derive_shared_secret(&message.recipient)?;
        let counter = self.next_counter(&message.recipient);
        // The counter must hit disk before the envelope can leave: a
        // crash between send and record would reuse the nonce.
        if let Some(storage) = &self.storage {
            storage.record_sent_counter(&message.recipient, counter)?;
        }
        let sealed = envelope::seal(&plaintext, &secret, message.sender.as_bytes(), counter)?;

        let wire = WireEnvelope {
            message_id: message.id.clone(),
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            counter,
            ciphertext: sealed.ciphertext,
        };
        let entry = self
            .queue
            .enqueue(message.id.clone(), &message.recipient, wire.encode(), now)
            .clone();
        if let Some(storage) = &self.storage {
            storage.save_retry_entry(&entry)?;
        }
        debug!(message_id = %message.id, recipient = %message.recipient, "message queued");

        if self.connection.is_authenticated() {
            self.flush_queue(now);
        }
        Ok(message.id.clone())
    }

    fn send_call_signal(
        &mut self,
        recipient: &str,
        signal: CallSignal,
        now: u64,
    ) -> Result<MessageId, ProtocolError> {
        self.send_message(recipient, MessageBody::Call(signal), now)
    }

    fn call_peer(&self, call_id: u64) -> Result<String, ProtocolError> {
        self.calls
            .peer(call_id)
            .map(String::from)
            .ok_or_else(|| CallError::UnknownCall(call_id).into())
    }

    fn next_counter(&mut self, recipient: &str) -> u64 {
        let counter = self.send_counters.entry(recipient.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Transmits every due queue entry, head-of-line per recipient.
    fn flush_queue(&mut self, now: u64) {
        while let Some(entry) = self.queue.next_due(now) {
            let frame = Frame {
                frame_type: FrameType::Envelope,
                payload: entry.envelope.clone(),
            };
            if self.connection.send(&frame, now).is_err() {
                // Connection dropped mid-flush; entries stay queued.
                break;
            }
            match self.queue.record_attempt(&entry.message_id, now) {
                Some(AttemptOutcome::Exhausted) => {
                    warn!(message_id = %entry.message_id, "delivery attempts exhausted");
                    self.forget_stored_entry(&entry.message_id);
                    self.dispatcher.dispatch(TransportEvent::DeliveryFailed {
                        message_id: entry.message_id.clone(),
                        reason: "retry attempts exhausted".into(),
                    });
                }
                Some(AttemptOutcome::Rescheduled { .. }) => {
                    if let Some(updated) = self.queue.get(&entry.message_id) {
                        self.mirror_stored_entry(updated);
                    }
                }
                None => {}
            }
        }
    }

    fn handle_ack(&mut self, payload: &[u8]) {
        let ack = match AckPayload::decode(payload) {
            Ok(ack) => ack,
            Err(e) => {
                warn!(error = %e, "malformed ack dropped");
                return;
            }
        };
        if self.queue.ack(&ack.message_id) {
            debug!(message_id = %ack.message_id, "delivery confirmed");
            self.forget_stored_entry(&ack.message_id);
            self.dispatcher.dispatch(TransportEvent::Delivered {
                message_id: ack.message_id,
            });
        }
    }

    fn handle_envelope(&mut self, payload: &[u8], now: u64) {
        let wire = match WireEnvelope::decode(payload) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "malformed envelope dropped");
                return;
            }
        };

        // Relay redelivery: the id is already known good, re-ack and drop.
        if self.dedup.contains(&wire.sender, &wire.message_id) {
            debug!(message_id = %wire.message_id, "duplicate delivery re-acked");
            self.send_ack(&wire.message_id, now);
            return;
        }

        let secret = match self.keystore.derive_shared_secret(&wire.sender) {
            Ok(secret) => secret,
            Err(e) => {
                warn!(sender = %wire.sender, error = %e, "envelope from unusable peer dropped");
                return;
            }
        };

        let guard = self
            .replay_guards
            .entry(wire.sender.clone())
            .or_default();
        let sealed = SealedBox {
            counter: wire.counter,
            ciphertext: wire.ciphertext.clone(),
        };
        let plaintext = match envelope::open(&sealed, &secret, wire.sender.as_bytes(), guard) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(sender = %wire.sender, counter = wire.counter, error = %e, "envelope rejected");
                return;
            }
        };
        // Persist the accepted counter before the message takes effect,
        // or a crash would reopen the replay window for it.
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.record_received_counter(&wire.sender, wire.counter) {
                warn!(sender = %wire.sender, error = %e, "receive counter not persisted");
            }
        }

        let message = match codec::decode(&plaintext) {
            Ok(message) => message,
            Err(e) => {
                warn!(sender = %wire.sender, error = %e, "undecodable message dropped");
                return;
            }
        };
        // Cleartext header must agree with the authenticated content.
        if message.sender != wire.sender || message.id != wire.message_id {
            warn!(sender = %wire.sender, "envelope header mismatch, dropped");
            return;
        }

        if self.dedup.check_and_insert(&message.sender, &message.id) {
            self.send_ack(&message.id, now);
            return;
        }
        self.send_ack(&message.id, now);

        match &message.body {
            MessageBody::Call(signal) => self.handle_call_signal(&message, signal.clone(), now),
            _ => self.dispatcher.dispatch(TransportEvent::Received {
                message: Box::new(message),
            }),
        }
    }

    fn handle_call_signal(&mut self, message: &Message, signal: CallSignal, now: u64) {
        let call_id = signal.call_id;

        // Signals for an active call must come from its peer.
        if let Some(peer) = self.calls.peer(call_id) {
            if peer != message.sender {
                warn!(call_id, sender = %message.sender, "call signal from wrong peer dropped");
                return;
            }
        }

        match signal.kind {
            CallSignalKind::Offer { sdp } => {
                match self
                    .calls
                    .offer(call_id, &message.sender, CallDirection::Inbound, now)
                {
                    Ok(()) => self.dispatcher.dispatch(TransportEvent::Call(
                        CallEvent::Incoming {
                            call_id,
                            peer: message.sender.clone(),
                            sdp,
                        },
                    )),
                    Err(e) => debug!(call_id, error = %e, "call offer dropped"),
                }
            }
            CallSignalKind::Answer { sdp } => match self.calls.answer_remote(call_id) {
                Ok(()) => self
                    .dispatcher
                    .dispatch(TransportEvent::Call(CallEvent::Answered { call_id, sdp })),
                Err(e) => debug!(call_id, error = %e, "call answer dropped"),
            },
            CallSignalKind::Ringing => {
                if self.calls.state(call_id).is_some() {
                    self.dispatcher
                        .dispatch(TransportEvent::Call(CallEvent::Ringing { call_id }));
                } else {
                    debug!(call_id, "ringing for inactive call dropped");
                }
            }
            CallSignalKind::IceCandidates { candidates } => {
                if self.calls.ice_allowed(call_id) {
                    self.dispatcher.dispatch(TransportEvent::Call(
                        CallEvent::IceCandidates {
                            call_id,
                            candidates,
                        },
                    ));
                } else {
                    debug!(call_id, "ICE candidates outside call window dropped");
                }
            }
            CallSignalKind::Hangup => match self.calls.end(call_id) {
                Ok(()) => self
                    .dispatcher
                    .dispatch(TransportEvent::Call(CallEvent::Ended { call_id })),
                Err(e) => debug!(call_id, error = %e, "hangup for inactive call dropped"),
            },
        }
    }

    /// Mirrors an updated queue entry into storage. Attempt-count drift
    /// after a failed write is tolerable; the entry itself already exists.
    fn mirror_stored_entry(&self, entry: &RetryEntry) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_retry_entry(entry) {
                warn!(message_id = %entry.message_id, error = %e, "queue entry not persisted");
            }
        }
    }

    /// Removes a settled entry from storage. A failed delete means one
    /// extra retransmission after a restart, which acks absorb.
    fn forget_stored_entry(&self, message_id: &str) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.delete_retry_entry(message_id) {
                warn!(message_id, error = %e, "queue entry not removed from storage");
            }
        }
    }

    fn send_ack(&mut self, message_id: &str, now: u64) {
        let frame = AckPayload {
            message_id: message_id.to_string(),
        }
        .into_frame();
        if let Err(e) = self.connection.send(&frame, now) {
            // The relay will redeliver; the dedup window absorbs it.
            debug!(message_id, error = %e, "ack send failed");
        }
    }

    fn emit_state_change(&mut self) {
        let state = self.connection.state();
        if state != self.last_state {
            self.last_state = state.clone();
            self.dispatcher
                .dispatch(TransportEvent::ConnectionStateChanged { state });
        }
    }
}
