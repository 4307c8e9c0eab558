// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Kanal Core Library
//!
//! Secure message transport core for an end-to-end encrypted messaging
//! client. Messages are encoded to a versioned binary format, sealed with
//! XChaCha20-Poly1305 under per-peer shared secrets, queued durably, and
//! moved over a framed transport with automatic reconnection. The relay
//! server only ever sees sealed envelopes and routing metadata.

pub mod codec;
pub mod crypto;
pub mod keystore;
pub mod network;
pub mod protocol;
pub mod queue;
pub mod storage;

pub use codec::{
    decode, encode, new_message_id, BlobRef, CallSignal, CallSignalKind, CodecError, DeliveryState,
    Message, MessageBody, MessageId, OptionalField, StatusKind, StatusUpdate, UnknownField,
    FORMAT_VERSION,
};
pub use crypto::{
    open, seal, CryptoError, PublicKey, ReplayGuard, SealedBox, SharedSecret, Signature,
    SigningKeyPair, WorkFactor,
};
pub use keystore::{Identity, IdentityBackup, KeyStore, KeyStoreError, PeerKey, TrustLevel};
pub use network::{
    ConnectionManager, ConnectionState, Frame, FrameType, MockTransport, NetworkError, Transport,
    TransportConfig, WireEnvelope,
};
#[cfg(feature = "network")]
pub use network::WebSocketTransport;
pub use protocol::{
    CallEvent, CallTracker, EngineConfig, EventHandler, ProtocolEngine, ProtocolError,
    TransportEvent,
};
pub use queue::{AttemptOutcome, RetryConfig, RetryEntry, RetryQueue};
pub use storage::{Storage, StorageError};
