// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Network + Transport Layer
//!
//! Moves sealed envelopes between the client and the relay server.
//!
//! # Architecture
//!
//! The network layer consists of:
//! - **Transport trait**: Platform-agnostic interface for frame I/O
//! - **Frame codec**: Binary wire frames and handshake payloads
//! - **Connection manager**: Handshake, heartbeats, and reconnection
//!
//! Message content never reaches this layer in the clear; envelopes arrive
//! already sealed and leave still sealed.

#[cfg(feature = "testing")]
pub mod connection;
#[cfg(not(feature = "testing"))]
mod connection;

#[cfg(feature = "testing")]
pub mod error;
#[cfg(not(feature = "testing"))]
mod error;

#[cfg(feature = "testing")]
pub mod frame;
#[cfg(not(feature = "testing"))]
mod frame;

#[cfg(feature = "testing")]
pub mod mock;
#[cfg(not(feature = "testing"))]
mod mock;

#[cfg(feature = "testing")]
pub mod transport;
#[cfg(not(feature = "testing"))]
mod transport;

#[cfg(all(feature = "network", feature = "testing"))]
pub mod websocket;
#[cfg(all(feature = "network", not(feature = "testing")))]
mod websocket;

// Error types
pub use error::NetworkError;

// Frame codec
pub use frame::{
    encode_frame, try_decode_frame, AckPayload, ClientAuth, ClientHello, Frame, FrameType,
    ServerChallenge, WireEnvelope, FRAME_HEADER_SIZE, MAX_FRAME_SIZE,
};

// Transport abstraction
pub use transport::{ConnectionState, Transport, TransportConfig, TransportResult};

// Mock transport for testing
pub use mock::MockTransport;

// WebSocket transport for production
#[cfg(feature = "network")]
pub use websocket::WebSocketTransport;

// Connection management
pub use connection::{reconnect_delay, ConnectionManager};
