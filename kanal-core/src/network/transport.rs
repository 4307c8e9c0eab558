// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Transport Trait
//!
//! Platform-agnostic abstraction for the relay link. Implementations move
//! raw frames; everything above (handshake, heartbeats, reconnect policy)
//! lives in the connection manager.

use super::error::NetworkError;
use super::frame::Frame;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, NetworkError>;

/// Connection state as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected to any server.
    Disconnected,
    /// Link is up, handshake in progress; only handshake frames may flow.
    Handshaking,
    /// Handshake complete, envelopes may flow.
    Authenticated,
    /// Link dropped, reconnect scheduled.
    Reconnecting { attempt: u32 },
}

/// Configuration for transport connections.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server URL/address.
    pub server_url: String,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Read/write timeout in milliseconds.
    pub io_timeout_ms: u64,
    /// Base delay for reconnect backoff, in seconds.
    pub reconnect_base_delay_secs: u64,
    /// Reconnect backoff cap, in seconds. Attempts continue at this
    /// interval indefinitely; the connection is never abandoned.
    pub reconnect_max_delay_secs: u64,
    /// Idle seconds before a heartbeat probe is sent.
    pub heartbeat_idle_secs: u64,
    /// Seconds to wait for a heartbeat response before declaring the
    /// connection dead.
    pub heartbeat_deadline_secs: u64,
    /// Seconds a handshake may take before the connection is declared
    /// dead and a reconnect is scheduled. A server that accepts the
    /// socket but never answers must not stall the client.
    pub handshake_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            server_url: String::new(),
            connect_timeout_ms: 10_000,
            io_timeout_ms: 30_000,
            reconnect_base_delay_secs: 1,
            reconnect_max_delay_secs: 300,
            heartbeat_idle_secs: 60,
            heartbeat_deadline_secs: 20,
            handshake_timeout_secs: 30,
        }
    }
}

impl TransportConfig {
    /// Creates a config pointed at a server URL.
    pub fn for_server(server_url: &str) -> Self {
        TransportConfig {
            server_url: server_url.to_string(),
            ..Default::default()
        }
    }
}

/// Transport trait for the relay link.
///
/// Abstracts the underlying mechanism (WebSocket, TCP, in-memory mock) so
/// the connection manager and tests are implementation-agnostic.
///
/// # Synchronous Interface
///
/// Methods are synchronous; platform implementations may run an async
/// runtime internally but expose a blocking interface here. `receive`
/// returns `Ok(None)` when no frame is currently available rather than
/// blocking indefinitely.
pub trait Transport: Send {
    /// Opens the link to the relay server.
    fn connect(&mut self, config: &TransportConfig) -> TransportResult<()>;

    /// Closes the link. Safe to call when already disconnected.
    fn disconnect(&mut self) -> TransportResult<()>;

    /// Returns whether the underlying link is open.
    fn is_open(&self) -> bool;

    /// Sends one frame.
    ///
    /// Returns an error if the link is not open.
    fn send(&mut self, frame: &Frame) -> TransportResult<()>;

    /// Receives the next frame, if one is available.
    fn receive(&mut self) -> TransportResult<Option<Frame>>;

    /// Checks if there are pending frames to receive (non-blocking).
    fn has_pending(&self) -> bool;
}
