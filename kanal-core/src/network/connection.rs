// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Connection Manager
//!
//! Manages the relay connection lifecycle: authentication handshake,
//! heartbeats, and reconnection with capped backoff. Reconnects are never
//! abandoned; after the backoff cap is reached the manager keeps retrying
//! at that interval until the link comes back.
//!
//! The manager is caller-driven. `tick(now)` advances timers (reconnect
//! schedule, heartbeat probes); `poll(now)` pumps inbound frames,
//! consuming handshake and heartbeat traffic internally and handing
//! everything else to the caller.

use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, info, warn};

use super::error::NetworkError;
use super::frame::{ClientAuth, ClientHello, Frame, FrameType, ServerChallenge};
use super::transport::{ConnectionState, Transport, TransportConfig, TransportResult};
use crate::keystore::Identity;

/// Connection manager with handshake, heartbeat, and reconnect handling.
///
/// Wraps a transport implementation and adds:
/// - Challenge-response authentication on connect
/// - Heartbeat probes after idle periods
/// - Reconnection with capped exponential backoff (unbounded attempts)
pub struct ConnectionManager<T: Transport> {
    transport: T,
    config: TransportConfig,
    identity: Identity,
    state: ConnectionState,
    /// Nonce sent in the last ClientHello; signed together with the
    /// server challenge to bind the signature to this connection.
    client_nonce: Option<[u8; 32]>,
    reconnect_attempt: u32,
    /// Unix time of the next scheduled reconnect, when reconnecting.
    next_reconnect_at: u64,
    /// Unix time of the last frame sent or received while authenticated.
    last_activity: u64,
    /// Unix time a heartbeat probe was sent, if one is outstanding.
    heartbeat_sent_at: Option<u64>,
    /// Unix time the current handshake started, while handshaking.
    handshake_started_at: Option<u64>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a new connection manager.
    pub fn new(transport: T, config: TransportConfig, identity: Identity) -> Self {
        ConnectionManager {
            transport,
            config,
            identity,
            state: ConnectionState::Disconnected,
            client_nonce: None,
            reconnect_attempt: 0,
            next_reconnect_at: 0,
            last_activity: 0,
            heartbeat_sent_at: None,
            handshake_started_at: None,
        }
    }

    /// Opens the link and starts the handshake.
    ///
    /// The connection is not usable for envelopes until the server
    /// accepts the handshake and the state reaches `Authenticated`.
    pub fn connect(&mut self, now: u64) -> TransportResult<()> {
        if let Err(e) = self.transport.connect(&self.config) {
            self.schedule_reconnect(now);
            return Err(e);
        }
        self.begin_handshake(now)
    }

    /// Disconnects deliberately. No reconnect is scheduled.
    pub fn disconnect(&mut self) -> TransportResult<()> {
        self.state = ConnectionState::Disconnected;
        self.client_nonce = None;
        self.heartbeat_sent_at = None;
        self.handshake_started_at = None;
        self.reconnect_attempt = 0;
        self.transport.disconnect()
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.clone()
    }

    /// Returns true if the handshake has completed.
    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// Sends a frame over the authenticated connection.
    ///
    /// Fails with `NotConnected` while the handshake is incomplete; the
    /// caller keeps the payload queued and retries after authentication.
    pub fn send(&mut self, frame: &Frame, now: u64) -> TransportResult<()> {
        if self.state != ConnectionState::Authenticated {
            return Err(NetworkError::NotConnected);
        }
        match self.transport.send(frame) {
            Ok(()) => {
                self.last_activity = now;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "send failed, connection lost");
                self.on_connection_lost(now);
                Err(NetworkError::ConnectionLost(e.to_string()))
            }
        }
    }

    /// Pumps inbound frames.
    ///
    /// Handshake and heartbeat frames are consumed internally; the first
    /// application frame (envelope or ack) is returned. `Ok(None)` means
    /// no application frame is currently available.
    pub fn poll(&mut self, now: u64) -> TransportResult<Option<Frame>> {
        loop {
            if self.state == ConnectionState::Disconnected
                || matches!(self.state, ConnectionState::Reconnecting { .. })
            {
                return Ok(None);
            }
            let frame = match self.transport.receive() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(None),
                Err(e) => {
                    warn!(error = %e, "receive failed, connection lost");
                    self.on_connection_lost(now);
                    return Err(NetworkError::ConnectionLost(e.to_string()));
                }
            };
            self.last_activity = now;

            match frame.frame_type {
                FrameType::ServerChallenge => self.answer_challenge(&frame)?,
                FrameType::AuthOk => {
                    info!("handshake complete, connection authenticated");
                    self.state = ConnectionState::Authenticated;
                    self.reconnect_attempt = 0;
                    self.client_nonce = None;
                    self.handshake_started_at = None;
                }
                FrameType::Heartbeat => {
                    self.transport
                        .send(&Frame::empty(FrameType::HeartbeatAck))
                        .map_err(|e| NetworkError::ConnectionLost(e.to_string()))?;
                }
                FrameType::HeartbeatAck => {
                    self.heartbeat_sent_at = None;
                }
                FrameType::ClientHello | FrameType::ClientAuth => {
                    // Client-to-server frames have no business arriving here.
                    return Err(NetworkError::MalformedFrame(format!(
                        "unexpected frame {:?} from server",
                        frame.frame_type
                    )));
                }
                FrameType::Envelope | FrameType::Ack => {
                    if self.state != ConnectionState::Authenticated {
                        return Err(NetworkError::HandshakeFailed(
                            "application frame before AuthOk".into(),
                        ));
                    }
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Advances timers: reconnect schedule, handshake deadline, and
    /// heartbeat probes.
    pub fn tick(&mut self, now: u64) {
        match self.state {
            ConnectionState::Reconnecting { .. } => {
                if now >= self.next_reconnect_at {
                    self.try_reconnect(now);
                }
            }
            ConnectionState::Authenticated => self.tick_heartbeat(now),
            ConnectionState::Handshaking => self.tick_handshake(now),
            ConnectionState::Disconnected => {}
        }
    }

    /// Checks if there are pending inbound frames.
    pub fn has_pending(&self) -> bool {
        self.transport.has_pending()
    }

    /// Returns the current reconnect attempt count.
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    /// Returns a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Seconds until the next scheduled reconnect attempt, if any.
    pub fn reconnect_delay_remaining(&self, now: u64) -> Option<u64> {
        match self.state {
            ConnectionState::Reconnecting { .. } => {
                Some(self.next_reconnect_at.saturating_sub(now))
            }
            _ => None,
        }
    }

    fn begin_handshake(&mut self, now: u64) -> TransportResult<()> {
        let rng = SystemRandom::new();
        let mut nonce = [0u8; 32];
        rng.fill(&mut nonce)
            .map_err(|_| NetworkError::HandshakeFailed("RNG failure".into()))?;

        let hello = ClientHello {
            identity_public_key: *self.identity.signing_public_key(),
            client_nonce: nonce,
        };
        self.transport
            .send(&Frame {
                frame_type: FrameType::ClientHello,
                payload: hello.encode(),
            })
            .map_err(|e| NetworkError::HandshakeFailed(e.to_string()))?;

        self.client_nonce = Some(nonce);
        self.state = ConnectionState::Handshaking;
        self.last_activity = now;
        self.handshake_started_at = Some(now);
        debug!("sent client hello");
        Ok(())
    }

    /// A handshake the server never completes counts as a dead connection.
    fn tick_handshake(&mut self, now: u64) {
        if let Some(started_at) = self.handshake_started_at {
            if now >= started_at + self.config.handshake_timeout_secs {
                warn!("handshake timed out, declaring connection dead");
                self.on_connection_lost(now);
            }
        }
    }

    fn answer_challenge(&mut self, frame: &Frame) -> TransportResult<()> {
        if self.state != ConnectionState::Handshaking {
            return Err(NetworkError::HandshakeFailed(
                "challenge outside handshake".into(),
            ));
        }
        let challenge = ServerChallenge::decode(&frame.payload)?;
        let nonce = self
            .client_nonce
            .ok_or_else(|| NetworkError::HandshakeFailed("no hello sent".into()))?;

        // Sign challenge || client_nonce so the response binds both sides'
        // freshness into one signature.
        let mut sign_data = Vec::with_capacity(64);
        sign_data.extend_from_slice(&challenge.challenge);
        sign_data.extend_from_slice(&nonce);
        let signature = self.identity.sign(&sign_data);

        let auth = ClientAuth {
            signature: *signature.as_bytes(),
        };
        self.transport
            .send(&Frame {
                frame_type: FrameType::ClientAuth,
                payload: auth.encode(),
            })
            .map_err(|e| NetworkError::HandshakeFailed(e.to_string()))?;
        debug!("answered server challenge");
        Ok(())
    }

    fn tick_heartbeat(&mut self, now: u64) {
        if let Some(sent_at) = self.heartbeat_sent_at {
            if now >= sent_at + self.config.heartbeat_deadline_secs {
                warn!("heartbeat deadline missed, declaring connection dead");
                self.on_connection_lost(now);
            }
            return;
        }
        if now >= self.last_activity + self.config.heartbeat_idle_secs {
            match self.transport.send(&Frame::empty(FrameType::Heartbeat)) {
                Ok(()) => {
                    self.heartbeat_sent_at = Some(now);
                    debug!("sent heartbeat probe");
                }
                Err(e) => {
                    warn!(error = %e, "heartbeat send failed");
                    self.on_connection_lost(now);
                }
            }
        }
    }

    fn on_connection_lost(&mut self, now: u64) {
        let _ = self.transport.disconnect();
        self.client_nonce = None;
        self.heartbeat_sent_at = None;
        self.handshake_started_at = None;
        self.schedule_reconnect(now);
    }

    fn schedule_reconnect(&mut self, now: u64) {
        let delay = reconnect_delay(&self.config, self.reconnect_attempt);
        self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
        self.next_reconnect_at = now + delay;
        self.state = ConnectionState::Reconnecting {
            attempt: self.reconnect_attempt,
        };
        info!(
            attempt = self.reconnect_attempt,
            delay_secs = delay,
            "reconnect scheduled"
        );
    }

    fn try_reconnect(&mut self, now: u64) {
        let _ = self.transport.disconnect();
        if let Err(e) = self.transport.connect(&self.config) {
            debug!(error = %e, "reconnect attempt failed");
            self.schedule_reconnect(now);
            return;
        }
        if let Err(e) = self.begin_handshake(now) {
            debug!(error = %e, "handshake start failed after reconnect");
            self.on_connection_lost(now);
        }
    }
}

/// Reconnect delay for a given attempt: exponential from the base, capped
/// at the configured maximum.
pub fn reconnect_delay(config: &TransportConfig, attempt: u32) -> u64 {
    let shift = attempt.min(32);
    let delay = config
        .reconnect_base_delay_secs
        .saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX));
    delay.min(config.reconnect_max_delay_secs)
}
