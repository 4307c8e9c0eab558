// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Mock Transport
//!
//! In-memory implementation of the Transport trait for testing. Scriptable
//! receive queue, sent-frame capture, and single-shot error injection.

use std::collections::VecDeque;

use super::error::NetworkError;
use super::frame::{Frame, FrameType, ServerChallenge};
use super::transport::{Transport, TransportConfig, TransportResult};

/// Mock transport for testing.
///
/// Allows injection of inbound frames and tracking of sent frames.
#[derive(Debug, Default)]
pub struct MockTransport {
    open: bool,
    /// Frames that have been sent.
    sent_frames: Vec<Frame>,
    /// Frames to return on receive().
    receive_queue: VecDeque<Frame>,
    /// Error to inject on the next operation.
    inject_error: Option<NetworkError>,
    /// Whether to script handshake responses automatically.
    auto_handshake: bool,
    /// Number of connect() calls observed.
    connect_count: u32,
    /// Remaining connect() calls that should fail.
    failing_connects: u32,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        MockTransport::default()
    }

    /// Creates a mock that answers the handshake by itself: a ClientHello
    /// gets a fixed challenge back, a ClientAuth gets AuthOk.
    pub fn with_auto_handshake() -> Self {
        MockTransport {
            auto_handshake: true,
            ..MockTransport::default()
        }
    }

    /// Queues a frame to be returned by a later receive() call.
    pub fn queue_receive(&mut self, frame: Frame) {
        self.receive_queue.push_back(frame);
    }

    /// Returns all frames that have been sent.
    pub fn sent_frames(&self) -> &[Frame] {
        &self.sent_frames
    }

    /// Clears the sent frame buffer.
    pub fn clear_sent(&mut self) {
        self.sent_frames.clear();
    }

    /// Injects an error to be returned on the next operation.
    pub fn inject_error(&mut self, error: NetworkError) {
        self.inject_error = Some(error);
    }

    /// Makes the next `count` connect() calls fail.
    pub fn fail_next_connects(&mut self, count: u32) {
        self.failing_connects = count;
    }

    /// Number of connect() calls seen so far.
    pub fn connect_count(&self) -> u32 {
        self.connect_count
    }

    /// Drops the link without a disconnect, as a network failure would.
    pub fn sever(&mut self) {
        self.open = false;
    }

    /// Returns the number of frames in the receive queue.
    pub fn receive_queue_len(&self) -> usize {
        self.receive_queue.len()
    }

    /// Fixed challenge bytes used by auto-handshake mode.
    pub fn scripted_challenge() -> [u8; 32] {
        [0x5c; 32]
    }

    fn check_error(&mut self) -> TransportResult<()> {
        if let Some(err) = self.inject_error.take() {
            return Err(err);
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, _config: &TransportConfig) -> TransportResult<()> {
        self.check_error()?;
        self.connect_count += 1;
        if self.failing_connects > 0 {
            self.failing_connects -= 1;
            return Err(NetworkError::ConnectionFailed("scripted failure".into()));
        }
        self.open = true;
        Ok(())
    }

    fn disconnect(&mut self) -> TransportResult<()> {
        self.check_error()?;
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, frame: &Frame) -> TransportResult<()> {
        self.check_error()?;

        if !self.open {
            return Err(NetworkError::NotConnected);
        }

        self.sent_frames.push(frame.clone());

        if self.auto_handshake {
            match frame.frame_type {
                FrameType::ClientHello => {
                    let challenge = ServerChallenge {
                        challenge: Self::scripted_challenge(),
                    };
                    self.receive_queue.push_front(Frame {
                        frame_type: FrameType::ServerChallenge,
                        payload: challenge.encode(),
                    });
                }
                FrameType::ClientAuth => {
                    self.receive_queue.push_front(Frame::empty(FrameType::AuthOk));
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn receive(&mut self) -> TransportResult<Option<Frame>> {
        self.check_error()?;

        if !self.open {
            return Err(NetworkError::NotConnected);
        }

        Ok(self.receive_queue.pop_front())
    }

    fn has_pending(&self) -> bool {
        !self.receive_queue.is_empty()
    }
}
