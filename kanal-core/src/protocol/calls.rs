// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Call Signaling State
//!
//! Tracks the lifecycle of each call id so signaling messages are only
//! accepted in states where they make sense: an answer needs a live
//! offer, ICE candidates need an offered or answered call, and an offer
//! that is neither answered nor rejected times out.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

/// Call signaling errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CallError {
    #[error("Unknown call id: {0}")]
    UnknownCall(u64),

    #[error("Call {call_id} cannot {action} in state {state:?}")]
    InvalidTransition {
        call_id: u64,
        action: &'static str,
        state: CallState,
    },

    #[error("Call id {0} already active")]
    DuplicateCall(u64),

    #[error("Answer for call {0} came from the wrong side")]
    WrongSide(u64),
}

/// Which side initiated the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outbound,
    Inbound,
}

/// Lifecycle state of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Offer sent or received, waiting for an answer.
    Offered,
    /// Answered; media negotiation may proceed.
    Answered,
}

/// Configuration for call signaling.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Seconds an unanswered offer stays valid.
    pub offer_expiry_secs: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        CallConfig {
            offer_expiry_secs: 60,
        }
    }
}

#[derive(Debug)]
struct CallEntry {
    peer: String,
    direction: CallDirection,
    state: CallState,
    offered_at: u64,
}

/// Tracks active calls by call id.
///
/// Terminal transitions (hangup, reject, expiry) remove the entry; a call
/// id that is absent is either unknown or already ended, and signaling
/// for it is dropped.
#[derive(Debug, Default)]
pub struct CallTracker {
    config: CallConfig,
    calls: HashMap<u64, CallEntry>,
}

impl CallTracker {
    /// Creates a tracker with default configuration.
    pub fn new() -> Self {
        CallTracker::default()
    }

    /// Creates a tracker with custom configuration.
    pub fn with_config(config: CallConfig) -> Self {
        CallTracker {
            config,
            calls: HashMap::new(),
        }
    }

    /// Registers a new offer. Fails if the call id is already in use.
    pub fn offer(
        &mut self,
        call_id: u64,
        peer: &str,
        direction: CallDirection,
        now: u64,
    ) -> Result<(), CallError> {
        if self.calls.contains_key(&call_id) {
            return Err(CallError::DuplicateCall(call_id));
        }
        self.calls.insert(
            call_id,
            CallEntry {
                peer: peer.to_string(),
                direction,
                state: CallState::Offered,
                offered_at: now,
            },
        );
        debug!(call_id, peer, ?direction, "call offered");
        Ok(())
    }

    /// Records the local user answering an inbound call.
    pub fn answer_local(&mut self, call_id: u64) -> Result<(), CallError> {
        self.answer(call_id, CallDirection::Inbound)
    }

    /// Records the peer answering an outbound call.
    pub fn answer_remote(&mut self, call_id: u64) -> Result<(), CallError> {
        self.answer(call_id, CallDirection::Outbound)
    }

    /// Moves an offered call to answered. Only the callee side answers:
    /// inbound calls are answered locally, outbound ones by the peer.
    fn answer(&mut self, call_id: u64, expected: CallDirection) -> Result<(), CallError> {
        let entry = self
            .calls
            .get_mut(&call_id)
            .ok_or(CallError::UnknownCall(call_id))?;
        if entry.direction != expected {
            return Err(CallError::WrongSide(call_id));
        }
        match entry.state {
            CallState::Offered => {
                entry.state = CallState::Answered;
                debug!(call_id, "call answered");
                Ok(())
            }
            state => Err(CallError::InvalidTransition {
                call_id,
                action: "answer",
                state,
            }),
        }
    }

    /// Ends a call (hangup or reject). Idempotent: ending an unknown or
    /// already-ended call reports `UnknownCall` and the caller drops the
    /// signal.
    pub fn end(&mut self, call_id: u64) -> Result<(), CallError> {
        self.calls
            .remove(&call_id)
            .map(|_| debug!(call_id, "call ended"))
            .ok_or(CallError::UnknownCall(call_id))
    }

    /// True if ICE candidates are acceptable for this call right now.
    pub fn ice_allowed(&self, call_id: u64) -> bool {
        matches!(
            self.calls.get(&call_id).map(|e| e.state),
            Some(CallState::Offered) | Some(CallState::Answered)
        )
    }

    /// Current state of a call, if active.
    pub fn state(&self, call_id: u64) -> Option<CallState> {
        self.calls.get(&call_id).map(|e| e.state)
    }

    /// Peer of an active call.
    pub fn peer(&self, call_id: u64) -> Option<&str> {
        self.calls.get(&call_id).map(|e| e.peer.as_str())
    }

    /// Number of active calls.
    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    /// Expires unanswered offers past their deadline.
    ///
    /// Returns the ids of calls that timed out; the engine emits an
    /// `Ended` event and, for inbound offers, stops ringing.
    pub fn tick(&mut self, now: u64) -> Vec<u64> {
        let expiry = self.config.offer_expiry_secs;
        let expired: Vec<u64> = self
            .calls
            .iter()
            .filter(|(_, e)| e.state == CallState::Offered && now >= e.offered_at + expiry)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            debug!(call_id = id, "call offer expired");
            self.calls.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_answer_end() {
        let mut tracker = CallTracker::new();
        tracker.offer(7, "alice", CallDirection::Inbound, 100).unwrap();
        assert_eq!(tracker.state(7), Some(CallState::Offered));

        tracker.answer_local(7).unwrap();
        assert_eq!(tracker.state(7), Some(CallState::Answered));

        tracker.end(7).unwrap();
        assert_eq!(tracker.state(7), None);
    }

    #[test]
    fn test_duplicate_offer_rejected() {
        let mut tracker = CallTracker::new();
        tracker.offer(7, "alice", CallDirection::Outbound, 100).unwrap();
        assert_eq!(
            tracker.offer(7, "bob", CallDirection::Inbound, 101),
            Err(CallError::DuplicateCall(7))
        );
    }

    #[test]
    fn test_answer_requires_offer() {
        let mut tracker = CallTracker::new();
        assert_eq!(tracker.answer_remote(9), Err(CallError::UnknownCall(9)));

        tracker.offer(9, "alice", CallDirection::Outbound, 100).unwrap();
        tracker.answer_remote(9).unwrap();
        // A second answer is no longer valid.
        assert!(matches!(
            tracker.answer_remote(9),
            Err(CallError::InvalidTransition { call_id: 9, .. })
        ));
    }

    #[test]
    fn test_answer_from_wrong_side_rejected() {
        let mut tracker = CallTracker::new();
        tracker.offer(1, "alice", CallDirection::Outbound, 100).unwrap();
        tracker.offer(2, "bob", CallDirection::Inbound, 100).unwrap();

        // The caller cannot answer its own offer, and a peer cannot
        // answer a call it initiated.
        assert_eq!(tracker.answer_local(1), Err(CallError::WrongSide(1)));
        assert_eq!(tracker.answer_remote(2), Err(CallError::WrongSide(2)));

        // The right side still can.
        tracker.answer_remote(1).unwrap();
        tracker.answer_local(2).unwrap();
    }

    #[test]
    fn test_ice_window() {
        let mut tracker = CallTracker::new();
        assert!(!tracker.ice_allowed(3));

        tracker.offer(3, "alice", CallDirection::Inbound, 100).unwrap();
        assert!(tracker.ice_allowed(3));

        tracker.answer_local(3).unwrap();
        assert!(tracker.ice_allowed(3));

        tracker.end(3).unwrap();
        assert!(!tracker.ice_allowed(3));
    }

    #[test]
    fn test_offer_expiry() {
        let mut tracker = CallTracker::new();
        tracker.offer(1, "alice", CallDirection::Inbound, 100).unwrap();
        tracker.offer(2, "bob", CallDirection::Inbound, 130).unwrap();

        assert!(tracker.tick(159).is_empty());

        let expired = tracker.tick(160);
        assert_eq!(expired, vec![1]);
        assert_eq!(tracker.state(1), None);
        assert_eq!(tracker.state(2), Some(CallState::Offered));
    }

    #[test]
    fn test_answered_call_does_not_expire() {
        let mut tracker = CallTracker::new();
        tracker.offer(1, "alice", CallDirection::Inbound, 100).unwrap();
        tracker.answer_local(1).unwrap();

        assert!(tracker.tick(10_000).is_empty());
        assert_eq!(tracker.state(1), Some(CallState::Answered));
    }

    #[test]
    fn test_custom_expiry_config() {
        let mut tracker = CallTracker::with_config(CallConfig {
            offer_expiry_secs: 5,
        });
        tracker.offer(1, "alice", CallDirection::Outbound, 100).unwrap();
        assert_eq!(tracker.tick(105), vec![1]);
    }
}
