// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Event System
//!
//! Callbacks for transport events. The UI layer registers handlers and the
//! protocol engine dispatches to them as messages arrive, deliveries
//! confirm, and the connection changes state.

use std::sync::Arc;

use crate::codec::{Message, MessageId};
use crate::network::ConnectionState;

/// Call lifecycle events surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// A peer offered a call.
    Incoming { call_id: u64, peer: String, sdp: String },
    /// The remote side answered our offer.
    Answered { call_id: u64, sdp: String },
    /// The callee device is ringing.
    Ringing { call_id: u64 },
    /// ICE candidates arrived for an active call.
    IceCandidates { call_id: u64, candidates: Vec<String> },
    /// The call ended (hangup, reject, or offer expiry).
    Ended { call_id: u64 },
}

/// Events emitted by the protocol engine.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new inbound message was accepted.
    Received {
        /// The decoded message.
        message: Box<Message>,
    },

    /// An outbound message was confirmed by the relay.
    Delivered {
        /// The message ID.
        message_id: MessageId,
    },

    /// An outbound message exhausted its retries.
    DeliveryFailed {
        /// The message ID.
        message_id: MessageId,
        /// Error description.
        reason: String,
    },

    /// Call signaling progressed.
    Call(CallEvent),

    /// Network connection state changed.
    ConnectionStateChanged {
        /// The new connection state.
        state: ConnectionState,
    },
}

/// Event handler trait.
///
/// Implement this trait to receive transport events.
pub trait EventHandler: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: TransportEvent);
}

/// Simple callback-based event handler.
///
/// Wraps a closure for easy event handling.
pub struct CallbackHandler<F>
where
    F: Fn(TransportEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(TransportEvent) + Send + Sync,
{
    /// Creates a new callback handler.
    pub fn new(callback: F) -> Self {
        CallbackHandler { callback }
    }
}

impl<F> EventHandler for CallbackHandler<F>
where
    F: Fn(TransportEvent) + Send + Sync,
{
    fn on_event(&self, event: TransportEvent) {
        (self.callback)(event);
    }
}

/// Event dispatcher for managing multiple handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    pub fn new() -> Self {
        EventDispatcher {
            handlers: Vec::new(),
        }
    }

    /// Adds an event handler.
    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Removes all handlers.
    pub fn clear_handlers(&mut self) {
        self.handlers.clear();
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatches an event to all handlers.
    pub fn dispatch(&self, event: TransportEvent) {
        for handler in &self.handlers {
            handler.on_event(event.clone());
        }
    }
}
