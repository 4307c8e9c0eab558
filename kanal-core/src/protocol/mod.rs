// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Protocol Engine
//!
//! Orchestrates the transport core: outbound messages are encoded, sealed,
//! queued, and transmitted; inbound envelopes are opened, deduplicated,
//! acknowledged, and surfaced as events. Call signaling runs through a
//! per-call state machine so out-of-order signals are dropped instead of
//! corrupting call state.

#[cfg(feature = "testing")]
pub mod calls;
#[cfg(not(feature = "testing"))]
mod calls;

#[cfg(feature = "testing")]
pub mod dedup;
#[cfg(not(feature = "testing"))]
mod dedup;

#[cfg(feature = "testing")]
pub mod engine;
#[cfg(not(feature = "testing"))]
mod engine;

pub mod events;

// Call signaling state
pub use calls::{CallConfig, CallDirection, CallError, CallState, CallTracker};

// Inbound deduplication
pub use dedup::{DedupWindow, DEFAULT_DEDUP_WINDOW};

// Engine
pub use engine::{EngineConfig, ProtocolEngine, ProtocolError};

// Events
pub use events::{CallEvent, CallbackHandler, EventDispatcher, EventHandler, TransportEvent};
