// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Inbound Deduplication
//!
//! The relay may redeliver a message after a reconnect before our ack
//! reached it. A bounded window of recently seen `(sender, message_id)`
//! pairs lets the engine re-ack duplicates without surfacing them twice.

use std::collections::{HashSet, VecDeque};

use crate::codec::MessageId;

/// Default number of remembered `(sender, message_id)` pairs.
pub const DEFAULT_DEDUP_WINDOW: usize = 1024;

/// Bounded window of recently seen inbound messages.
///
/// Oldest entries are evicted first once the window is full.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    seen: HashSet<(String, MessageId)>,
    order: VecDeque<(String, MessageId)>,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl DedupWindow {
    /// Creates a window holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        DedupWindow {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// True if the pair is in the window, without inserting.
    ///
    /// Used before decryption: the window only ever holds ids that passed
    /// authentication, so a forged envelope cannot poison it.
    pub fn contains(&self, sender: &str, message_id: &str) -> bool {
        self.seen
            .contains(&(sender.to_string(), message_id.to_string()))
    }

    /// Records a message and reports whether it was already seen.
    ///
    /// Returns `true` for duplicates. First occurrences are inserted,
    /// evicting the oldest entry when the window is full.
    pub fn check_and_insert(&mut self, sender: &str, message_id: &str) -> bool {
        let key = (sender.to_string(), message_id.to_string());
        if self.seen.contains(&key) {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        false
    }

    /// Number of entries currently remembered.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if no entries are remembered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
