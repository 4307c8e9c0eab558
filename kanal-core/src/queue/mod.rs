// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Retry Queue
//!
//! Ordered queue of outbound envelopes awaiting server acknowledgment.
//! Guarantees FIFO delivery per recipient: only the head of each
//! recipient's line is ever eligible for transmission, so a slow message
//! cannot be overtaken by a later one to the same peer. Cross-recipient
//! order is unspecified.
//!
//! Retries use exponential backoff with jitter, capped, and bounded by a
//! maximum attempt count; exhaustion is terminal and surfaced once, never
//! retried. The queue itself is in-memory; the protocol engine mirrors
//! every mutation into storage so entries survive restarts.

use std::collections::HashMap;

use rand::Rng;
use tracing::debug;

use crate::codec::MessageId;

/// Retry scheduling configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// First-retry delay in seconds.
    pub base_delay_secs: u64,
    /// Backoff cap in seconds.
    pub max_delay_secs: u64,
    /// Attempts before an entry is classified as permanently failed.
    pub max_attempts: u32,
    /// Apply ±50% jitter to computed delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            base_delay_secs: 2,
            max_delay_secs: 3_600,
            max_attempts: 10,
            jitter: true,
        }
    }
}

/// A queued outbound envelope awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct RetryEntry {
    /// Id of the message this envelope wraps.
    pub message_id: MessageId,
    /// Recipient's public identifier (FIFO line key).
    pub recipient_id: String,
    /// Serialized wire envelope, ready to transmit.
    pub envelope: Vec<u8>,
    /// Transmission attempts so far.
    pub attempt: u32,
    /// Unix timestamp before which this entry is not due.
    pub next_retry: u64,
    /// Unix timestamp of enqueue.
    pub created_at: u64,
    /// Global enqueue sequence; breaks created_at ties within a line.
    pub seq: u64,
}

/// Outcome of recording a transmission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Entry rescheduled for a later retry.
    Rescheduled { next_retry: u64 },
    /// Attempt limit reached; the entry has been removed.
    Exhausted,
}

/// Durable, ordered queue of outbound envelopes.
#[derive(Debug, Default)]
pub struct RetryQueue {
    config: RetryConfig,
    entries: Vec<RetryEntry>,
    next_seq: u64,
}

impl RetryQueue {
    /// Creates an empty queue with default scheduling.
    pub fn new() -> Self {
        Self::with_config(RetryConfig::default())
    }

    /// Creates an empty queue with explicit scheduling parameters.
    pub fn with_config(config: RetryConfig) -> Self {
        RetryQueue {
            config,
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    /// Rebuilds a queue from persisted entries (process restart).
    pub fn rehydrate(config: RetryConfig, mut entries: Vec<RetryEntry>) -> Self {
        entries.sort_by_key(|e| e.seq);
        let next_seq = entries.last().map(|e| e.seq + 1).unwrap_or(0);
        RetryQueue {
            config,
            entries,
            next_seq,
        }
    }

    /// Enqueues a sealed envelope. The entry is immediately due.
    pub fn enqueue(
        &mut self,
        message_id: MessageId,
        recipient_id: &str,
        envelope: Vec<u8>,
        now: u64,
    ) -> &RetryEntry {
        let entry = RetryEntry {
            message_id,
            recipient_id: recipient_id.to_string(),
            envelope,
            attempt: 0,
            next_retry: now,
            created_at: now,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let idx = self.entries.len();
        self.entries.push(entry);
        &self.entries[idx]
    }

    /// Removes an acknowledged entry.
    ///
    /// Idempotent: acks for unknown or already-acknowledged ids are a
    /// no-op, since network acks arrive duplicated or late.
    pub fn ack(&mut self, message_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.message_id != message_id);
        before != self.entries.len()
    }

    /// Returns the next entry due for transmission, if any.
    ///
    /// Per-recipient FIFO: an entry is eligible only if it is the oldest
    /// queued entry for its recipient. Among eligible due entries the one
    /// with the earliest deadline wins.
    pub fn next_due(&self, now: u64) -> Option<RetryEntry> {
        let mut heads: HashMap<&str, &RetryEntry> = HashMap::new();
        for entry in &self.entries {
            heads
                .entry(entry.recipient_id.as_str())
                .and_modify(|head| {
                    if entry.seq < head.seq {
                        *head = entry;
                    }
                })
                .or_insert(entry);
        }

        heads
            .into_values()
            .filter(|e| e.next_retry <= now)
            .min_by_key(|e| (e.next_retry, e.seq))
            .cloned()
    }

    /// Records a transmission attempt for an entry.
    ///
    /// Reschedules with backoff, or removes the entry when the attempt
    /// limit is reached.
    pub fn record_attempt(&mut self, message_id: &str, now: u64) -> Option<AttemptOutcome> {
        let config = self.config.clone();
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.message_id == message_id)?;

        entry.attempt += 1;
        if entry.attempt >= config.max_attempts {
            debug!(message_id, attempts = entry.attempt, "retry attempts exhausted");
            self.entries.retain(|e| e.message_id != message_id);
            return Some(AttemptOutcome::Exhausted);
        }

        let mut delay = backoff_seconds(&config, entry.attempt);
        if config.jitter {
            // Full jitter: 50%..150% of the computed delay, still capped
            let factor = rand::thread_rng().gen_range(0.5..1.5);
            delay = ((delay as f64 * factor) as u64).min(config.max_delay_secs);
        }
        entry.next_retry = now + delay.max(1);
        Some(AttemptOutcome::Rescheduled {
            next_retry: entry.next_retry,
        })
    }

    /// Removes an entry after a permanent-failure classification
    /// (revoked peer, encode contract violation). No-op for unknown ids.
    pub fn mark_failed(&mut self, message_id: &str, reason: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.message_id != message_id);
        let removed = before != self.entries.len();
        if removed {
            debug!(message_id, reason, "entry removed as permanently failed");
        }
        removed
    }

    /// Returns an entry by message id.
    pub fn get(&self, message_id: &str) -> Option<&RetryEntry> {
        self.entries.iter().find(|e| e.message_id == message_id)
    }

    /// Returns all queued entries for a recipient, in enqueue order.
    pub fn entries_for(&self, recipient_id: &str) -> Vec<&RetryEntry> {
        let mut entries: Vec<&RetryEntry> = self
            .entries
            .iter()
            .filter(|e| e.recipient_id == recipient_id)
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scheduling configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Exponential backoff delay for an attempt count, capped.
pub fn backoff_seconds(config: &RetryConfig, attempt: u32) -> u64 {
    let shift = attempt.min(63);
    config
        .base_delay_secs
        .saturating_mul(1u64 << shift)
        .min(config.max_delay_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_config() -> RetryConfig {
        RetryConfig {
            base_delay_secs: 2,
            max_delay_secs: 3_600,
            max_attempts: 5,
            jitter: false,
        }
    }

    fn enqueue_n(queue: &mut RetryQueue, recipient: &str, n: usize, now: u64) -> Vec<MessageId> {
        (0..n)
            .map(|i| {
                let id = format!("msg-{recipient}-{i}");
                queue.enqueue(id.clone(), recipient, vec![i as u8], now);
                id
            })
            .collect()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = no_jitter_config();
        assert_eq!(backoff_seconds(&config, 1), 4);
        assert_eq!(backoff_seconds(&config, 2), 8);
        assert_eq!(backoff_seconds(&config, 3), 16);
        assert_eq!(backoff_seconds(&config, 10), 2_048);
        assert_eq!(backoff_seconds(&config, 11), 3_600);
        assert_eq!(backoff_seconds(&config, 40), 3_600);
    }

    #[test]
    fn test_fifo_per_recipient() {
        let mut queue = RetryQueue::with_config(no_jitter_config());
        let ids = enqueue_n(&mut queue, "bob", 3, 100);

        // Head of line first, regardless of how often we ask
        assert_eq!(queue.next_due(100).unwrap().message_id, ids[0]);
        assert_eq!(queue.next_due(100).unwrap().message_id, ids[0]);

        queue.ack(&ids[0]);
        assert_eq!(queue.next_due(100).unwrap().message_id, ids[1]);
    }

    #[test]
    fn test_head_of_line_blocks_successors() {
        let mut queue = RetryQueue::with_config(no_jitter_config());
        let ids = enqueue_n(&mut queue, "bob", 2, 100);

        // Head rescheduled into the future; successor must NOT become due
        queue.record_attempt(&ids[0], 100);
        assert!(queue.next_due(101).is_none());

        // Once the head is due again, it is still the head
        assert_eq!(queue.next_due(1_000).unwrap().message_id, ids[0]);
    }

    #[test]
    fn test_cross_recipient_independence() {
        let mut queue = RetryQueue::with_config(no_jitter_config());
        let bob = enqueue_n(&mut queue, "bob", 1, 100);
        let carol = enqueue_n(&mut queue, "carol", 1, 100);

        queue.record_attempt(&bob[0], 100);
        // Bob's line is backed off, carol's is not
        assert_eq!(queue.next_due(101).unwrap().message_id, carol[0]);
    }

    #[test]
    fn test_ack_is_idempotent() {
        let mut queue = RetryQueue::with_config(no_jitter_config());
        let ids = enqueue_n(&mut queue, "bob", 1, 100);

        assert!(queue.ack(&ids[0]));
        assert!(!queue.ack(&ids[0]));
        assert!(!queue.ack("never-seen"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_attempts_exhaust() {
        let mut queue = RetryQueue::with_config(no_jitter_config());
        let ids = enqueue_n(&mut queue, "bob", 1, 100);

        for _ in 0..3 {
            assert!(matches!(
                queue.record_attempt(&ids[0], 100),
                Some(AttemptOutcome::Rescheduled { .. })
            ));
        }
        // max_attempts = 5: the 4th recorded attempt brings the count to
        // 4, the 5th hits the limit
        assert!(matches!(
            queue.record_attempt(&ids[0], 100),
            Some(AttemptOutcome::Rescheduled { .. })
        ));
        assert_eq!(
            queue.record_attempt(&ids[0], 100),
            Some(AttemptOutcome::Exhausted)
        );
        assert!(queue.get(&ids[0]).is_none());
    }

    #[test]
    fn test_backoff_nondecreasing_without_jitter() {
        let mut queue = RetryQueue::with_config(no_jitter_config());
        let ids = enqueue_n(&mut queue, "bob", 1, 0);

        let mut last = 0;
        for _ in 0..3 {
            match queue.record_attempt(&ids[0], 0) {
                Some(AttemptOutcome::Rescheduled { next_retry }) => {
                    assert!(next_retry >= last);
                    assert!(next_retry <= 3_600);
                    last = next_retry;
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn test_jittered_delay_stays_capped() {
        let config = RetryConfig {
            base_delay_secs: 2_000,
            max_delay_secs: 3_600,
            max_attempts: 50,
            jitter: true,
        };
        let mut queue = RetryQueue::with_config(config);
        let ids = enqueue_n(&mut queue, "bob", 1, 0);

        for _ in 0..20 {
            if let Some(AttemptOutcome::Rescheduled { next_retry }) =
                queue.record_attempt(&ids[0], 0)
            {
                assert!(next_retry <= 3_600);
            }
        }
    }

    #[test]
    fn test_rehydrate_preserves_order() {
        let mut queue = RetryQueue::with_config(no_jitter_config());
        let ids = enqueue_n(&mut queue, "bob", 3, 100);

        let mut persisted: Vec<RetryEntry> =
            ids.iter().map(|id| queue.get(id).unwrap().clone()).collect();
        persisted.reverse(); // storage may return any order

        let restored = RetryQueue::rehydrate(no_jitter_config(), persisted);
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.next_due(100).unwrap().message_id, ids[0]);
    }
}
