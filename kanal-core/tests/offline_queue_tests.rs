// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Offline Queue Tests
//!
//! Sends must succeed while the connection is down, wait in the retry
//! queue, and flow out in order once the connection is authenticated.
//! Unacknowledged envelopes are retried with backoff until the attempt
//! limit classifies them as failed.

mod common;

use common::{connected_pair_with, offline_pair};

use kanal_core::codec::MessageBody;
use kanal_core::network::{AckPayload, FrameType, WireEnvelope};
use kanal_core::protocol::{EngineConfig, TransportEvent};
use kanal_core::queue::RetryConfig;

fn no_jitter_config(max_attempts: u32) -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            base_delay_secs: 2,
            max_delay_secs: 3_600,
            max_attempts,
            jitter: false,
        },
        ..Default::default()
    }
}

fn sent_envelope_ids(pair: &common::EnginePair) -> Vec<String> {
    pair.engine
        .connection()
        .transport()
        .sent_frames()
        .iter()
        .filter(|f| f.frame_type == FrameType::Envelope)
        .map(|f| WireEnvelope::decode(&f.payload).unwrap().message_id)
        .collect()
}

#[test]
fn test_offline_sends_queue_without_error() {
    let mut pair = offline_pair(EngineConfig::default());
    let peer_id = pair.peer_id.clone();

    for i in 0..3 {
        pair.engine
            .send_message(&peer_id, MessageBody::Text(format!("msg {i}")), 100 + i)
            .unwrap();
    }

    assert_eq!(pair.engine.queue().len(), 3);
    assert!(pair.engine.connection().transport().sent_frames().is_empty());
}

#[test]
fn test_queued_messages_flush_in_order_on_connect() {
    let mut pair = offline_pair(no_jitter_config(10));
    let peer_id = pair.peer_id.clone();

    let ids: Vec<String> = (0..3)
        .map(|i| {
            pair.engine
                .send_message(&peer_id, MessageBody::Text(format!("msg {i}")), 100)
                .unwrap()
        })
        .collect();

    pair.engine.connect(200).unwrap();
    pair.engine.poll(200).unwrap();

    // Only the head of the recipient's line goes out per flush; ack it and
    // the next one follows.
    assert_eq!(sent_envelope_ids(&pair), vec![ids[0].clone()]);

    pair.engine.connection_mut().transport_mut().queue_receive(
        AckPayload {
            message_id: ids[0].clone(),
        }
        .into_frame(),
    );
    pair.engine.poll(201).unwrap();
    assert_eq!(
        sent_envelope_ids(&pair),
        vec![ids[0].clone(), ids[1].clone()]
    );
}

#[test]
fn test_unacked_envelope_retries_with_backoff() {
    let mut pair = connected_pair_with(no_jitter_config(10));
    let peer_id = pair.peer_id.clone();
    pair.engine.connection_mut().transport_mut().clear_sent();

    let id = pair
        .engine
        .send_message(&peer_id, MessageBody::Text("retry me".into()), 1_000)
        .unwrap();
    assert_eq!(sent_envelope_ids(&pair), vec![id.clone()]);

    // Not due yet: first retry is scheduled at +4s (attempt 1).
    pair.engine.tick(1_002);
    assert_eq!(sent_envelope_ids(&pair).len(), 1);

    pair.engine.tick(1_004);
    assert_eq!(sent_envelope_ids(&pair), vec![id.clone(), id.clone()]);
}

#[test]
fn test_exhausted_delivery_surfaces_failure_event() {
    let mut pair = connected_pair_with(no_jitter_config(2));
    let peer_id = pair.peer_id.clone();

    let id = pair
        .engine
        .send_message(&peer_id, MessageBody::Text("doomed".into()), 1_000)
        .unwrap();

    // Second transmission hits the attempt limit.
    pair.engine.tick(2_000);

    assert!(pair.engine.queue().is_empty());
    assert!(pair.events.lock().unwrap().iter().any(|e| matches!(
        e,
        TransportEvent::DeliveryFailed { message_id, .. } if *message_id == id
    )));
}

#[test]
fn test_queue_survives_disconnect() {
    let mut pair = connected_pair_with(no_jitter_config(10));
    let peer_id = pair.peer_id.clone();

    pair.engine
        .send_message(&peer_id, MessageBody::Text("hold on".into()), 1_000)
        .unwrap();
    assert_eq!(pair.engine.queue().len(), 1);

    pair.engine.disconnect().unwrap();
    assert_eq!(pair.engine.queue().len(), 1);
}

#[test]
fn test_independent_recipients_do_not_block_each_other() {
    let mut pair = connected_pair_with(no_jitter_config(10));
    let first_peer = pair.peer_id.clone();

    // Second peer known only to the local keystore; we just need a line.
    let other = kanal_core::keystore::Identity::create("Other");
    let other_id = other.public_id();
    pair.engine
        .keystore_mut()
        .add_peer(&other_id, *other.exchange_public_key());

    pair.engine.connection_mut().transport_mut().clear_sent();
    let a = pair
        .engine
        .send_message(&first_peer, MessageBody::Text("to first".into()), 1_000)
        .unwrap();
    let b = pair
        .engine
        .send_message(&other_id, MessageBody::Text("to other".into()), 1_000)
        .unwrap();

    let sent = sent_envelope_ids(&pair);
    assert!(sent.contains(&a));
    assert!(sent.contains(&b));
}
