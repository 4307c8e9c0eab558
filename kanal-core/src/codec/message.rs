// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Typed Message Variants
//!
//! The application-level message model. One sum type covers every variant
//! the transport carries (text, media references, status receipts, call
//! signaling) so the codec and the protocol engine can match exhaustively.

use uuid::Uuid;

/// Unique message identifier, client-generated (UUID v4).
///
/// Immutable for the lifetime of a message; the receiving side deduplicates
/// on `(sender, id)`.
pub type MessageId = String;

/// Generates a fresh message id.
pub fn new_message_id() -> MessageId {
    Uuid::new_v4().to_string()
}

/// Delivery progression of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Queued locally, not yet handed to the connection.
    Pending,
    /// Written to the relay connection.
    Sent,
    /// Relay confirmed it holds the message.
    Delivered,
    /// End-to-end acknowledged.
    Acked,
    /// Terminal failure, never retried.
    Failed,
}

/// Reference to a blob held by the media subsystem.
///
/// The transport core never touches blob bytes; it carries the reference
/// and the media collaborator fetches/stores the content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    /// Opaque blob identifier.
    pub id: [u8; 16],
    /// Blob size in bytes.
    pub size: u64,
    /// MIME type of the content.
    pub mime: String,
}

/// Receipt kinds carried by status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Message arrived on the recipient device.
    Received,
    /// Message was displayed to the user.
    Read,
}

/// A status update acknowledging one or more earlier messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub kind: StatusKind,
    pub message_ids: Vec<MessageId>,
}

/// Call signaling payload kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallSignalKind {
    /// Call offer with session description.
    Offer { sdp: String },
    /// Answer to an offer.
    Answer { sdp: String },
    /// ICE candidates; only valid while the call is offered or answered.
    IceCandidates { candidates: Vec<String> },
    /// Callee device is ringing.
    Ringing,
    /// Either side hung up (also used for reject).
    Hangup,
}

/// A call signaling message, scoped to one call id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSignal {
    /// Random per-call identifier chosen by the caller.
    pub call_id: u64,
    pub kind: CallSignalKind,
}

/// Message body sum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Media(BlobRef),
    Status(StatusUpdate),
    Call(CallSignal),
}

impl MessageBody {
    /// Wire type tag for this body variant.
    pub fn type_tag(&self) -> u8 {
        match self {
            MessageBody::Text(_) => super::TYPE_TEXT,
            MessageBody::Media(_) => super::TYPE_MEDIA,
            MessageBody::Status(_) => super::TYPE_STATUS,
            MessageBody::Call(_) => super::TYPE_CALL,
        }
    }
}

/// An optional wire field this version does not understand.
///
/// Preserved opaquely and re-emitted unchanged on re-encode so newer peers
/// round-trip through older clients without loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    pub field_id: u8,
    pub data: Vec<u8>,
}

/// One entry in the trailing optional-field section.
///
/// Known fields are parsed in place rather than lifted out, so the list
/// keeps the wire order and a re-encode reproduces the received bytes
/// exactly, recognized fields and unrecognized ones interleaved alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionalField {
    /// Sender nickname pushed alongside the message.
    SenderNickname(String),
    /// A field this version does not understand.
    Unknown(UnknownField),
}

/// An application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Client-generated unique id; immutable, used for deduplication.
    pub id: MessageId,
    /// Sender's public identifier.
    pub sender: String,
    /// Recipient's public identifier.
    pub recipient: String,
    /// Typed payload.
    pub body: MessageBody,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Local delivery progression.
    pub delivery: DeliveryState,
    /// Trailing optional fields, in received (and re-emit) order.
    pub optional_fields: Vec<OptionalField>,
}

impl Message {
    /// Creates a new outbound message with a fresh id.
    pub fn new(sender: &str, recipient: &str, body: MessageBody, created_at: u64) -> Self {
        Message {
            id: new_message_id(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            body,
            created_at,
            delivery: DeliveryState::Pending,
            optional_fields: Vec::new(),
        }
    }

    /// Returns the sender nickname, if one was carried.
    pub fn sender_nickname(&self) -> Option<&str> {
        self.optional_fields.iter().find_map(|field| match field {
            OptionalField::SenderNickname(nickname) => Some(nickname.as_str()),
            _ => None,
        })
    }

    /// Sets or replaces the sender nickname, keeping its field position
    /// when one is already present.
    pub fn set_sender_nickname(&mut self, nickname: &str) {
        for field in &mut self.optional_fields {
            if let OptionalField::SenderNickname(existing) = field {
                *existing = nickname.to_string();
                return;
            }
        }
        self.optional_fields
            .push(OptionalField::SenderNickname(nickname.to_string()));
    }

    /// Returns the unrecognized optional fields, in wire order.
    pub fn unknown_fields(&self) -> Vec<&UnknownField> {
        self.optional_fields
            .iter()
            .filter_map(|field| match field {
                OptionalField::Unknown(unknown) => Some(unknown),
                _ => None,
            })
            .collect()
    }
}
