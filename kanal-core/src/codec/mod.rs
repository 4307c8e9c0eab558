// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Message Codec
//!
//! Serializes typed messages to the versioned binary wire format and back.
//!
//! Layout (format version `0x01`):
//!
//! ```text
//! version (1) || id str || sender str || recipient str ||
//! created_at u64 LE || delivery u8 || type_tag u8 || body ||
//! optional fields: { field_id u8 || length u32 LE || data }*
//! ```
//!
//! Strings and byte blobs are `u32 LE` length-prefixed. Unknown optional
//! fields within a known version are preserved opaquely on the decoded
//! message and re-emitted unchanged, in order, on re-encode; decoding an
//! unknown version tag fails with `UnsupportedVersion` instead of guessing.

pub mod message;

pub use message::{
    new_message_id, BlobRef, CallSignal, CallSignalKind, DeliveryState, Message, MessageBody,
    MessageId, OptionalField, StatusKind, StatusUpdate, UnknownField,
};

use thiserror::Error;

/// Current wire format version (first byte of every encoded message).
pub const FORMAT_VERSION: u8 = 0x01;

/// Body type tags.
pub(crate) const TYPE_TEXT: u8 = 0x01;
pub(crate) const TYPE_MEDIA: u8 = 0x02;
pub(crate) const TYPE_STATUS: u8 = 0x03;
pub(crate) const TYPE_CALL: u8 = 0x04;

/// Call signal kind tags.
const CALL_OFFER: u8 = 0x01;
const CALL_ANSWER: u8 = 0x02;
const CALL_ICE: u8 = 0x03;
const CALL_RINGING: u8 = 0x04;
const CALL_HANGUP: u8 = 0x05;

/// Optional field id: sender nickname.
const FIELD_SENDER_NICKNAME: u8 = 0x01;

/// Delivery state tags.
const DELIVERY_PENDING: u8 = 0x00;
const DELIVERY_SENT: u8 = 0x01;
const DELIVERY_DELIVERED: u8 = 0x02;
const DELIVERY_ACKED: u8 = 0x03;
const DELIVERY_FAILED: u8 = 0x04;

/// Codec error types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Unknown wire format version tag.
    #[error("Unsupported wire format version: {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("Message truncated")]
    Truncated,
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,
    #[error("Unknown message type tag: {0:#04x}")]
    UnknownType(u8),
    #[error("Unknown delivery state tag: {0:#04x}")]
    UnknownDeliveryState(u8),
    #[error("Unknown call signal kind: {0:#04x}")]
    UnknownCallKind(u8),
    #[error("Unknown status kind: {0:#04x}")]
    UnknownStatusKind(u8),
}

/// Encodes a message to wire bytes.
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(FORMAT_VERSION);
    w.string(&msg.id);
    w.string(&msg.sender);
    w.string(&msg.recipient);
    w.u64(msg.created_at);
    w.u8(delivery_tag(&msg.delivery));
    w.u8(msg.body.type_tag());
    encode_body(&mut w, &msg.body);

    for field in &msg.optional_fields {
        match field {
            OptionalField::SenderNickname(nickname) => {
                w.u8(FIELD_SENDER_NICKNAME);
                w.bytes(nickname.as_bytes());
            }
            OptionalField::Unknown(unknown) => {
                w.u8(unknown.field_id);
                w.bytes(&unknown.data);
            }
        }
    }

    w.into_inner()
}

/// Decodes a message from wire bytes.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let mut r = Reader::new(bytes);

    let version = r.u8()?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let id = r.string()?;
    let sender = r.string()?;
    let recipient = r.string()?;
    let created_at = r.u64()?;
    let delivery = delivery_from_tag(r.u8()?)?;
    let type_tag = r.u8()?;
    let body = decode_body(&mut r, type_tag)?;

    // Optional fields stay in received order; known ones are parsed in
    // place so a re-encode reproduces the original byte sequence.
    let mut optional_fields = Vec::new();
    while !r.is_empty() {
        let field_id = r.u8()?;
        let data = r.bytes()?;
        optional_fields.push(match field_id {
            FIELD_SENDER_NICKNAME => OptionalField::SenderNickname(
                String::from_utf8(data).map_err(|_| CodecError::InvalidUtf8)?,
            ),
            _ => OptionalField::Unknown(UnknownField { field_id, data }),
        });
    }

    Ok(Message {
        id,
        sender,
        recipient,
        body,
        created_at,
        delivery,
        optional_fields,
    })
}

fn encode_body(w: &mut Writer, body: &MessageBody) {
    match body {
        MessageBody::Text(text) => {
            w.string(text);
        }
        MessageBody::Media(blob) => {
            w.raw(&blob.id);
            w.u64(blob.size);
            w.string(&blob.mime);
        }
        MessageBody::Status(status) => {
            w.u8(match status.kind {
                StatusKind::Received => 0x01,
                StatusKind::Read => 0x02,
            });
            w.u32(status.message_ids.len() as u32);
            for id in &status.message_ids {
                w.string(id);
            }
        }
        MessageBody::Call(signal) => {
            w.u64(signal.call_id);
            match &signal.kind {
                CallSignalKind::Offer { sdp } => {
                    w.u8(CALL_OFFER);
                    w.string(sdp);
                }
                CallSignalKind::Answer { sdp } => {
                    w.u8(CALL_ANSWER);
                    w.string(sdp);
                }
                CallSignalKind::IceCandidates { candidates } => {
                    w.u8(CALL_ICE);
                    w.u32(candidates.len() as u32);
                    for candidate in candidates {
                        w.string(candidate);
                    }
                }
                CallSignalKind::Ringing => w.u8(CALL_RINGING),
                CallSignalKind::Hangup => w.u8(CALL_HANGUP),
            }
        }
    }
}

fn decode_body(r: &mut Reader<'_>, type_tag: u8) -> Result<MessageBody, CodecError> {
    match type_tag {
        TYPE_TEXT => Ok(MessageBody::Text(r.string()?)),
        TYPE_MEDIA => {
            let id: [u8; 16] = r.raw(16)?.try_into().expect("fixed-size read");
            let size = r.u64()?;
            let mime = r.string()?;
            Ok(MessageBody::Media(BlobRef { id, size, mime }))
        }
        TYPE_STATUS => {
            let kind = match r.u8()? {
                0x01 => StatusKind::Received,
                0x02 => StatusKind::Read,
                other => return Err(CodecError::UnknownStatusKind(other)),
            };
            let count = r.u32()? as usize;
            let mut message_ids = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                message_ids.push(r.string()?);
            }
            Ok(MessageBody::Status(StatusUpdate { kind, message_ids }))
        }
        TYPE_CALL => {
            let call_id = r.u64()?;
            let kind = match r.u8()? {
                CALL_OFFER => CallSignalKind::Offer { sdp: r.string()? },
                CALL_ANSWER => CallSignalKind::Answer { sdp: r.string()? },
                CALL_ICE => {
                    let count = r.u32()? as usize;
                    let mut candidates = Vec::with_capacity(count.min(64));
                    for _ in 0..count {
                        candidates.push(r.string()?);
                    }
                    CallSignalKind::IceCandidates { candidates }
                }
                CALL_RINGING => CallSignalKind::Ringing,
                CALL_HANGUP => CallSignalKind::Hangup,
                other => return Err(CodecError::UnknownCallKind(other)),
            };
            Ok(MessageBody::Call(CallSignal { call_id, kind }))
        }
        other => Err(CodecError::UnknownType(other)),
    }
}

fn delivery_tag(state: &DeliveryState) -> u8 {
    match state {
        DeliveryState::Pending => DELIVERY_PENDING,
        DeliveryState::Sent => DELIVERY_SENT,
        DeliveryState::Delivered => DELIVERY_DELIVERED,
        DeliveryState::Acked => DELIVERY_ACKED,
        DeliveryState::Failed => DELIVERY_FAILED,
    }
}

fn delivery_from_tag(tag: u8) -> Result<DeliveryState, CodecError> {
    match tag {
        DELIVERY_PENDING => Ok(DeliveryState::Pending),
        DELIVERY_SENT => Ok(DeliveryState::Sent),
        DELIVERY_DELIVERED => Ok(DeliveryState::Delivered),
        DELIVERY_ACKED => Ok(DeliveryState::Acked),
        DELIVERY_FAILED => Ok(DeliveryState::Failed),
        other => Err(CodecError::UnknownDeliveryState(other)),
    }
}

/// Little-endian wire writer.
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    fn string(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Little-endian wire reader over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn raw(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() - self.pos < len {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.raw(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(
            self.raw(4)?.try_into().expect("fixed-size read"),
        ))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(
            self.raw(8)?.try_into().expect("fixed-size read"),
        ))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.u32()? as usize;
        Ok(self.raw(len)?.to_vec())
    }

    fn string(&mut self) -> Result<String, CodecError> {
        String::from_utf8(self.bytes()?).map_err(|_| CodecError::InvalidUtf8)
    }
}
