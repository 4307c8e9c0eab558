// SPDX-FileCopyrightText: 2026 Kanal Contributors
//
// SPDX-License-Identifier: AGPL-3.0-only

//! Wire Framing
//!
//! Binary relay frames: `type (1 byte) || length (4 bytes BE) || payload`.
//! Payload encodings are hand-rolled and byte-stable; the envelope header
//! (ids, counter) stays in the clear so the relay can route and ack without
//! seeing plaintext, while the message itself is inside the sealed
//! ciphertext.

use super::error::NetworkError;
use crate::codec::MessageId;

/// Size of the frame header (type byte + length word).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Maximum accepted frame payload size (1 MiB).
///
/// Media travels as blob references, so frames stay small; anything larger
/// is a protocol violation, not a big message.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Sealed message envelope.
    Envelope = 0x01,
    /// Delivery acknowledgment for one message id.
    Ack = 0x02,
    /// Liveness probe (no payload).
    Heartbeat = 0x03,
    /// Liveness response (no payload).
    HeartbeatAck = 0x04,
    /// Handshake: client introduces its identity key and nonce.
    ClientHello = 0x10,
    /// Handshake: server challenge.
    ServerChallenge = 0x11,
    /// Handshake: signed challenge response.
    ClientAuth = 0x12,
    /// Handshake: server accepts, connection is authenticated.
    AuthOk = 0x13,
}

impl FrameType {
    fn from_tag(tag: u8) -> Result<Self, NetworkError> {
        match tag {
            0x01 => Ok(FrameType::Envelope),
            0x02 => Ok(FrameType::Ack),
            0x03 => Ok(FrameType::Heartbeat),
            0x04 => Ok(FrameType::HeartbeatAck),
            0x10 => Ok(FrameType::ClientHello),
            0x11 => Ok(FrameType::ServerChallenge),
            0x12 => Ok(FrameType::ClientAuth),
            0x13 => Ok(FrameType::AuthOk),
            other => Err(NetworkError::UnknownFrameType(other)),
        }
    }
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a payload-less frame (heartbeats).
    pub fn empty(frame_type: FrameType) -> Self {
        Frame {
            frame_type,
            payload: Vec::new(),
        }
    }
}

/// Encodes a frame for transmission.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, NetworkError> {
    if frame.payload.len() > MAX_FRAME_SIZE {
        return Err(NetworkError::FrameTooLarge(frame.payload.len()));
    }
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
    out.push(frame.frame_type as u8);
    out.extend_from_slice(&(frame.payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&frame.payload);
    Ok(out)
}

/// Decodes one frame from the front of a buffer.
///
/// Returns `Ok(None)` if the buffer does not yet hold a complete frame;
/// on success also returns the number of bytes consumed so the caller can
/// advance its read buffer.
pub fn try_decode_frame(bytes: &[u8]) -> Result<Option<(Frame, usize)>, NetworkError> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let frame_type = FrameType::from_tag(bytes[0])?;
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetworkError::FrameTooLarge(len));
    }
    if bytes.len() < FRAME_HEADER_SIZE + len {
        return Ok(None);
    }
    let payload = bytes[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len].to_vec();
    Ok(Some((Frame { frame_type, payload }, FRAME_HEADER_SIZE + len)))
}

/// The encrypted wire unit wrapping one message.
///
/// Header fields are cleartext for relay routing and acking; everything
/// application-level lives inside `ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEnvelope {
    /// Message id (cleartext so the relay can ack it).
    pub message_id: MessageId,
    /// Sender key reference (public id fingerprint).
    pub sender: String,
    /// Recipient key reference.
    pub recipient: String,
    /// Envelope counter; also the nonce prefix (see crypto::envelope).
    pub counter: u64,
    /// Sealed message bytes.
    pub ciphertext: Vec<u8>,
}

impl WireEnvelope {
    /// Encodes the envelope as a frame payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            4 + self.message_id.len()
                + 4
                + self.sender.len()
                + 4
                + self.recipient.len()
                + 8
                + 4
                + self.ciphertext.len(),
        );
        put_bytes(&mut out, self.message_id.as_bytes());
        put_bytes(&mut out, self.sender.as_bytes());
        put_bytes(&mut out, self.recipient.as_bytes());
        out.extend_from_slice(&self.counter.to_be_bytes());
        put_bytes(&mut out, &self.ciphertext);
        out
    }

    /// Decodes an envelope from a frame payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, NetworkError> {
        let mut pos = 0;
        let message_id = take_string(bytes, &mut pos)?;
        let sender = take_string(bytes, &mut pos)?;
        let recipient = take_string(bytes, &mut pos)?;
        let counter = u64::from_be_bytes(take_array::<8>(bytes, &mut pos)?);
        let ciphertext = take_bytes(bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(NetworkError::MalformedFrame("trailing envelope bytes".into()));
        }
        Ok(WireEnvelope {
            message_id,
            sender,
            recipient,
            counter,
            ciphertext,
        })
    }

    /// Wraps the encoded envelope in an `Envelope` frame.
    pub fn into_frame(&self) -> Frame {
        Frame {
            frame_type: FrameType::Envelope,
            payload: self.encode(),
        }
    }
}

/// Acknowledgment frame payload: the acknowledged message id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPayload {
    pub message_id: MessageId,
}

impl AckPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.message_id.len());
        put_bytes(&mut out, self.message_id.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NetworkError> {
        let mut pos = 0;
        let message_id = take_string(bytes, &mut pos)?;
        Ok(AckPayload { message_id })
    }

    pub fn into_frame(&self) -> Frame {
        Frame {
            frame_type: FrameType::Ack,
            payload: self.encode(),
        }
    }
}

/// ClientHello payload: identity public key and a fresh client nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub identity_public_key: [u8; 32],
    pub client_nonce: [u8; 32],
}

impl ClientHello {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.identity_public_key);
        out.extend_from_slice(&self.client_nonce);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NetworkError> {
        let mut pos = 0;
        let identity_public_key = take_array::<32>(bytes, &mut pos)?;
        let client_nonce = take_array::<32>(bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(NetworkError::MalformedFrame("client hello length".into()));
        }
        Ok(ClientHello {
            identity_public_key,
            client_nonce,
        })
    }
}

/// ServerChallenge payload: random bytes the client must sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChallenge {
    pub challenge: [u8; 32],
}

impl ServerChallenge {
    pub fn encode(&self) -> Vec<u8> {
        self.challenge.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NetworkError> {
        let mut pos = 0;
        let challenge = take_array::<32>(bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(NetworkError::MalformedFrame("challenge length".into()));
        }
        Ok(ServerChallenge { challenge })
    }
}

/// ClientAuth payload: signature over `challenge || client_nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuth {
    pub signature: [u8; 64],
}

impl ClientAuth {
    pub fn encode(&self) -> Vec<u8> {
        self.signature.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NetworkError> {
        let mut pos = 0;
        let signature = take_array::<64>(bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(NetworkError::MalformedFrame("auth signature length".into()));
        }
        Ok(ClientAuth { signature })
    }
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn take_raw<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], NetworkError> {
    if bytes.len() - *pos < len {
        return Err(NetworkError::MalformedFrame("truncated".into()));
    }
    let slice = &bytes[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

fn take_array<const N: usize>(bytes: &[u8], pos: &mut usize) -> Result<[u8; N], NetworkError> {
    let slice = take_raw(bytes, pos, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

fn take_bytes(bytes: &[u8], pos: &mut usize) -> Result<Vec<u8>, NetworkError> {
    let len = u32::from_be_bytes(take_array::<4>(bytes, pos)?) as usize;
    Ok(take_raw(bytes, pos, len)?.to_vec())
}

fn take_string(bytes: &[u8], pos: &mut usize) -> Result<String, NetworkError> {
    String::from_utf8(take_bytes(bytes, pos)?)
        .map_err(|_| NetworkError::MalformedFrame("invalid utf-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> WireEnvelope {
        WireEnvelope {
            message_id: "msg-1".into(),
            sender: "alice".into(),
            recipient: "bob".into(),
            counter: 42,
            ciphertext: vec![0xca, 0xfe, 0xba, 0xbe],
        }
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = sample_envelope().into_frame();
        let wire = encode_frame(&frame).unwrap();
        let (decoded, consumed) = try_decode_frame(&wire).unwrap().unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_partial_frame_needs_more() {
        let wire = encode_frame(&sample_envelope().into_frame()).unwrap();
        assert!(try_decode_frame(&wire[..3]).unwrap().is_none());
        assert!(try_decode_frame(&wire[..FRAME_HEADER_SIZE]).unwrap().is_none());
        assert!(try_decode_frame(&wire[..wire.len() - 1]).unwrap().is_none());
    }

    #[test]
    fn test_two_frames_in_buffer() {
        let f1 = encode_frame(&Frame::empty(FrameType::Heartbeat)).unwrap();
        let f2 = encode_frame(&sample_envelope().into_frame()).unwrap();
        let mut buf = f1.clone();
        buf.extend_from_slice(&f2);

        let (first, n1) = try_decode_frame(&buf).unwrap().unwrap();
        assert_eq!(first.frame_type, FrameType::Heartbeat);
        let (second, n2) = try_decode_frame(&buf[n1..]).unwrap().unwrap();
        assert_eq!(second.frame_type, FrameType::Envelope);
        assert_eq!(n1 + n2, buf.len());
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let mut wire = encode_frame(&Frame::empty(FrameType::Heartbeat)).unwrap();
        wire[0] = 0x77;
        assert!(matches!(
            try_decode_frame(&wire),
            Err(NetworkError::UnknownFrameType(0x77))
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut wire = vec![FrameType::Envelope as u8];
        wire.extend_from_slice(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
        assert!(matches!(
            try_decode_frame(&wire),
            Err(NetworkError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_envelope_roundtrip() {
        let env = sample_envelope();
        assert_eq!(WireEnvelope::decode(&env.encode()).unwrap(), env);
    }

    #[test]
    fn test_envelope_trailing_bytes_rejected() {
        let mut bytes = sample_envelope().encode();
        bytes.push(0);
        assert!(WireEnvelope::decode(&bytes).is_err());
    }

    #[test]
    fn test_handshake_payload_roundtrips() {
        let hello = ClientHello {
            identity_public_key: [1u8; 32],
            client_nonce: [2u8; 32],
        };
        assert_eq!(ClientHello::decode(&hello.encode()).unwrap(), hello);

        let challenge = ServerChallenge { challenge: [3u8; 32] };
        assert_eq!(
            ServerChallenge::decode(&challenge.encode()).unwrap(),
            challenge
        );

        let auth = ClientAuth { signature: [4u8; 64] };
        assert_eq!(ClientAuth::decode(&auth.encode()).unwrap(), auth);
    }

    #[test]
    fn test_ack_roundtrip() {
        let ack = AckPayload {
            message_id: "msg-9".into(),
        };
        assert_eq!(AckPayload::decode(&ack.encode()).unwrap(), ack);
    }
}
