//! Peer wire protocol: typed envelopes over a framed TCP session.
//!
//! Frame layout, all integers little-endian:
//!
//! ```text
//! magic "LMN1" (4) | kind u32 (4) | checksum u32 (4) | payload len u32 (4) | payload
//! ```
//!
//! The checksum is the first four bytes of the blake3 hash of the payload.
//! A frame that parses but carries an unknown kind or a bad checksum is
//! consumed before the error is returned, so the session can log it, drop
//! it and keep reading. A bad magic means the stream lost framing and is
//! fatal.

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use crate::error::{LumenError, ProtocolError};
use crate::model::{MessageQueue, OscSettings};

/// Stream synchronization marker at the start of every frame.
pub const MAGIC: [u8; 4] = *b"LMN1";
/// Fixed frame header length in bytes.
pub const HEADER_LEN: usize = 16;
/// Upper bound on a single envelope payload.
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024;

// ── EnvelopeKind ─────────────────────────────────────────────────

/// Discriminant of an envelope payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EnvelopeKind {
    /// Full `OscSettings` replacement.
    SettingsSnapshot = 1,
    /// Full `MessageQueue` replacement.
    QueueSnapshot = 2,
    /// Incremental "message was dispatched" notice.
    MessageSent = 3,
    /// Client-to-host command string.
    Command = 4,
}

impl EnvelopeKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::SettingsSnapshot => "settings-snapshot",
            Self::QueueSnapshot => "queue-snapshot",
            Self::MessageSent => "message-sent",
            Self::Command => "command",
        }
    }
}

impl TryFrom<u32> for EnvelopeKind {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::SettingsSnapshot),
            2 => Ok(Self::QueueSnapshot),
            3 => Ok(Self::MessageSent),
            4 => Ok(Self::Command),
            other => Err(ProtocolError::UnknownEnvelopeKind { value: other }),
        }
    }
}

// ── Payload types ────────────────────────────────────────────────

/// Incremental notice that one message went out to the wall.
///
/// Application must be idempotent: the transport may redeliver across
/// reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentNotice {
    pub id: Uuid,
    pub sent_at: DateTime<Utc>,
}

/// Commands a client may submit upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerCommand {
    /// Ask the host to resend both snapshots.
    RequestRefresh,
    /// Clear the wall.
    ClearCurrent,
    /// Dispatch the identified queue message to the wall.
    SendMessage(Uuid),
}

impl std::fmt::Display for PeerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestRefresh => write!(f, "request-refresh"),
            Self::ClearCurrent => write!(f, "clear-current"),
            Self::SendMessage(id) => write!(f, "send-message:{id}"),
        }
    }
}

impl std::str::FromStr for PeerCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request-refresh" => Ok(Self::RequestRefresh),
            "clear-current" => Ok(Self::ClearCurrent),
            _ => {
                if let Some(id) = s.strip_prefix("send-message:") {
                    let id = id
                        .parse()
                        .map_err(|_| ProtocolError::UnknownCommand(s.to_string()))?;
                    Ok(Self::SendMessage(id))
                } else {
                    Err(ProtocolError::UnknownCommand(s.to_string()))
                }
            }
        }
    }
}

// ── Envelope ─────────────────────────────────────────────────────

/// One framed unit on the peer wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub payload: Vec<u8>,
}

impl Envelope {
    fn new(kind: EnvelopeKind, payload: Vec<u8>) -> Result<Self, LumenError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }
        Ok(Self { kind, payload })
    }

    pub fn settings_snapshot(settings: &OscSettings) -> Result<Self, LumenError> {
        Self::new(EnvelopeKind::SettingsSnapshot, bincode::serialize(settings)?)
    }

    pub fn queue_snapshot(queue: &MessageQueue) -> Result<Self, LumenError> {
        Self::new(EnvelopeKind::QueueSnapshot, bincode::serialize(queue)?)
    }

    pub fn message_sent(notice: &SentNotice) -> Result<Self, LumenError> {
        Self::new(EnvelopeKind::MessageSent, bincode::serialize(notice)?)
    }

    pub fn command(command: PeerCommand) -> Result<Self, LumenError> {
        Self::new(EnvelopeKind::Command, command.to_string().into_bytes())
    }

    fn expect_kind(&self, expected: EnvelopeKind) -> Result<(), ProtocolError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedKind {
                expected: expected.name(),
                actual: self.kind.name(),
            })
        }
    }

    pub fn decode_settings(&self) -> Result<OscSettings, ProtocolError> {
        self.expect_kind(EnvelopeKind::SettingsSnapshot)?;
        bincode::deserialize(&self.payload).map_err(|e| ProtocolError::Payload(e.to_string()))
    }

    pub fn decode_queue(&self) -> Result<MessageQueue, ProtocolError> {
        self.expect_kind(EnvelopeKind::QueueSnapshot)?;
        bincode::deserialize(&self.payload).map_err(|e| ProtocolError::Payload(e.to_string()))
    }

    pub fn decode_notice(&self) -> Result<SentNotice, ProtocolError> {
        self.expect_kind(EnvelopeKind::MessageSent)?;
        bincode::deserialize(&self.payload).map_err(|e| ProtocolError::Payload(e.to_string()))
    }

    pub fn decode_command(&self) -> Result<PeerCommand, ProtocolError> {
        self.expect_kind(EnvelopeKind::Command)?;
        let text = std::str::from_utf8(&self.payload)
            .map_err(|e| ProtocolError::Payload(e.to_string()))?;
        text.parse()
    }

    fn checksum(&self) -> u32 {
        payload_checksum(&self.payload)
    }
}

/// Checksum carried in the frame header: the first four bytes of the
/// blake3 hash of the payload, little-endian.
pub fn payload_checksum(payload: &[u8]) -> u32 {
    let hash = blake3::hash(payload);
    let mut word = [0u8; 4];
    word.copy_from_slice(&hash.as_bytes()[..4]);
    u32::from_le_bytes(word)
}

// ── Codec ────────────────────────────────────────────────────────

/// `tokio_util` codec for [`Envelope`] frames.
#[derive(Debug, Default)]
pub struct EnvelopeCodec;

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = LumenError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: item.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_slice(&MAGIC);
        dst.put_u32_le(item.kind as u32);
        dst.put_u32_le(item.checksum());
        dst.put_u32_le(item.payload.len() as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = LumenError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        if src[..4] != MAGIC {
            // Framing is lost; the session cannot recover.
            return Err(ProtocolError::InvalidMagic.into());
        }
        let kind_raw = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);
        let checksum = u32::from_le_bytes([src[8], src[9], src[10], src[11]]);
        let payload_len = u32::from_le_bytes([src[12], src[13], src[14], src[15]]) as usize;

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }
        if src.len() < HEADER_LEN + payload_len {
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }

        // The frame is consumed from here on, so kind and checksum errors
        // leave the stream positioned at the next frame.
        let mut frame = src.split_to(HEADER_LEN + payload_len);
        frame.advance(HEADER_LEN);
        let payload = frame.to_vec();

        let kind = EnvelopeKind::try_from(kind_raw)?;
        if payload_checksum(&payload) != checksum {
            return Err(ProtocolError::ChecksumMismatch.into());
        }
        Ok(Some(Envelope { kind, payload }))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;

    fn encode(envelope: Envelope) -> BytesMut {
        let mut buf = BytesMut::new();
        EnvelopeCodec.encode(envelope, &mut buf).unwrap();
        buf
    }

    #[test]
    fn settings_snapshot_round_trip() {
        let settings = OscSettings::default();
        let envelope = Envelope::settings_snapshot(&settings).unwrap();

        let mut buf = encode(envelope);
        let decoded = EnvelopeCodec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        assert_eq!(decoded.decode_settings().unwrap(), settings);
    }

    #[test]
    fn queue_snapshot_round_trip() {
        let mut queue = MessageQueue::new("main");
        queue.push(Message::new("hello"));
        queue.push(Message::new("world"));
        queue.set_current(Some(1));

        let envelope = Envelope::queue_snapshot(&queue).unwrap();
        let mut buf = encode(envelope);
        let decoded = EnvelopeCodec.decode(&mut buf).unwrap().unwrap();
        let restored = decoded.decode_queue().unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.current_index(), Some(1));
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let notice = SentNotice {
            id: Uuid::new_v4(),
            sent_at: Utc::now(),
        };
        let full = encode(Envelope::message_sent(&notice).unwrap());

        let mut partial = BytesMut::from(&full[..HEADER_LEN + 3]);
        assert!(EnvelopeCodec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[HEADER_LEN + 3..]);
        let decoded = EnvelopeCodec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded.decode_notice().unwrap(), notice);
    }

    #[test]
    fn unknown_kind_consumes_its_frame() {
        let mut buf = encode(Envelope::command(PeerCommand::ClearCurrent).unwrap());
        // Corrupt the kind field.
        buf[4..8].copy_from_slice(&99u32.to_le_bytes());
        // Append a healthy frame behind it.
        buf.extend_from_slice(&encode(Envelope::command(PeerCommand::RequestRefresh).unwrap()));

        let err = EnvelopeCodec.decode(&mut buf).unwrap_err();
        assert!(err.is_recoverable_envelope_error(), "{err}");

        // The stream resynchronizes on the next frame.
        let next = EnvelopeCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(next.decode_command().unwrap(), PeerCommand::RequestRefresh);
    }

    #[test]
    fn checksum_mismatch_consumes_its_frame() {
        let mut buf = encode(Envelope::command(PeerCommand::ClearCurrent).unwrap());
        let tail = buf.len() - 1;
        buf[tail] ^= 0xff;
        buf.extend_from_slice(&encode(Envelope::command(PeerCommand::ClearCurrent).unwrap()));

        let err = EnvelopeCodec.decode(&mut buf).unwrap_err();
        assert!(err.is_recoverable_envelope_error(), "{err}");
        assert!(EnvelopeCodec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut buf = BytesMut::from(&b"XXXX............"[..]);
        let err = EnvelopeCodec.decode(&mut buf).unwrap_err();
        assert!(!err.is_recoverable_envelope_error(), "{err}");
    }

    #[test]
    fn command_strings_round_trip() {
        let id = Uuid::new_v4();
        for cmd in [
            PeerCommand::RequestRefresh,
            PeerCommand::ClearCurrent,
            PeerCommand::SendMessage(id),
        ] {
            let parsed: PeerCommand = cmd.to_string().parse().unwrap();
            assert_eq!(parsed, cmd);
        }
    }

    #[test]
    fn unknown_command_rejected() {
        assert!("self-destruct".parse::<PeerCommand>().is_err());
        assert!("send-message:not-a-uuid".parse::<PeerCommand>().is_err());
    }

    #[test]
    fn garbage_payload_fails_typed_decode() {
        let envelope = Envelope {
            kind: EnvelopeKind::QueueSnapshot,
            payload: vec![0xde, 0xad, 0xbe, 0xef],
        };
        assert!(envelope.decode_queue().is_err());
    }

    #[test]
    fn mismatched_kind_rejected() {
        let envelope = Envelope::command(PeerCommand::ClearCurrent).unwrap();
        assert!(envelope.decode_queue().is_err());
    }
}
