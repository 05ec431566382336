//! Domain-specific error types for the lumen stack.
//!
//! All fallible operations return `Result<T, LumenError>` (or one of the
//! per-concern sub-enums). No panics on invalid input; every error is
//! typed and recoverable.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the lumen stack.
#[derive(Debug, Error)]
pub enum LumenError {
    /// The OSC encoder rejected a message before any bytes were produced.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// An inbound OSC buffer could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A peer envelope violated the sync protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The socket/IO layer reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The outbound send queue is full; the message was rejected, not sent.
    #[error("rate limited: outbound queue is full")]
    RateLimited,

    /// A send-type operation was attempted while the link is not connected.
    #[error("not connected")]
    NotConnected,

    /// An mpsc/oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// A settings value failed validation.
    #[error("invalid settings: {0}")]
    InvalidSettings(&'static str),

    /// A connection state transition was not legal from the current state.
    #[error("invalid link transition: {0}")]
    InvalidTransition(&'static str),
}

// ── EncodeError ──────────────────────────────────────────────────

/// Errors produced while building an OSC byte buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// Address patterns must begin with `/`.
    #[error("address must start with '/': {0:?}")]
    AddressSyntax(String),

    /// OSC strings are NUL-terminated on the wire; an interior NUL would
    /// truncate the field for the receiver.
    #[error("string field contains an interior NUL byte")]
    EmbeddedNul,

    /// Blob lengths are carried as a signed 32-bit prefix.
    #[error("blob too large: {0} bytes")]
    BlobTooLarge(usize),
}

// ── DecodeError ──────────────────────────────────────────────────

/// Errors produced while decoding an OSC byte buffer.
///
/// Each malformation gets its own variant so callers can tell a truncated
/// datagram apart from a corrupt one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Every OSC buffer is a multiple of 4 bytes.
    #[error("buffer length {len} is not a multiple of 4")]
    Unaligned { len: usize },

    /// The buffer ended before a declared field did.
    #[error("truncated buffer: {needed} more bytes required")]
    Truncated { needed: usize },

    /// A string field ran to the end of the buffer without a NUL terminator.
    #[error("unterminated string field")]
    UnterminatedString,

    /// Padding bytes after a field must be NUL.
    #[error("non-zero padding byte")]
    BadPadding,

    /// The decoded address did not begin with `/`.
    #[error("address must start with '/': {0:?}")]
    AddressSyntax(String),

    /// The type-tag string was absent or did not begin with `,`.
    #[error("type-tag string must start with ','")]
    MissingTypeTags,

    /// A type-tag character is not one of `i f s b T F N I`.
    #[error("unknown type tag {0:?}")]
    UnknownTypeTag(char),

    /// A blob's declared length is negative.
    #[error("negative blob length {0}")]
    NegativeBlobLength(i32),

    /// A blob's declared length exceeds the remaining buffer.
    #[error("blob length {declared} exceeds remaining {remaining} bytes")]
    BlobOverrun { declared: usize, remaining: usize },

    /// A string field held invalid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// All arguments were decoded but bytes remain.
    #[error("{0} trailing bytes after last argument")]
    TrailingBytes(usize),
}

// ── ProtocolError ────────────────────────────────────────────────

/// Errors raised by the peer sync protocol.
///
/// Variants other than [`ProtocolError::InvalidMagic`] and
/// [`ProtocolError::PayloadTooLarge`] are per-envelope: the session logs
/// them, drops the envelope, and keeps reading.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame did not start with the `LMN1` magic; the stream is
    /// desynchronized and the session must close.
    #[error("invalid envelope magic")]
    InvalidMagic,

    /// The numeric envelope kind did not map to any known variant.
    #[error("unknown envelope kind {value:#x}")]
    UnknownEnvelopeKind { value: u32 },

    /// The envelope payload failed checksum verification.
    #[error("envelope checksum mismatch")]
    ChecksumMismatch,

    /// The declared payload length exceeds the frame limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload bytes did not deserialize as the declared kind.
    #[error("payload deserialize failed: {0}")]
    Payload(String),

    /// An envelope of this kind was expected to be something else.
    #[error("unexpected envelope kind: expected {expected}, got {actual}")]
    UnexpectedKind {
        expected: &'static str,
        actual: &'static str,
    },

    /// A peer command string could not be parsed.
    #[error("unknown peer command: {0:?}")]
    UnknownCommand(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<Box<bincode::ErrorKind>> for ProtocolError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        ProtocolError::Payload(e.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for LumenError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        LumenError::Protocol(e.into())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for LumenError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        LumenError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for LumenError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        LumenError::ChannelClosed
    }
}

impl LumenError {
    /// Returns `true` when the error concerns a single peer envelope and
    /// the session should keep reading.
    pub fn is_recoverable_envelope_error(&self) -> bool {
        matches!(
            self,
            LumenError::Protocol(
                ProtocolError::UnknownEnvelopeKind { .. }
                    | ProtocolError::ChecksumMismatch
                    | ProtocolError::Payload(_)
                    | ProtocolError::UnknownCommand(_)
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = LumenError::from(DecodeError::Unaligned { len: 7 });
        assert!(e.to_string().contains("multiple of 4"));

        let e = ProtocolError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn envelope_error_recoverability() {
        let e = LumenError::Protocol(ProtocolError::ChecksumMismatch);
        assert!(e.is_recoverable_envelope_error());

        let e = LumenError::Protocol(ProtocolError::InvalidMagic);
        assert!(!e.is_recoverable_envelope_error());

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e = LumenError::Transport(io);
        assert!(!e.is_recoverable_envelope_error());
    }
}
