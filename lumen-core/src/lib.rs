//! # lumen-core
//!
//! Core library for the Lumen LED-wall message dispatcher.
//!
//! This crate contains:
//! - **OSC codec**: `OscMessage`/`OscValue` and the pure encode/decode pair
//! - **Engine side**: `EngineLink` (managed UDP link with backoff),
//!   `ClipRotation`, dedupe/rate-limit guards and the `WallSender` surface
//! - **Data model**: `Message`, `MessageQueue`, `OscSettings`
//! - **Peer sync**: `HostSession`/`ClientSession` over framed `Envelope`
//!   TCP sessions, plus UDP beacon discovery
//! - **Error**: `LumenError` — typed, `thiserror`-based error hierarchy

pub mod engine;
pub mod error;
pub mod model;
pub mod osc;
pub mod peer;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use engine::{ClipRotation, EngineLink, LinkState, PingOutcome, SendOutcome, WallSender};
pub use error::{DecodeError, EncodeError, LumenError, ProtocolError};
pub use model::{Message, MessageQueue, MessageStyle, OscSettings};
pub use osc::{OscMessage, OscValue};
pub use peer::{
    Advertiser, ClientSession, Envelope, EnvelopeKind, HostEvent, HostSession, PeerCommand,
    SentNotice,
};
