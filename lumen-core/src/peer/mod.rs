//! Host/client synchronization of the queue and settings.
//!
//! One host per session group owns the authoritative state; clients
//! mirror it over framed TCP envelopes and submit commands upstream.

pub mod client;
pub mod discovery;
pub mod envelope;
pub mod host;

pub use client::ClientSession;
pub use discovery::{Advertiser, HostAnnouncement, browse};
pub use envelope::{Envelope, EnvelopeCodec, EnvelopeKind, PeerCommand, SentNotice};
pub use host::{HostEvent, HostSession};
