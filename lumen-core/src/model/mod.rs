//! Shared data model: messages, the ordered queue, and engine settings.
//!
//! The host process owns the authoritative queue and settings; clients
//! hold eventually-consistent copies mutated only by the peer protocol.

mod message;
mod queue;
mod settings;

pub use message::{
    AnimationKind, Color, FontWeight, Message, MessageStyle, Shadow, Stroke, TextAlignment,
};
pub use queue::MessageQueue;
pub use settings::OscSettings;
