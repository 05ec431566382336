//! Engine-facing side: the UDP link, clip rotation, traffic guards and
//! the high-level wall sender.

pub mod link;
pub mod rotation;
pub mod sender;
pub mod state;
pub mod throttle;

pub use link::{EngineLink, PingOutcome};
pub use rotation::ClipRotation;
pub use sender::WallSender;
pub use state::LinkState;
pub use throttle::{DedupeCache, SendOutcome, TokenBucket};
