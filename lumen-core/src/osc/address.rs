//! Reserved address patterns on the receiving visual engine.
//!
//! All patterns are parameterized by the configured layer and clip slot;
//! see [`OscSettings`](crate::model::OscSettings) for the defaults.

/// Probe address used by `ping()`; the engine may or may not answer it.
pub const PING: &str = "/lumen/ping";

/// Text source parameter of a clip: one string argument.
pub fn clip_text(layer: u32, clip: u32) -> String {
    format!("/composition/layers/{layer}/clips/{clip}/video/source/text")
}

/// Trigger (connect) a clip: no arguments.
pub fn clip_connect(layer: u32, clip: u32) -> String {
    format!("/composition/layers/{layer}/clips/{clip}/connect")
}

/// Untrigger (disconnect) a clip: no arguments.
pub fn clip_disconnect(layer: u32, clip: u32) -> String {
    format!("/composition/layers/{layer}/clips/{clip}/disconnect")
}

/// Clear everything on a layer: no arguments.
pub fn layer_clear(layer: u32) -> String {
    format!("/composition/layers/{layer}/clear")
}
