//! Target-endpoint configuration for the engine link.

use serde::{Deserialize, Serialize};

use crate::error::LumenError;

/// Where and how messages are dispatched to the visual engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscSettings {
    /// Engine host address (IP or hostname).
    pub host: String,
    /// Engine UDP port.
    pub port: u16,
    /// Composition layer holding the text clips.
    pub layer: u32,
    /// Base clip slot for text; rotation targets `clip .. clip+rotation_count-1`.
    pub clip: u32,
    /// Dedicated blank clip triggered to clear the wall. Must differ from
    /// every rotation slot's base.
    pub clear_clip: u32,
    /// Number of rotating slots, at least 2 to avoid re-trigger flicker.
    pub rotation_count: u32,
    /// Automatically clear the wall after each send.
    pub auto_clear: bool,
    /// Delay before the automatic clear, in seconds.
    pub auto_clear_delay: f32,
}

impl Default for OscSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2269,
            layer: 1,
            clip: 1,
            clear_clip: 2,
            rotation_count: 3,
            auto_clear: false,
            auto_clear_delay: 5.0,
        }
    }
}

impl OscSettings {
    /// Validate the structural invariants.
    pub fn validate(&self) -> Result<(), LumenError> {
        if self.port == 0 {
            return Err(LumenError::InvalidSettings("port must be non-zero"));
        }
        if self.clip == self.clear_clip {
            return Err(LumenError::InvalidSettings(
                "clear clip must differ from the base clip",
            ));
        }
        if self.rotation_count < 2 {
            return Err(LumenError::InvalidSettings(
                "rotation count must be at least 2",
            ));
        }
        if !is_valid_host(&self.host) {
            return Err(LumenError::InvalidSettings(
                "host is not a valid address or hostname",
            ));
        }
        Ok(())
    }

    /// `host:port` form accepted by the socket layer.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Syntactic check only; name resolution happens at connect time.
fn is_valid_host(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    if host.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
