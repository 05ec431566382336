//! Link lifecycle state machine.
//!
//! Shared by the engine link and the peer client session. Transitions are
//! validated and return `Result` instead of panicking.

use std::time::Instant;

use crate::error::LumenError;

// ── LinkState ────────────────────────────────────────────────────

/// The current phase of a managed connection.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲               │  ▲           │
///       │               ▼  │ backoff   ▼
///       └────────────── Failed{reason} ┘
/// ```
///
/// `Failed` re-enters `Connecting` after a backoff delay unless an
/// explicit disconnect was requested, which is terminal until a new
/// connect is issued.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LinkState {
    /// No active connection. Initial / terminal state.
    #[default]
    Disconnected,

    /// A connection attempt is in flight.
    Connecting,

    /// The link is up and send-type operations are valid.
    Connected {
        /// When the link entered the `Connected` state.
        since: Instant,
    },

    /// The last attempt or transfer failed; carries the reason.
    Failed { reason: String },
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Failed { reason } => write!(f, "Failed: {reason}"),
        }
    }
}

impl LinkState {
    /// Returns `true` when send-type operations are valid.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Returns `true` in the idle/terminal state.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The failure reason, in the `Failed` state only.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    /// How long the link has been up. `None` outside `Connected`.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`, `Failed` (backoff retry).
    pub fn begin_connect(&mut self) -> Result<(), LumenError> {
        match self {
            Self::Disconnected | Self::Failed { .. } => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(LumenError::InvalidTransition(
                "cannot connect: not in Disconnected or Failed state",
            )),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn mark_connected(&mut self) -> Result<(), LumenError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(LumenError::InvalidTransition(
                "cannot mark connected: not in Connecting state",
            )),
        }
    }

    /// Transition to `Failed`.
    ///
    /// Valid from: `Connecting` (attempt failed), `Connected` (transport
    /// error).
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), LumenError> {
        match self {
            Self::Connecting | Self::Connected { .. } => {
                *self = Self::Failed {
                    reason: reason.into(),
                };
                Ok(())
            }
            _ => Err(LumenError::InvalidTransition(
                "cannot mark failed: not in Connecting or Connected state",
            )),
        }
    }

    /// Explicit close. Always succeeds from any state and cancels the
    /// implied backoff retry; also how a cancelled in-flight attempt
    /// lands, so cancellation can never strand the machine in
    /// `Connecting`.
    pub fn close(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut state = LinkState::default();
        assert!(state.is_disconnected());

        state.begin_connect().unwrap();
        assert_eq!(state, LinkState::Connecting);

        state.mark_connected().unwrap();
        assert!(state.is_connected());
        assert!(state.connected_duration().is_some());

        state.close();
        assert!(state.is_disconnected());
    }

    #[test]
    fn failure_and_backoff_reentry() {
        let mut state = LinkState::default();
        state.begin_connect().unwrap();
        state.mark_failed("socket open failed").unwrap();
        assert!(state.is_failed());
        assert_eq!(state.failure_reason(), Some("socket open failed"));

        // Backoff retry re-enters Connecting from Failed.
        state.begin_connect().unwrap();
        assert_eq!(state, LinkState::Connecting);
    }

    #[test]
    fn transport_error_while_connected() {
        let mut state = LinkState::default();
        state.begin_connect().unwrap();
        state.mark_connected().unwrap();
        state.mark_failed("send: connection refused").unwrap();
        assert!(state.is_failed());
    }

    #[test]
    fn invalid_transitions_rejected() {
        let mut state = LinkState::Connecting;
        assert!(state.begin_connect().is_err());

        let mut state = LinkState::default();
        assert!(state.mark_connected().is_err());
        assert!(state.mark_failed("x").is_err());
    }

    #[test]
    fn close_cancels_from_any_state() {
        for mut state in [
            LinkState::Connecting,
            LinkState::Connected {
                since: Instant::now(),
            },
            LinkState::Failed {
                reason: "r".into(),
            },
        ] {
            state.close();
            assert!(state.is_disconnected());
        }
    }

    #[test]
    fn display_format() {
        assert_eq!(LinkState::Disconnected.to_string(), "Disconnected");
        assert_eq!(LinkState::Connecting.to_string(), "Connecting");
        assert_eq!(
            LinkState::Failed {
                reason: "refused".into()
            }
            .to_string(),
            "Failed: refused"
        );
    }
}
