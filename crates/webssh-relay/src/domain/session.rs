//! Lifecycle state machine for one client's SSH session.
//!
//! ```text
//!   idle ──begin_connect──▶ connecting ──shell_opened──▶ shell_ready
//!    │                          │                            │
//!    └──────────close───────────┴───────────close────────────┴──▶ closed
//! ```
//!
//! `closed` is terminal.  `close` may be called any number of times; only the
//! first call reports a transition, which is what makes teardown idempotent.

use std::fmt;

use thiserror::Error;

/// The phase a session bridge is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connect request accepted yet.
    #[default]
    Idle,
    /// Handshake, authentication or shell open in progress.
    Connecting,
    /// The shell channel is open and bytes flow both ways.
    ShellReady,
    /// The remote session is gone; nothing further happens.
    Closed,
}

/// An attempted transition that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} while {from}")]
pub struct SessionStateError {
    pub from: SessionState,
    pub action: &'static str,
}

impl SessionState {
    /// `idle → connecting`.
    pub fn begin_connect(&mut self) -> Result<(), SessionStateError> {
        match self {
            SessionState::Idle => {
                *self = SessionState::Connecting;
                Ok(())
            }
            from => Err(SessionStateError {
                from: *from,
                action: "begin connect",
            }),
        }
    }

    /// `connecting → shell_ready`.
    pub fn shell_opened(&mut self) -> Result<(), SessionStateError> {
        match self {
            SessionState::Connecting => {
                *self = SessionState::ShellReady;
                Ok(())
            }
            from => Err(SessionStateError {
                from: *from,
                action: "open shell",
            }),
        }
    }

    /// Moves to `closed` from any state.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn close(&mut self) -> bool {
        if *self == SessionState::Closed {
            return false;
        }
        *self = SessionState::Closed;
        true
    }

    pub fn is_closed(&self) -> bool {
        *self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::ShellReady => "shell_ready",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_idle() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn test_happy_path_reaches_shell_ready() {
        // Arrange
        let mut state = SessionState::default();

        // Act
        state.begin_connect().unwrap();
        state.shell_opened().unwrap();

        // Assert
        assert_eq!(state, SessionState::ShellReady);
    }

    #[test]
    fn test_close_is_reachable_from_every_live_state() {
        for start in [
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::ShellReady,
        ] {
            let mut state = start;
            assert!(state.close(), "close from {start} must transition");
            assert!(state.is_closed());
        }
    }

    #[test]
    fn test_second_close_reports_no_transition() {
        let mut state = SessionState::ShellReady;
        assert!(state.close());
        assert!(!state.close());
        assert!(state.is_closed());
    }

    #[test]
    fn test_begin_connect_twice_is_rejected() {
        let mut state = SessionState::default();
        state.begin_connect().unwrap();

        let err = state.begin_connect().unwrap_err();

        assert_eq!(err.from, SessionState::Connecting);
        assert_eq!(state, SessionState::Connecting);
    }

    #[test]
    fn test_shell_opened_from_idle_is_rejected() {
        let mut state = SessionState::Idle;
        assert!(state.shell_opened().is_err());
        assert_eq!(state, SessionState::Idle);
    }

    #[test]
    fn test_no_transition_leaves_closed() {
        let mut state = SessionState::Closed;
        assert!(state.begin_connect().is_err());
        assert!(state.shell_opened().is_err());
        assert!(state.is_closed());
    }

    #[test]
    fn test_error_message_names_state_and_action() {
        let mut state = SessionState::Closed;
        let err = state.begin_connect().unwrap_err();
        assert_eq!(err.to_string(), "cannot begin connect while closed");
    }
}
