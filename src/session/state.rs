//! Session State Machine
//!
//! Valid state transitions for a registry session:
//!
//! ```text
//! ┌──────────────┐   acquire()   ┌──────────────┐
//! │ Unconnected  │ ────────────► │  Connecting  │ ◄─────────────┐
//! └──────────────┘               └──────┬───────┘               │
//!        ▲                              │                       │
//!        │                    success / failure                 │
//!        │                 ┌────────────┴──────────┐            │
//!        │ close()         ▼                       ▼            │
//!        │         ┌──────────────┐  error  ┌──────────────┐    │
//!        └─────────│    Ready     │ ──────► │    Broken    │ ───┘
//!                  └──────────────┘         └──────────────┘
//!                                             next acquire()
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transport has been established yet
    #[default]
    Unconnected,
    /// SSH handshake + auth in progress
    Connecting,
    /// Transport established and usable for a new command channel
    Ready,
    /// Transport failed; the session will be discarded
    Broken,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconnected => write!(f, "unconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Ready => write!(f, "ready"),
            Self::Broken => write!(f, "broken"),
        }
    }
}

/// State machine for session lifecycle management
#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    error_message: Option<String>,
    transition_count: u32,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    /// Create a new state machine in Unconnected state
    pub fn new() -> Self {
        Self {
            state: SessionState::Unconnected,
            error_message: None,
            transition_count: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Reason the session broke, if it did
    pub fn error(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn transition_count(&self) -> u32 {
        self.transition_count
    }

    /// Attempt to transition to Connecting state
    pub fn start_connecting(&mut self) -> Result<(), StateTransitionError> {
        match self.state {
            SessionState::Unconnected | SessionState::Broken => {
                self.transition_to(SessionState::Connecting);
                self.error_message = None;
                Ok(())
            }
            _ => Err(StateTransitionError::InvalidTransition {
                from: self.state,
                to: SessionState::Connecting,
            }),
        }
    }

    /// Transition to Ready once the transport is authenticated
    pub fn connect_success(&mut self) -> Result<(), StateTransitionError> {
        match self.state {
            SessionState::Connecting => {
                self.transition_to(SessionState::Ready);
                Ok(())
            }
            _ => Err(StateTransitionError::InvalidTransition {
                from: self.state,
                to: SessionState::Ready,
            }),
        }
    }

    /// Transition to Broken when the handshake or auth fails
    pub fn connect_failed(&mut self, error: String) -> Result<(), StateTransitionError> {
        match self.state {
            SessionState::Connecting => {
                self.transition_to(SessionState::Broken);
                self.error_message = Some(error);
                Ok(())
            }
            _ => Err(StateTransitionError::InvalidTransition {
                from: self.state,
                to: SessionState::Broken,
            }),
        }
    }

    /// Mark the session broken (can be called from any state)
    pub fn mark_broken(&mut self, reason: String) {
        if self.state != SessionState::Broken {
            self.transition_to(SessionState::Broken);
        }
        self.error_message = Some(reason);
    }

    /// Reset to Unconnected after an explicit close
    pub fn reset(&mut self) {
        self.transition_to(SessionState::Unconnected);
        self.error_message = None;
    }

    /// Whether a new command channel may be opened
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    fn transition_to(&mut self, new_state: SessionState) {
        tracing::debug!(
            "Session state transition: {} -> {} (count: {})",
            self.state,
            new_state,
            self.transition_count + 1
        );
        self.state = new_state;
        self.transition_count += 1;
    }
}

/// Error type for invalid state transitions
#[derive(Debug, Clone, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}
