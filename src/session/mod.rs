//! Session Management Module
//!
//! Provides the session registry with:
//! - State machine for session lifecycle
//! - One exclusive lease per session at a time (FIFO per key)
//! - Lazy reconnection: a broken session is replaced on the next acquire
//! - Remembered credentials for transparent reconnects

mod registry;
mod state;
pub mod types;

pub use registry::{SessionInfo, SessionLease, SessionRegistry};
pub use state::{SessionState, SessionStateMachine, StateTransitionError};
pub use types::{AuthMethod, Credentials, SessionKey, DEFAULT_SSH_PORT};
