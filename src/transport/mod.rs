//! Transport Abstraction
//!
//! The seam between the session layer and the secure transport library.
//!
//! ```text
//! Connector ──connect()──► TransportHandle ──open_exec()──► RawChannel
//!                          (one SSH connection)             (one exec request)
//! ```
//!
//! The production implementation lives in [`crate::ssh`]. Everything above
//! this module only sees the traits, so the registry and coordinator can be
//! driven by an in-memory transport in tests.

mod error;

pub use error::{ChannelError, ConnectionError};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::session::Credentials;

/// One event read from a remote exec channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Bytes written by the remote process to standard output
    Stdout(Bytes),
    /// Bytes written by the remote process to standard error
    Stderr(Bytes),
    /// Remote process exited normally
    ExitStatus(u32),
    /// Remote process was terminated by a signal
    ExitSignal { signal: String, message: String },
    /// Remote side rejected the exec request
    Failure,
    /// Remote side will send no more data
    Eof,
    /// Channel closed by the remote side
    Closed,
}

/// Establishes authenticated connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and authenticate. Returns a live transport or the reason it could not be built.
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn TransportHandle>, ConnectionError>;
}

/// One live, authenticated connection to a remote host
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Open a new channel and request execution of `command` on it
    async fn open_exec(&self, command: &str) -> Result<Box<dyn RawChannel>, ChannelError>;

    /// Whether the underlying connection is still open
    fn is_alive(&self) -> bool;

    /// Gracefully disconnect
    async fn close(&self);
}

/// Multiplexed event source of one exec channel.
///
/// Returns `None` once the channel is gone; after `Closed` or `None` no more
/// events are produced.
#[async_trait]
pub trait RawChannel: Send {
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    /// Ask the remote side to close the channel
    async fn close(&mut self) {}
}
