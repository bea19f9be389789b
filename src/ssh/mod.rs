//! SSH transport built on russh
//!
//! Implements the [`crate::transport`] traits: one [`SshTransport`] per
//! authenticated connection, one exec channel per command.

pub mod auth;
mod channel;
mod client;
mod handler;

pub use channel::SshExecChannel;
pub use client::{SshConnector, SshTransport};
pub use handler::ClientHandler;
