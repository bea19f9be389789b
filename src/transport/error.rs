//! Transport error types

use thiserror::Error;

/// The transport could not be established or re-established
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("SSH handshake failed: {0}")]
    Handshake(String),

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Connection timed out after {0}s")]
    Timeout(u64),

    #[error("No credentials known for session: {0}")]
    MissingCredentials(String),

    #[error("Credential lookup failed: {0}")]
    Credentials(String),

    #[error("Private key error: {0}")]
    Key(String),

    #[error("Host key verification failed: {0}")]
    HostKey(String),

    #[error("SSH agent error: {0}")]
    Agent(String),
}

impl ConnectionError {
    /// The underlying reason, as reported by the transport layer
    pub fn reason(&self) -> String {
        match self {
            Self::Unreachable(r)
            | Self::Handshake(r)
            | Self::AuthRejected(r)
            | Self::MissingCredentials(r)
            | Self::Credentials(r)
            | Self::Key(r)
            | Self::HostKey(r)
            | Self::Agent(r) => r.clone(),
            Self::Timeout(_) => self.to_string(),
        }
    }
}

/// Command execution or streaming failed on an established transport
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Channel open rejected: {0}")]
    OpenRejected(String),

    #[error("Exec request failed: {0}")]
    Exec(String),

    #[error("Connection lost: {0}")]
    Closed(String),

    #[error("Channel closed without exit status")]
    NoExitStatus,

    #[error("Remote process terminated by signal {signal}: {message}")]
    Signal { signal: String, message: String },

    #[error("Exit status already consumed")]
    AlreadyConsumed,
}

impl ChannelError {
    /// The underlying reason, as reported by the transport layer
    pub fn reason(&self) -> String {
        match self {
            Self::OpenRejected(r) | Self::Exec(r) | Self::Closed(r) => r.clone(),
            _ => self.to_string(),
        }
    }
}
