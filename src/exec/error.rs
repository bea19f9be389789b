//! Execution error types

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::transport::{ChannelError, ConnectionError};

/// Why an invocation did not complete
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Executor is shutting down")]
    ShuttingDown,
}

/// Failure classification for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    Channel,
    Timeout,
    ShuttingDown,
}

impl ExecError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Connection(_) => FailureKind::Connection,
            Self::Channel(_) => FailureKind::Channel,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::ShuttingDown => FailureKind::ShuttingDown,
        }
    }

    /// Whether this failure invalidated the session it ran on
    pub fn invalidated_session(&self) -> bool {
        matches!(self, Self::Channel(_) | Self::Timeout(_))
    }

    /// The transport-level reason, unmodified
    pub fn reason(&self) -> String {
        match self {
            Self::Connection(e) => e.reason(),
            Self::Channel(e) => e.reason(),
            _ => self.to_string(),
        }
    }
}

impl Serialize for ExecError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = ExecError::from(ConnectionError::Unreachable("No route to host".into()));
        assert_eq!(err.kind(), FailureKind::Connection);
        assert!(!err.invalidated_session());
        assert_eq!(err.reason(), "No route to host");

        let err = ExecError::from(ChannelError::Closed("reset by peer".into()));
        assert_eq!(err.kind(), FailureKind::Channel);
        assert!(err.invalidated_session());

        let err = ExecError::Timeout(Duration::from_secs(1));
        assert!(err.invalidated_session());
        assert_eq!(err.to_string(), "Command timed out after 1s");
    }

    #[test]
    fn test_serializes_as_message() {
        let err = ExecError::from(ConnectionError::AuthRejected("Permission denied".into()));
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Connection error: Authentication rejected: Permission denied\"");
    }
}
