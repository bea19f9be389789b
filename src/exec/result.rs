//! Invocation lifecycle and results

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::session::SessionKey;

/// Per-invocation state:
/// `Pending -> Connecting -> Running -> {Completed, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    Pending,
    Connecting,
    Running,
    Completed,
    Failed,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Connecting => write!(f, "connecting"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a command that ran to completion on the remote host.
///
/// A non-zero `exit_status` is a normal result, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationResult {
    pub id: Uuid,
    pub session_key: SessionKey,
    pub command: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: u32,
    /// Output beyond the configured cap was discarded
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl InvocationResult {
    /// Exit status was zero
    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Collected output of one stream, with an optional byte cap (0 = unlimited)
#[derive(Debug, Default)]
pub(crate) struct Capture {
    pub buf: Vec<u8>,
    pub truncated: bool,
    limit: usize,
}

impl Capture {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            truncated: false,
            limit,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.limit == 0 {
            self.buf.extend_from_slice(chunk);
            return;
        }
        let room = self.limit.saturating_sub(self.buf.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Tracks one invocation through its state machine
#[derive(Debug)]
pub(crate) struct Invocation {
    pub id: Uuid,
    pub key: SessionKey,
    pub command: String,
    pub started_at: DateTime<Utc>,
    state: InvocationState,
}

impl Invocation {
    pub fn new(key: SessionKey, command: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            command: command.to_string(),
            started_at: Utc::now(),
            state: InvocationState::Pending,
        }
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn advance(&mut self, next: InvocationState) {
        if self.state.is_terminal() {
            debug!(
                "[exec] Invocation {} already {}, ignoring -> {}",
                self.id, self.state, next
            );
            return;
        }
        debug!("[exec] Invocation {}: {} -> {}", self.id, self.state, next);
        self.state = next;
    }

    pub fn complete(mut self, exit_status: u32, stdout: Capture, stderr: Capture) -> InvocationResult {
        self.advance(InvocationState::Completed);
        InvocationResult {
            id: self.id,
            session_key: self.key,
            command: self.command,
            stdout: stdout.buf,
            stderr: stderr.buf,
            exit_status,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_limit() {
        let mut capture = Capture::with_limit(4);
        capture.push(b"ab");
        capture.push(b"cdef");
        capture.push(b"g");
        assert_eq!(capture.buf, b"abcd");
        assert!(capture.truncated);

        let mut unlimited = Capture::with_limit(0);
        unlimited.push(&[b'x'; 10_000]);
        assert_eq!(unlimited.buf.len(), 10_000);
        assert!(!unlimited.truncated);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut invocation = Invocation::new(SessionKey::from("host1"), "true");
        invocation.advance(InvocationState::Connecting);
        invocation.advance(InvocationState::Failed);
        invocation.advance(InvocationState::Running);
        assert_eq!(invocation.state(), InvocationState::Failed);
    }

    #[test]
    fn test_complete_builds_result() {
        let invocation = Invocation::new(SessionKey::from("host1"), "exit 3");
        let result = invocation.complete(3, Capture::with_limit(0), Capture::with_limit(0));
        assert!(!result.is_success());
        assert_eq!(result.command, "exit 3");
        assert!(result.duration() >= chrono::Duration::zero());
    }
}
