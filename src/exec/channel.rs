//! Command Channel - one exec request and its output streams
//!
//! A pump task reads the multiplexed SSH channel and fans events out:
//!
//! ```text
//!                      ┌──► stdout  (mpsc, bounded) ──► OutputStream
//! RawChannel ── pump ──┼──► stderr  (mpsc, bounded) ──► OutputStream
//!                      └──► exit    (oneshot)       ──► wait()
//! ```
//!
//! Both streams end when the remote side closes the channel. The exit
//! status is delivered only after both streams have been closed, so once
//! `wait()` returns, every byte of output has already been handed out.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::session::SessionLease;
use crate::transport::{ChannelError, ChannelEvent, RawChannel};

/// Chunks buffered per stream before the pump waits for the reader
const STREAM_BUFFER: usize = 64;

/// Which remote stream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Lazy, finite sequence of output chunks from one remote stream.
///
/// Ends (`None`) when the remote side closes the channel.
#[derive(Debug)]
pub struct OutputStream {
    kind: StreamKind,
    rx: mpsc::Receiver<Bytes>,
}

impl OutputStream {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Next chunk, or `None` once the stream is finished
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Drain the whole stream into one buffer
    pub async fn read_to_end(mut self) -> Vec<u8> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            buf.extend_from_slice(&chunk);
        }
        buf
    }
}

impl Stream for OutputStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// One command running on a remote host
pub struct CommandChannel {
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
    exit_rx: Option<oneshot::Receiver<Result<u32, ChannelError>>>,
    pump: JoinHandle<()>,
}

impl CommandChannel {
    /// Request execution of `command` on the session held by `lease`
    pub async fn open(lease: &SessionLease, command: &str) -> Result<Self, ChannelError> {
        let transport = lease
            .transport()
            .ok_or_else(|| ChannelError::OpenRejected("session has no transport".to_string()))?;
        let raw = transport.open_exec(command).await?;
        debug!("[channel] Exec channel opened on {}", lease.key());
        Ok(Self::from_raw(raw))
    }

    /// Start pumping an already-opened raw channel
    pub fn from_raw(raw: Box<dyn RawChannel>) -> Self {
        let (stdout_tx, stdout_rx) = mpsc::channel(STREAM_BUFFER);
        let (stderr_tx, stderr_rx) = mpsc::channel(STREAM_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();

        let pump = tokio::spawn(pump(raw, stdout_tx, stderr_tx, exit_tx));

        Self {
            stdout: Some(OutputStream {
                kind: StreamKind::Stdout,
                rx: stdout_rx,
            }),
            stderr: Some(OutputStream {
                kind: StreamKind::Stderr,
                rx: stderr_rx,
            }),
            exit_rx: Some(exit_rx),
            pump,
        }
    }

    /// Take the stdout stream. Only the first call returns it.
    pub fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take()
    }

    /// Take the stderr stream. Only the first call returns it.
    pub fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take()
    }

    /// Wait for the remote process to terminate and return its exit status.
    ///
    /// Streams that were never taken are discarded so the pump cannot stall
    /// on them. Fails if the connection drops before termination is seen.
    pub async fn wait(&mut self) -> Result<u32, ChannelError> {
        self.stdout = None;
        self.stderr = None;
        let exit_rx = self.exit_rx.take().ok_or(ChannelError::AlreadyConsumed)?;
        match exit_rx.await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Closed("channel pump stopped".to_string())),
        }
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump(
    mut raw: Box<dyn RawChannel>,
    stdout_tx: mpsc::Sender<Bytes>,
    stderr_tx: mpsc::Sender<Bytes>,
    exit_tx: oneshot::Sender<Result<u32, ChannelError>>,
) {
    let mut exit: Option<Result<u32, ChannelError>> = None;
    let mut connection_lost = false;

    loop {
        match raw.next_event().await {
            Some(ChannelEvent::Stdout(chunk)) => {
                // A dropped reader only means nobody wants this stream
                let _ = stdout_tx.send(chunk).await;
            }
            Some(ChannelEvent::Stderr(chunk)) => {
                let _ = stderr_tx.send(chunk).await;
            }
            Some(ChannelEvent::ExitStatus(code)) => {
                trace!("[channel] Exit status {}", code);
                exit = Some(Ok(code));
            }
            Some(ChannelEvent::ExitSignal { signal, message }) => {
                trace!("[channel] Exit signal {}", signal);
                exit = Some(Err(ChannelError::Signal { signal, message }));
            }
            Some(ChannelEvent::Failure) => {
                exit = Some(Err(ChannelError::Exec(
                    "remote side rejected the exec request".to_string(),
                )));
                raw.close().await;
                break;
            }
            Some(ChannelEvent::Eof) => {
                trace!("[channel] Remote EOF");
            }
            Some(ChannelEvent::Closed) => break,
            None => {
                connection_lost = true;
                break;
            }
        }
    }

    drop(stdout_tx);
    drop(stderr_tx);

    let result = match exit {
        Some(result) => result,
        None if connection_lost => Err(ChannelError::Closed(
            "connection dropped before the command finished".to_string(),
        )),
        None => Err(ChannelError::NoExitStatus),
    };
    if let Err(e) = &result {
        warn!("[channel] Command did not complete normally: {}", e);
    }
    let _ = exit_tx.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_echo_streams_and_status() {
        let mut channel = CommandChannel::from_raw(Box::new(MockChannel::script("echo hi")));
        let stdout = channel.take_stdout().unwrap();
        let stderr = channel.take_stderr().unwrap();
        assert!(channel.take_stdout().is_none());

        assert_eq!(stdout.read_to_end().await, b"hi\n");
        assert!(stderr.read_to_end().await.is_empty());
        assert_eq!(channel.wait().await.unwrap(), 0);
        assert!(matches!(channel.wait().await, Err(ChannelError::AlreadyConsumed)));
    }

    #[tokio::test]
    async fn test_no_output_still_has_status() {
        let mut channel = CommandChannel::from_raw(Box::new(MockChannel::script("exit 3")));
        let mut stdout = channel.take_stdout().unwrap();
        assert!(stdout.next().await.is_none());
        assert_eq!(channel.wait().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_untaken_streams_do_not_block_wait() {
        let mut channel = CommandChannel::from_raw(Box::new(MockChannel::script("flood 500")));
        assert_eq!(channel.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connection_drop_fails_wait() {
        let mut channel = CommandChannel::from_raw(Box::new(MockChannel::script("sever")));
        let stdout = channel.take_stdout().unwrap();
        assert_eq!(stdout.read_to_end().await, b"partial\n");
        assert!(matches!(channel.wait().await, Err(ChannelError::Closed(_))));
    }

    #[tokio::test]
    async fn test_signal_and_missing_status() {
        let mut channel = CommandChannel::from_raw(Box::new(MockChannel::script("kill")));
        assert!(matches!(
            channel.wait().await,
            Err(ChannelError::Signal { ref signal, .. }) if signal == "KILL"
        ));

        let mut channel = CommandChannel::from_raw(Box::new(MockChannel::script("nostatus")));
        assert!(matches!(channel.wait().await, Err(ChannelError::NoExitStatus)));

        let mut channel = CommandChannel::from_raw(Box::new(MockChannel::script("reject")));
        assert!(matches!(channel.wait().await, Err(ChannelError::Exec(_))));
    }
}
