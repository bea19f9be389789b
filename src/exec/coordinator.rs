//! Execution Coordinator
//!
//! Runs one invocation end to end:
//!
//! ```text
//! Pending ──acquire──► Connecting ──open channel──► Running ──wait()──► Completed
//!                          │                           │
//!                          └──────── error ────────────┴──► Failed (session invalidated)
//! ```
//!
//! The whole flow sits under one timeout. If it fires while the invocation
//! holds a lease, dropping the lease invalidates the session; an invocation
//! still queued behind another one on the same key just gives up its place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::channel::{CommandChannel, OutputStream, StreamKind};
use super::error::ExecError;
use super::result::{Capture, Invocation, InvocationResult, InvocationState};
use super::{NullSink, OutputSink};
use crate::config::{ExecutorConfig, HostsFile, SecretStore};
use crate::session::{Credentials, SessionInfo, SessionKey, SessionRegistry};
use crate::ssh::SshConnector;
use crate::transport::{ConnectionError, Connector};

/// One command to run on one session
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub key: SessionKey,
    pub command: String,
    /// Falls back to `ExecutorConfig::default_timeout_secs`
    pub timeout: Option<Duration>,
    /// Needed only when the session has never connected
    pub credentials: Option<Credentials>,
}

impl ExecRequest {
    pub fn new(key: impl Into<SessionKey>, command: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            command: command.into(),
            timeout: None,
            credentials: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Runs commands on remote hosts over reusable sessions.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Executor {
    registry: SessionRegistry,
    config: Arc<ExecutorConfig>,
    hosts: Option<Arc<HostsFile>>,
    secrets: Option<Arc<dyn SecretStore>>,
    shutting_down: Arc<AtomicBool>,
}

impl Executor {
    pub fn new(connector: Arc<dyn Connector>, config: ExecutorConfig) -> Self {
        Self {
            registry: SessionRegistry::new(connector, config.connect_timeout()),
            config: Arc::new(config),
            hosts: None,
            secrets: None,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Executor over real SSH connections
    pub fn with_ssh(config: ExecutorConfig) -> Self {
        let connector = Arc::new(SshConnector::new(&config));
        Self::new(connector, config)
    }

    /// Executor configured from a loaded `hosts.json`
    pub fn from_hosts_file(file: HostsFile, secrets: Arc<dyn SecretStore>) -> Self {
        Self::with_ssh(file.executor.clone()).with_hosts(file, secrets)
    }

    /// Resolve credentials for unknown keys from saved hosts, by alias
    pub fn with_hosts(mut self, hosts: HostsFile, secrets: Arc<dyn SecretStore>) -> Self {
        self.hosts = Some(Arc::new(hosts));
        self.secrets = Some(secrets);
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `command` on the session for `key` and collect its output.
    ///
    /// A non-zero exit status is returned as a normal result.
    pub async fn execute(
        &self,
        key: impl Into<SessionKey>,
        credentials: Option<Credentials>,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<InvocationResult, ExecError> {
        let request = ExecRequest {
            key: key.into(),
            command: command.to_string(),
            timeout,
            credentials,
        };
        self.run(request).await
    }

    pub async fn run(&self, request: ExecRequest) -> Result<InvocationResult, ExecError> {
        self.execute_streaming(request, &mut NullSink).await
    }

    /// Like [`run`](Self::run), also handing each chunk to `sink` as it arrives
    pub async fn execute_streaming(
        &self,
        request: ExecRequest,
        sink: &mut dyn OutputSink,
    ) -> Result<InvocationResult, ExecError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ExecError::ShuttingDown);
        }

        let timeout = request.timeout.unwrap_or_else(|| self.config.default_timeout());
        let mut invocation = Invocation::new(request.key.clone(), &request.command);
        info!(
            "[exec] Invocation {} on {} (timeout {:?})",
            invocation.id, request.key, timeout
        );
        debug!("[exec] Invocation {} command: {}", invocation.id, request.command);

        let outcome = tokio::time::timeout(timeout, self.drive(&mut invocation, &request, sink)).await;

        match outcome {
            Ok(Ok((exit_status, stdout, stderr))) => {
                let result = invocation.complete(exit_status, stdout, stderr);
                info!(
                    "[exec] Invocation {} completed with exit status {} in {}ms",
                    result.id,
                    result.exit_status,
                    result.duration().num_milliseconds()
                );
                Ok(result)
            }
            Ok(Err(e)) => {
                invocation.advance(InvocationState::Failed);
                warn!("[exec] Invocation {} failed: {}", invocation.id, e);
                Err(e)
            }
            Err(_) => {
                let stage = invocation.state();
                invocation.advance(InvocationState::Failed);
                warn!(
                    "[exec] Invocation {} timed out after {:?} while {}",
                    invocation.id, timeout, stage
                );
                Err(ExecError::Timeout(timeout))
            }
        }
    }

    async fn drive(
        &self,
        invocation: &mut Invocation,
        request: &ExecRequest,
        sink: &mut dyn OutputSink,
    ) -> Result<(u32, Capture, Capture), ExecError> {
        invocation.advance(InvocationState::Connecting);
        let credentials = self.credentials_for(&request.key, request.credentials.as_ref())?;
        let lease = self
            .registry
            .acquire(&request.key, credentials.as_ref())
            .await?;

        let mut channel = match CommandChannel::open(&lease, &request.command).await {
            Ok(channel) => channel,
            Err(e) => {
                lease.invalidate(&e.reason()).await;
                return Err(e.into());
            }
        };
        invocation.advance(InvocationState::Running);

        let limit = self.config.max_output_bytes;
        let mut stdout = Capture::with_limit(limit);
        let mut stderr = Capture::with_limit(limit);
        let mut stdout_rx = channel.take_stdout();
        let mut stderr_rx = channel.take_stderr();

        // Drain both streams together so neither can stall the other
        loop {
            tokio::select! {
                chunk = next_chunk(&mut stdout_rx), if stdout_rx.is_some() => match chunk {
                    Some(chunk) => {
                        sink.on_chunk(StreamKind::Stdout, &chunk);
                        stdout.push(&chunk);
                    }
                    None => stdout_rx = None,
                },
                chunk = next_chunk(&mut stderr_rx), if stderr_rx.is_some() => match chunk {
                    Some(chunk) => {
                        sink.on_chunk(StreamKind::Stderr, &chunk);
                        stderr.push(&chunk);
                    }
                    None => stderr_rx = None,
                },
                else => break,
            }
        }

        if stdout.truncated || stderr.truncated {
            warn!(
                "[exec] Invocation {} output exceeded {} bytes, truncated",
                invocation.id, limit
            );
        }

        match channel.wait().await {
            Ok(exit_status) => {
                lease.release();
                Ok((exit_status, stdout, stderr))
            }
            Err(e) => {
                lease.invalidate(&e.reason()).await;
                Err(e.into())
            }
        }
    }

    /// Credentials for a connect: supplied, else remembered by the registry,
    /// else a saved host whose alias is `key`.
    fn credentials_for(
        &self,
        key: &SessionKey,
        supplied: Option<&Credentials>,
    ) -> Result<Option<Credentials>, ConnectionError> {
        if let Some(credentials) = supplied {
            return Ok(Some(credentials.clone()));
        }
        if self.registry.has_credentials(key) {
            return Ok(None);
        }
        match (&self.hosts, &self.secrets) {
            (Some(hosts), Some(secrets)) => hosts
                .resolve(key.as_str(), secrets.as_ref())
                .map_err(|e| ConnectionError::Credentials(e.to_string())),
            _ => Ok(None),
        }
    }

    /// Close the session for `key` and forget its credentials
    pub async fn disconnect(&self, key: &SessionKey) {
        info!("[exec] Disconnecting {}", key);
        self.registry.close(key).await;
    }

    /// Snapshot of all sessions
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry.list()
    }

    /// Refuse new invocations and close every session
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("[exec] Shutdown already in progress");
            return;
        }
        info!("[exec] Shutting down, closing {} session(s)", self.registry.len());
        self.registry.close_all().await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

async fn next_chunk(stream: &mut Option<OutputStream>) -> Option<Bytes> {
    match stream {
        Some(stream) => stream.next_chunk().await,
        None => std::future::pending().await,
    }
}
