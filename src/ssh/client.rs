//! SSH connector and transport handle built on russh

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::Disconnect;
use tracing::{debug, info, warn};

use super::auth;
use super::channel::SshExecChannel;
use super::handler::ClientHandler;
use crate::config::{ExecutorConfig, HostKeyPolicy};
use crate::session::Credentials;
use crate::transport::{ChannelError, ConnectionError, Connector, RawChannel, TransportHandle};

/// Missed keepalive replies before the connection counts as dead
const KEEPALIVE_MAX: usize = 3;

/// Opens real SSH connections
pub struct SshConnector {
    config: Arc<client::Config>,
    host_key_policy: HostKeyPolicy,
}

impl SshConnector {
    pub fn new(config: &ExecutorConfig) -> Self {
        let ssh_config = client::Config {
            keepalive_interval: config.keepalive_interval(),
            keepalive_max: KEEPALIVE_MAX,
            // Idle sessions are kept alive by keepalives, never timed out
            inactivity_timeout: None,
            ..Default::default()
        };
        Self {
            config: Arc::new(ssh_config),
            host_key_policy: config.host_key_policy,
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn TransportHandle>, ConnectionError> {
        let host = credentials.host.as_str();
        let port = credentials.port;
        debug!("[ssh] Connecting to {}:{}", host, port);

        let handler = ClientHandler::new(host, port, self.host_key_policy);
        let rejection = handler.rejection();

        let mut handle = client::connect(self.config.clone(), (host, port), handler)
            .await
            .map_err(|e| match e {
                russh::Error::IO(io) => ConnectionError::Unreachable(io.to_string()),
                russh::Error::UnknownKey => ConnectionError::HostKey(
                    rejection
                        .lock()
                        .take()
                        .unwrap_or_else(|| "server key rejected".to_string()),
                ),
                other => ConnectionError::Handshake(other.to_string()),
            })?;

        if let Err(e) = auth::authenticate(&mut handle, credentials).await {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(e);
        }

        info!("[ssh] Connected to {}", credentials.display_string());
        Ok(Arc::new(SshTransport {
            target: credentials.display_string(),
            handle,
        }))
    }
}

/// One authenticated SSH connection
pub struct SshTransport {
    target: String,
    handle: Handle<ClientHandler>,
}

#[async_trait]
impl TransportHandle for SshTransport {
    async fn open_exec(&self, command: &str) -> Result<Box<dyn RawChannel>, ChannelError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ChannelError::OpenRejected(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ChannelError::Exec(e.to_string()))?;
        debug!("[ssh] Exec requested on {}", self.target);
        Ok(Box::new(SshExecChannel::new(channel)))
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn close(&self) {
        if self.handle.is_closed() {
            return;
        }
        match self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            Ok(()) => info!("[ssh] Disconnected from {}", self.target),
            Err(e) => warn!("[ssh] Disconnect from {} failed: {}", self.target, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_keepalive_follows_config() {
        let mut config = ExecutorConfig::default();
        let connector = SshConnector::new(&config);
        assert_eq!(connector.config.keepalive_interval, Some(Duration::from_secs(30)));
        assert_eq!(connector.config.keepalive_max, KEEPALIVE_MAX);

        config.keepalive_interval_secs = 0;
        assert_eq!(SshConnector::new(&config).config.keepalive_interval, None);
    }

    #[tokio::test]
    async fn test_refused_port_is_unreachable() {
        // Grab a free port, then close it so nothing listens there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = SshConnector::new(&ExecutorConfig::default());
        let creds = Credentials::with_password("127.0.0.1", port, "user", "pw");
        let err = connector.connect(&creds).await.err().unwrap();
        assert!(matches!(err, ConnectionError::Unreachable(_)), "{:?}", err);
    }
}
