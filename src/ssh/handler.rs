//! Client handler: server host key verification against known_hosts

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use russh::client;
use russh::keys::known_hosts;
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use crate::config::HostKeyPolicy;

/// russh client handler for one connection attempt.
///
/// When the host key is rejected, the reason is left in `rejection` so the
/// connector can report something better than "unknown key".
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    /// Explicit known_hosts file; `None` means `~/.ssh/known_hosts`
    known_hosts: Option<PathBuf>,
    rejection: Arc<Mutex<Option<String>>>,
}

impl ClientHandler {
    pub fn new(host: &str, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.to_string(),
            port,
            policy,
            known_hosts: None,
            rejection: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    /// Shared slot that receives the host key rejection reason
    pub fn rejection(&self) -> Arc<Mutex<Option<String>>> {
        self.rejection.clone()
    }

    fn reject(&self, reason: String) -> bool {
        warn!("[ssh] {}", reason);
        *self.rejection.lock() = Some(reason);
        false
    }

    fn check(&self, key: &PublicKey) -> Result<bool, russh::keys::Error> {
        match &self.known_hosts {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, key, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, key),
        }
    }

    fn learn(&self, key: &PublicKey) -> Result<(), russh::keys::Error> {
        match &self.known_hosts {
            Some(path) => known_hosts::learn_known_hosts_path(&self.host, self.port, key, path),
            None => known_hosts::learn_known_hosts(&self.host, self.port, key),
        }
    }

    /// Apply the host key policy to `key`
    pub(crate) fn verify(&self, key: &PublicKey) -> bool {
        if self.policy == HostKeyPolicy::AcceptAny {
            debug!("[ssh] Host key check disabled for {}", self.host);
            return true;
        }

        match self.check(key) {
            Ok(true) => {
                debug!("[ssh] Host key for {}:{} matches known_hosts", self.host, self.port);
                true
            }
            Ok(false) if self.policy == HostKeyPolicy::Strict => self.reject(format!(
                "{}:{} is not in known_hosts",
                self.host, self.port
            )),
            Ok(false) => {
                info!(
                    "[ssh] Learning new host key for {}:{} ({})",
                    self.host,
                    self.port,
                    key.algorithm().as_str()
                );
                if let Err(e) = self.learn(key) {
                    warn!("[ssh] Failed to record host key for {}: {}", self.host, e);
                }
                true
            }
            Err(russh::keys::Error::KeyChanged { line }) => self.reject(format!(
                "host key for {}:{} changed (known_hosts line {})",
                self.host, self.port, line
            )),
            Err(e) => self.reject(format!("known_hosts lookup failed: {}", e)),
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(self.verify(server_public_key))
    }
}
