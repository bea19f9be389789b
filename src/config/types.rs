//! Configuration Types
//!
//! Executor settings and saved hosts, with version support for migrations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::keychain::{KeychainError, SecretStore};
use crate::session::{AuthMethod, Credentials, DEFAULT_SSH_PORT};

/// Current configuration version
pub const CONFIG_VERSION: u32 = 1;

/// What to do with a server host key during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Only hosts already present in known_hosts are accepted
    Strict,
    /// Unknown hosts are learned into known_hosts, changed keys are rejected
    #[default]
    AcceptNew,
    /// No verification
    AcceptAny,
}

/// Executor and transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Timeout for one invocation when the caller supplies none
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Timeout for handshake + authentication
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// SSH keepalive interval in seconds (0 = disabled)
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Per-stream output cap in bytes (0 = unlimited)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            max_output_bytes: default_max_output_bytes(),
            host_key_policy: HostKeyPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }
}

/// Authentication method for saved hosts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SavedAuth {
    /// Password stored in system keychain
    Password {
        /// Keychain entry ID
        keychain_id: String,
    },
    /// SSH key file
    Key {
        /// Path to private key file
        key_path: String,
        /// Keychain entry ID for passphrase (if any)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase_keychain_id: Option<String>,
    },
    /// Use SSH agent
    Agent,
}

/// A saved host, addressable by alias
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedHost {
    /// Session key callers use for this host
    pub alias: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    pub auth: SavedAuth,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl SavedHost {
    /// Build connection credentials, fetching secrets from `secrets`
    pub fn credentials(&self, secrets: &dyn SecretStore) -> Result<Credentials, KeychainError> {
        let auth = match &self.auth {
            SavedAuth::Password { keychain_id } => AuthMethod::Password(secrets.get(keychain_id)?),
            SavedAuth::Key {
                key_path,
                passphrase_keychain_id,
            } => AuthMethod::KeyFile {
                path: key_path.into(),
                passphrase: passphrase_keychain_id
                    .as_deref()
                    .map(|id| secrets.get(id))
                    .transpose()?,
            },
            SavedAuth::Agent => AuthMethod::Agent,
        };
        Ok(Credentials::new(&self.host, self.port, &self.username, auth))
    }
}

/// Root configuration file structure (`hosts.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsFile {
    pub version: u32,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub hosts: Vec<SavedHost>,
}

impl Default for HostsFile {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            executor: ExecutorConfig::default(),
            hosts: Vec::new(),
        }
    }
}

impl HostsFile {
    /// Add a host, replacing any existing host with the same alias
    pub fn add_host(&mut self, host: SavedHost) {
        self.hosts.retain(|h| h.alias != host.alias);
        self.hosts.push(host);
    }

    pub fn remove_host(&mut self, alias: &str) -> Option<SavedHost> {
        let pos = self.hosts.iter().position(|h| h.alias == alias)?;
        Some(self.hosts.remove(pos))
    }

    pub fn get_host(&self, alias: &str) -> Option<&SavedHost> {
        self.hosts.iter().find(|h| h.alias == alias)
    }

    /// Credentials for `alias`, or `None` if no such host is saved
    pub fn resolve(
        &self,
        alias: &str,
        secrets: &dyn SecretStore,
    ) -> Result<Option<Credentials>, KeychainError> {
        self.get_host(alias)
            .map(|host| host.credentials(secrets))
            .transpose()
    }
}
