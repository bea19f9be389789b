//! Session identity and credential types

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Registry lookup key for one remote session (host alias or `user@host:port`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl Borrow<str> for SessionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// How to authenticate against the remote host
#[derive(Clone)]
pub enum AuthMethod {
    /// Plain password
    Password(Zeroizing<String>),
    /// Private key read from disk
    KeyFile {
        path: PathBuf,
        passphrase: Option<Zeroizing<String>>,
    },
    /// Private key material held in memory (OpenSSH / PEM text)
    KeyData {
        pem: Zeroizing<String>,
        passphrase: Option<Zeroizing<String>>,
    },
    /// Identities offered by the running ssh-agent (`SSH_AUTH_SOCK`)
    Agent,
}

impl AuthMethod {
    /// Short method name for logs (never includes secret material)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::KeyFile { .. } => "key_file",
            Self::KeyData { .. } => "key_data",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("has_passphrase", &passphrase.is_some())
                .finish(),
            Self::KeyData { passphrase, .. } => f
                .debug_struct("KeyData")
                .field("pem", &"<redacted>")
                .field("has_passphrase", &passphrase.is_some())
                .finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

/// Everything needed to open a connection to one remote host.
///
/// Supplied once per session key on first use; the registry remembers it so a
/// broken session can be re-established without asking the caller again.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        auth: AuthMethod,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth,
        }
    }

    /// Credentials using password authentication
    pub fn with_password(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(
            host,
            port,
            username,
            AuthMethod::Password(Zeroizing::new(password.into())),
        )
    }

    /// Credentials using a private key file
    pub fn with_key_file(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        path: impl Into<PathBuf>,
        passphrase: Option<String>,
    ) -> Self {
        Self::new(
            host,
            port,
            username,
            AuthMethod::KeyFile {
                path: path.into(),
                passphrase: passphrase.map(Zeroizing::new),
            },
        )
    }

    /// Credentials using the local ssh-agent
    pub fn with_agent(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self::new(host, port, username, AuthMethod::Agent)
    }

    /// Display string (user@host or user@host:port)
    pub fn display_string(&self) -> String {
        if self.port == DEFAULT_SSH_PORT {
            format!("{}@{}", self.username, self.host)
        } else {
            format!("{}@{}:{}", self.username, self.host, self.port)
        }
    }

    /// Session key derived from the endpoint identity, for callers without an alias
    pub fn session_key(&self) -> SessionKey {
        SessionKey(self.display_string())
    }
}
