//! Secure credential storage via the system keychain
//!
//! SSH passwords and key passphrases live under the `nbrshell.ssh` service;
//! `hosts.json` only stores the entry IDs.

use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Keychain service name for SSH secrets
pub const KEYCHAIN_SERVICE: &str = "nbrshell.ssh";

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("Keychain entry not found: {0}")]
    NotFound(String),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Lookup of secrets by entry ID
pub trait SecretStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Zeroizing<String>, KeychainError>;
}

/// System keychain (macOS Keychain, Windows Credential Manager, Secret Service)
#[derive(Debug, Clone)]
pub struct Keychain {
    service: String,
}

impl Default for Keychain {
    fn default() -> Self {
        Self::new()
    }
}

impl Keychain {
    pub fn new() -> Self {
        Self::with_service(KEYCHAIN_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn store(&self, id: &str, secret: &str) -> Result<(), KeychainError> {
        keyring::Entry::new(&self.service, id)?.set_password(secret)?;
        debug!("Stored keychain entry {}/{}", self.service, id);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), KeychainError> {
        match keyring::Entry::new(&self.service, id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl SecretStore for Keychain {
    fn get(&self, id: &str) -> Result<Zeroizing<String>, KeychainError> {
        match keyring::Entry::new(&self.service, id)?.get_password() {
            Ok(secret) => Ok(Zeroizing::new(secret)),
            Err(keyring::Error::NoEntry) => Err(KeychainError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory secrets for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemorySecrets(std::collections::HashMap<String, String>);

#[cfg(test)]
impl<const N: usize> From<[(&str, &str); N]> for MemorySecrets {
    fn from(entries: [(&str, &str); N]) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(id, secret)| (id.to_string(), secret.to_string()))
                .collect(),
        )
    }
}

#[cfg(test)]
impl SecretStore for MemorySecrets {
    fn get(&self, id: &str) -> Result<Zeroizing<String>, KeychainError> {
        self.0
            .get(id)
            .map(|secret| Zeroizing::new(secret.clone()))
            .ok_or_else(|| KeychainError::NotFound(id.to_string()))
    }
}
