//! Configuration Management Module
//!
//! Executor settings, saved hosts (`hosts.json`), and secure credential
//! storage via the system keychain.
//!
//! Credential storage:
//! - SSH passwords & passphrases: `nbrshell.ssh` keychain service
//! - `hosts.json` holds only keychain entry IDs, never secrets

pub mod keychain;
pub mod storage;
pub mod types;

pub use keychain::{Keychain, KeychainError, SecretStore, KEYCHAIN_SERVICE};
pub use storage::{config_dir, hosts_file, ConfigStorage, StorageError};
pub use types::{ExecutorConfig, HostKeyPolicy, HostsFile, SavedAuth, SavedHost, CONFIG_VERSION};
