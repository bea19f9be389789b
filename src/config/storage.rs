//! Config file storage
//!
//! `hosts.json` lives in `<config_dir>/nbrshell/`. Writes go to a temp file
//! that is renamed into place, so a crash never leaves a half-written file.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::{HostsFile, CONFIG_VERSION};

const CONFIG_DIR_NAME: &str = "nbrshell";
const HOSTS_FILE_NAME: &str = "hosts.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not determine the user config directory")]
    NoConfigDir,

    #[error("Version mismatch: found {found}, expected at most {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// `<config_dir>/nbrshell`
pub fn config_dir() -> Result<PathBuf, StorageError> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .ok_or(StorageError::NoConfigDir)
}

/// Default location of `hosts.json`
pub fn hosts_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join(HOSTS_FILE_NAME))
}

/// Reads and writes one `hosts.json`
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage at the default location
    pub fn default_location() -> Result<Self, StorageError> {
        Ok(Self::new(hosts_file()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file, or defaults if it does not exist yet
    pub fn load(&self) -> Result<HostsFile, StorageError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {:?}, using defaults", self.path);
                return Ok(HostsFile::default());
            }
            Err(e) => return Err(e.into()),
        };

        let file: HostsFile = serde_json::from_str(&data)?;
        if file.version > CONFIG_VERSION {
            return Err(StorageError::VersionMismatch {
                found: file.version,
                expected: CONFIG_VERSION,
            });
        }
        info!("Loaded {} saved host(s) from {:?}", file.hosts.len(), self.path);
        Ok(file)
    }

    pub fn save(&self, file: &HostsFile) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(file)?)?;

        // Owner read/write only: the file names keychain entries and key paths
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600)) {
                warn!("Failed to set restrictive permissions on config file: {}", e);
            }
        }

        fs::rename(&tmp_path, &self.path)?;
        debug!("Saved config to {:?}", self.path);
        Ok(())
    }
}
