//! Credential persistence for host (development) builds.
//!
//! Stores the record as JSON so it persists across runs.
//! Uses `~/.esp32-onboarding/credentials.json` by default.
//!
//! Writes go to a sibling temp file which is then renamed over the record, so
//! a concurrent `load` sees either the old or the new record, never a mix.

use super::{CredentialStore, StoreError};
use crate::config::Credentials;
use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default credential file path.
///
/// Returns `~/.esp32-onboarding/credentials.json`
pub fn default_store_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home)
        .join(".esp32-onboarding")
        .join("credentials.json"))
}

/// JSON file credential store.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Use the record at `path`. The file does not need to exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use the record at [`default_store_path`].
    pub fn open_default() -> io::Result<Self> {
        Ok(Self::new(default_store_path()?))
    }

    /// Path of the record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Credentials {
        let text = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No credential file found at {:?}", self.path);
                return Credentials::default();
            }
            Err(e) => {
                log::warn!("Failed to read credential file: {}", e);
                return Credentials::default();
            }
        };

        match serde_json::from_str(&text) {
            Ok(creds) => creds,
            Err(e) => {
                log::error!("Failed to parse stored credentials: {}", e);
                Credentials::default()
            }
        }
    }

    fn save(&mut self, credentials: &Credentials) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json =
            serde_json::to_string_pretty(credentials).map_err(|e| StoreError::Format(e.to_string()))?;
        let temp = self.temp_path();
        fs::write(&temp, &json)?;
        fs::rename(&temp, &self.path)?;

        // Verify write by reading back
        let read_back = fs::read_to_string(&self.path)?;
        if read_back != json {
            return Err(StoreError::VerificationFailed);
        }

        info!("Credentials saved to {:?}", self.path);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        log::warn!("Credentials cleared from {:?}", self.path);
        Ok(())
    }
}
