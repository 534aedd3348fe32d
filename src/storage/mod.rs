//! Credential persistence.
//!
//! One durable record holds the three credential fields and is always written
//! and cleared as a unit.
//!
//! # Components
//!
//! - [`MemoryStore`] - in-memory record for tests and simulations
//! - [`FileStore`] - JSON file for host builds
//! - [`NvsStore`] - NVS blob for ESP32 builds
//!
//! Only the provisioning path (after a proven join) and the factory reset
//! write to the store; everything else reads.

use crate::config::Credentials;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(not(target_os = "espidf"))]
mod file;
#[cfg(feature = "esp32")]
mod nvs;

#[cfg(not(target_os = "espidf"))]
pub use file::{default_store_path, FileStore};
#[cfg(feature = "esp32")]
pub use nvs::{NvsStore, NVS_KEY, NVS_NAMESPACE};

/// Durable storage for the credential record.
pub trait CredentialStore {
    /// Load the record. Missing or unreadable fields come back empty.
    fn load(&self) -> Credentials;

    /// Replace the stored record.
    fn save(&mut self, credentials: &Credentials) -> Result<(), StoreError>;

    /// Remove the stored record.
    fn clear(&mut self) -> Result<(), StoreError>;
}

/// In-memory credential store.
///
/// Clones share the same record, so a test can keep a handle while the
/// device owns another, and a "restart" can reuse it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    record: Arc<Mutex<Credentials>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<Mutex<usize>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `credentials`.
    pub fn with(credentials: Credentials) -> Self {
        let store = Self::default();
        *store.lock_record() = credentials;
        store
    }

    /// Make subsequent `save`/`clear` calls fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `save`/`clear` calls.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_record(&self) -> std::sync::MutexGuard<'_, Credentials> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&mut self, credentials: Credentials) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        *self.lock_record() = credentials;
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Credentials {
        self.lock_record().clone()
    }

    fn save(&mut self, credentials: &Credentials) -> Result<(), StoreError> {
        self.write(credentials.clone())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.write(Credentials::default())
    }
}

/// Credential store errors.
#[derive(Debug)]
pub enum StoreError {
    /// Filesystem or generic I/O error.
    Io(std::io::Error),
    /// Stored data could not be encoded or decoded.
    Format(String),
    /// Read-back after a write did not match what was written.
    VerificationFailed,
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Format(msg) => write!(f, "invalid record: {}", msg),
            Self::VerificationFailed => write!(f, "read-back verification failed"),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for StoreError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}
