//! NVS persistence for credentials.
//!
//! The record is stored as a single raw blob, so NVS commits it atomically:
//! a reader sees either the previous record or the new one.

use super::{CredentialStore, StoreError};
use crate::config::{Credentials, MAX_RECORD_LEN};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use log::{info, warn};

/// NVS namespace for the credential record.
pub const NVS_NAMESPACE: &str = "net";

/// NVS key for the credential record.
pub const NVS_KEY: &str = "record";

/// NVS-backed credential store.
pub struct NvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsStore {
    /// Open the credential namespace on the default NVS partition.
    pub fn new(partition: EspNvsPartition<NvsDefault>) -> Result<Self, StoreError> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self { nvs })
    }
}

impl CredentialStore for NvsStore {
    fn load(&self) -> Credentials {
        let mut buf = [0u8; MAX_RECORD_LEN];
        match self.nvs.get_raw(NVS_KEY, &mut buf) {
            Ok(Some(bytes)) => Credentials::from_bytes(bytes),
            Ok(None) => {
                log::debug!("No credentials found in NVS");
                Credentials::default()
            }
            Err(e) => {
                warn!("Failed to read credentials from NVS: {:?}", e);
                Credentials::default()
            }
        }
    }

    /// Save with read-back verification to catch silent flash write failures.
    fn save(&mut self, credentials: &Credentials) -> Result<(), StoreError> {
        let bytes = credentials.to_bytes();
        if bytes.len() > MAX_RECORD_LEN {
            return Err(StoreError::Format(format!(
                "record is {} bytes (max {})",
                bytes.len(),
                MAX_RECORD_LEN
            )));
        }
        self.nvs.set_raw(NVS_KEY, &bytes)?;

        let mut verify_buf = [0u8; MAX_RECORD_LEN];
        let read_back = self.nvs.get_raw(NVS_KEY, &mut verify_buf)?;
        if read_back != Some(bytes.as_slice()) {
            log::error!("Credential verification failed - data mismatch after save");
            return Err(StoreError::VerificationFailed);
        }

        info!("Credentials saved and verified in NVS");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.nvs.remove(NVS_KEY)?;
        warn!("Credentials cleared from NVS");
        Ok(())
    }
}
