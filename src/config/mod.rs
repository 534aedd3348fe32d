//! Device configuration.
//!
//! # Components
//!
//! - [`credentials`] - the persisted credential record (host-testable)
//! - [`device`] - timeouts, access point settings and ports

mod credentials;
mod device;

pub use credentials::{
    ConfigError, Credentials, MAX_ENDPOINT_LEN, MAX_PASSWORD_LEN, MAX_RECORD_LEN, MAX_SSID_LEN,
};
pub use device::{
    AccessPointConfig, DeviceConfig, BOOT_JOIN_TIMEOUT_MS, DEFAULT_AP_ADDRESS, DEFAULT_AP_SSID,
    DEFAULT_DNS_PORT, DEFAULT_HTTP_PORT, FACTORY_HOLD_MS, HEARTBEAT_INTERVAL_MS,
    PROVISIONING_JOIN_TIMEOUT_MS, RECONNECT_INTERVAL_MS,
};
