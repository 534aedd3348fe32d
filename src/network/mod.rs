//! Network abstraction layer.
//!
//! This module provides a platform-independent radio interface that works on:
//! - **ESP32** (`esp32` feature): the Wi-Fi driver, station and access point
//! - **Host**: native OS networking, joins resolve immediately
//! - **Tests**: a scripted simulation with join latency per network
//!
//! Joins are non-blocking: [`NetworkProvider::begin_join`] starts one and
//! [`NetworkProvider::join_status`] is polled until it reports
//! [`JoinStatus::Connected`]. The deadline lives in [`JoinAttempt`].

use crate::config::{AccessPointConfig, Credentials};
use std::net::Ipv4Addr;

mod join;
#[cfg(not(target_os = "espidf"))]
mod host;
mod sim;
#[cfg(feature = "esp32")]
mod wifi;

pub use join::{JoinAttempt, JoinPoll};
#[cfg(not(target_os = "espidf"))]
pub use host::HostNetwork;
pub use sim::{SimNetwork, SimState};
#[cfg(feature = "esp32")]
pub use wifi::WifiNetwork;

/// State of the station-side join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    /// No join has been started, or it was aborted.
    Idle,
    /// A join is in progress.
    Connecting,
    /// Associated and an address was obtained.
    Connected,
}

/// One network seen by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Network name.
    pub ssid: String,
    /// Signal strength in dBm.
    pub rssi: i8,
}

/// Radio driver abstraction.
///
/// Abstracts over the platform Wi-Fi driver so the provisioning state machine
/// runs unchanged on ESP32, on a host and in tests.
pub trait NetworkProvider {
    /// Start joining the network described by `credentials`.
    ///
    /// Returns without waiting for the result.
    fn begin_join(&mut self, credentials: &Credentials) -> Result<(), NetworkError>;

    /// Progress of the join started by `begin_join`.
    fn join_status(&mut self) -> JoinStatus;

    /// Rejoin the network of the last completed join after the link dropped.
    ///
    /// Returns without waiting. Does nothing while connected or joining.
    fn reconnect(&mut self) -> Result<(), NetworkError>;

    /// Drop the station side after a failed join. The access point, if any, stays up.
    fn abort_join(&mut self);

    /// Bring up the setup access point and return its address.
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<Ipv4Addr, NetworkError>;

    /// Scan for nearby networks.
    fn scan(&mut self) -> Result<Vec<ScanEntry>, NetworkError>;

    /// Check if the station is connected.
    fn is_connected(&self) -> bool;

    /// Station address. `None` if not connected.
    fn ip_addr(&self) -> Option<Ipv4Addr>;

    /// Signal strength of the current connection in dBm.
    fn rssi(&self) -> Option<i8>;
}

/// Network errors.
#[derive(Debug)]
pub enum NetworkError {
    /// A join is already running; only one attempt may exist at a time.
    JoinInProgress,
    /// No network has been joined yet, so there is nothing to reconnect to.
    NotConfigured,
    /// SSID is invalid (too long or contains invalid characters).
    InvalidSsid,
    /// Password is invalid.
    InvalidPassword,
    /// Generic I/O error.
    Io(std::io::Error),
    /// ESP-IDF error.
    #[cfg(feature = "esp32")]
    Esp(esp_idf_sys::EspError),
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::JoinInProgress => write!(f, "a join attempt is already in progress"),
            Self::NotConfigured => write!(f, "no network joined yet"),
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            #[cfg(feature = "esp32")]
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for NetworkError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Esp(e)
    }
}
