//! ESP32 Wi-Fi network provider.
//!
//! Wraps the non-blocking ESP-IDF driver. While the setup access point is up
//! the driver runs in mixed mode, so a submitted network can be tried without
//! taking the portal down.

use super::{JoinStatus, NetworkError, NetworkProvider, ScanEntry};
use crate::config::{AccessPointConfig, Credentials};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use log::{info, warn};
use std::net::Ipv4Addr;

/// Wi-Fi network provider for ESP32.
pub struct WifiNetwork<'a> {
    wifi: EspWifi<'a>,
    access_point: Option<AccessPointConfiguration>,
    joining: bool,
    joined: bool,
}

impl<'a> WifiNetwork<'a> {
    /// Create the driver and set the station hostname.
    ///
    /// # Errors
    ///
    /// Returns an error if Wi-Fi initialization fails.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        hostname: &str,
    ) -> Result<Self, NetworkError> {
        let mut wifi = EspWifi::new(modem, sysloop, nvs)?;
        if let Err(e) = wifi.sta_netif_mut().set_hostname(hostname) {
            warn!("Failed to set hostname '{}': {:?}", hostname, e);
        }

        Ok(Self {
            wifi,
            access_point: None,
            joining: false,
            joined: false,
        })
    }

    fn client_configuration(credentials: &Credentials) -> Result<ClientConfiguration, NetworkError> {
        let auth_method = if credentials.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        Ok(ClientConfiguration {
            ssid: credentials
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| NetworkError::InvalidSsid)?,
            password: credentials
                .password
                .as_str()
                .try_into()
                .map_err(|_| NetworkError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        })
    }

    fn ensure_started(&mut self) -> Result<(), NetworkError> {
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }
}

impl NetworkProvider for WifiNetwork<'_> {
    fn begin_join(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
        if self.joining {
            return Err(NetworkError::JoinInProgress);
        }

        let client = Self::client_configuration(credentials)?;
        let configuration = match &self.access_point {
            Some(ap) => Configuration::Mixed(client, ap.clone()),
            None => Configuration::Client(client),
        };

        info!("Connecting to WiFi: {}", credentials.ssid);
        if self.wifi.is_connected().unwrap_or(false) {
            self.wifi.disconnect()?;
        }
        self.wifi.set_configuration(&configuration)?;
        self.ensure_started()?;
        self.wifi.connect()?;
        self.joining = true;
        Ok(())
    }

    fn join_status(&mut self) -> JoinStatus {
        if self.wifi.is_up().unwrap_or(false) {
            self.joining = false;
            self.joined = true;
            JoinStatus::Connected
        } else if self.joining {
            JoinStatus::Connecting
        } else {
            JoinStatus::Idle
        }
    }

    fn reconnect(&mut self) -> Result<(), NetworkError> {
        if !self.joined {
            return Err(NetworkError::NotConfigured);
        }
        if self.joining || self.wifi.is_connected()? {
            return Ok(());
        }
        // The driver keeps the client configuration; it does not rejoin by itself
        info!("Reconnecting to WiFi");
        self.wifi.connect()?;
        Ok(())
    }

    fn abort_join(&mut self) {
        self.joining = false;
        if let Err(e) = self.wifi.disconnect() {
            warn!("Failed to stop station join: {:?}", e);
        }
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<Ipv4Addr, NetworkError> {
        let auth_method = if config.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let ap = AccessPointConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| NetworkError::InvalidSsid)?,
            password: config
                .password
                .as_str()
                .try_into()
                .map_err(|_| NetworkError::InvalidPassword)?,
            auth_method,
            channel: 1,
            ..Default::default()
        };

        self.wifi
            .set_configuration(&Configuration::Mixed(ClientConfiguration::default(), ap.clone()))?;
        self.ensure_started()?;
        self.access_point = Some(ap);

        let address = self.wifi.ap_netif().get_ip_info()?.ip;
        if address != config.address {
            warn!(
                "Access point is on {} (configured {})",
                address, config.address
            );
        }
        info!("Access point '{}' up on {}", config.ssid, address);
        Ok(address)
    }

    fn scan(&mut self) -> Result<Vec<ScanEntry>, NetworkError> {
        let found = self.wifi.scan()?;
        Ok(found
            .into_iter()
            .filter(|ap| !ap.ssid.is_empty())
            .map(|ap| ScanEntry {
                ssid: ap.ssid.to_string(),
                rssi: ap.signal_strength,
            })
            .collect())
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn ip_addr(&self) -> Option<Ipv4Addr> {
        if !self.is_connected() {
            return None;
        }
        self.wifi.sta_netif().get_ip_info().ok().map(|info| info.ip)
    }

    fn rssi(&self) -> Option<i8> {
        if !self.is_connected() {
            return None;
        }
        let mut info = esp_idf_sys::wifi_ap_record_t::default();
        // SAFETY: `info` is a valid out-pointer for the duration of the call
        let err = unsafe { esp_idf_sys::esp_wifi_sta_get_ap_info(&mut info) };
        if err == esp_idf_sys::ESP_OK {
            Some(info.rssi)
        } else {
            None
        }
    }
}
