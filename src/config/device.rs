//! Device tunables.
//!
//! Defaults are the values the firmware ships with. The host binary can
//! override a subset from the environment, see [`DeviceConfig::from_env`].

use log::warn;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Hold time that triggers a factory reset.
pub const FACTORY_HOLD_MS: u64 = 30_000;

/// Join timeout while validating a portal submission.
pub const PROVISIONING_JOIN_TIMEOUT_MS: u64 = 20_000;

/// Join timeout for the boot-time connection with stored credentials.
pub const BOOT_JOIN_TIMEOUT_MS: u64 = 30_000;

/// Heartbeat period, measured from the previous firing.
pub const HEARTBEAT_INTERVAL_MS: u64 = 60_000;

/// Minimum spacing of reconnect attempts after the link dropped.
pub const RECONNECT_INTERVAL_MS: u64 = 10_000;

/// SSID of the setup access point.
pub const DEFAULT_AP_SSID: &str = "ESP32_Setup";

/// Default address of the setup access point.
pub const DEFAULT_AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// Default port for the captive DNS responder.
pub const DEFAULT_DNS_PORT: u16 = 53;

/// Default port for the portal HTTP server.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Access point configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    /// Advertised SSID.
    pub ssid: String,
    /// Empty for an open access point.
    pub password: String,
    /// Address the device answers on while serving the portal.
    pub address: Ipv4Addr,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: DEFAULT_AP_SSID.to_string(),
            password: String::new(),
            address: DEFAULT_AP_ADDRESS,
        }
    }
}

/// All device tunables in one place.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Continuous hold required for a factory reset.
    pub factory_hold_ms: u64,
    /// Join timeout while validating a submission.
    pub provisioning_join_timeout_ms: u64,
    /// Join timeout at boot.
    pub boot_join_timeout_ms: u64,
    /// Heartbeat period.
    pub heartbeat_interval_ms: u64,
    /// Minimum spacing of reconnect attempts while connected mode has no link.
    pub reconnect_interval_ms: u64,
    /// Per-request timeout for the heartbeat transport.
    pub heartbeat_timeout_ms: u64,
    /// Accept any certificate on `https` endpoints.
    pub allow_insecure_https: bool,
    /// Value of the `device=` query parameter.
    pub device_tag: String,
    /// Station hostname.
    pub hostname: String,
    /// Setup access point.
    pub access_point: AccessPointConfig,
    /// Portal HTTP port.
    pub http_port: u16,
    /// Captive DNS port; `None` disables the responder.
    pub dns_port: Option<u16>,
    /// How long a network scan is reused for page renders.
    pub scan_cache_ms: u64,
    /// Delay between the success page and the restart.
    pub restart_grace_ms: u64,
    /// Scheduler sleep between ticks.
    pub tick_ms: u64,
    /// Credential file (host builds only).
    pub store_path: Option<PathBuf>,
    /// Report the reset button as held (host builds only).
    pub simulate_reset_hold: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            factory_hold_ms: FACTORY_HOLD_MS,
            provisioning_join_timeout_ms: PROVISIONING_JOIN_TIMEOUT_MS,
            boot_join_timeout_ms: BOOT_JOIN_TIMEOUT_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            reconnect_interval_ms: RECONNECT_INTERVAL_MS,
            heartbeat_timeout_ms: 10_000,
            allow_insecure_https: true,
            device_tag: "ESP32".to_string(),
            hostname: "esp32-device".to_string(),
            access_point: AccessPointConfig::default(),
            http_port: DEFAULT_HTTP_PORT,
            dns_port: Some(DEFAULT_DNS_PORT),
            scan_cache_ms: 10_000,
            restart_grace_ms: 800,
            tick_ms: 10,
            store_path: None,
            simulate_reset_hold: false,
        }
    }
}

impl DeviceConfig {
    /// Build a configuration from `ONBOARD_*` environment variables on top of `base`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env(base: Self) -> Self {
        Self::from_lookup(base, |key| std::env::var(key).ok())
    }

    /// Same as [`DeviceConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(mut base: Self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(port) = parse_var(&lookup, "ONBOARD_HTTP_PORT") {
            base.http_port = port;
        }
        if let Some(raw) = lookup("ONBOARD_DNS_PORT") {
            if raw == "off" {
                base.dns_port = None;
            } else if let Some(port) = parse_value::<u16>("ONBOARD_DNS_PORT", &raw) {
                base.dns_port = Some(port);
            }
        }
        if let Some(addr) = parse_var(&lookup, "ONBOARD_AP_ADDRESS") {
            base.access_point.address = addr;
        }
        if let Some(ms) = parse_var(&lookup, "ONBOARD_HEARTBEAT_MS") {
            base.heartbeat_interval_ms = ms;
        }
        if let Some(path) = lookup("ONBOARD_STORE_PATH") {
            base.store_path = Some(PathBuf::from(path));
        }
        if let Some(flag) = parse_var::<u8>(&lookup, "ONBOARD_FACTORY_RESET") {
            base.simulate_reset_hold = flag != 0;
        }
        base
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    lookup(key).and_then(|raw| parse_value(key, &raw))
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}
