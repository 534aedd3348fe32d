//! Periodic status report while connected.
//!
//! The scheduler fires once per interval, measured from the previous
//! firing. Each firing sends at most one GET to the stored endpoint with the
//! device address, signal strength and uptime appended. Nothing is retried;
//! a failed request is logged and the next firing happens on schedule.
//!
//! Any HTTP status, including 4xx/5xx, counts as [`HeartbeatOutcome::Dispatched`].
//! Only a request that produced no response at all is [`HeartbeatOutcome::Failed`].

mod transport;

#[cfg(feature = "esp32")]
pub use transport::EspHttpTransport;
#[cfg(not(target_os = "espidf"))]
pub use transport::ReqwestTransport;
pub use transport::RecordingTransport;

use crate::network::NetworkProvider;
use log::{info, warn};
use std::net::Ipv4Addr;

/// Endpoint scheme, which selects the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    /// TLS; certificate validation may be disabled, see `allow_insecure_https`.
    Https,
}

impl Scheme {
    /// Scheme of `url`, case-insensitive.
    pub fn of(url: &str) -> Option<Self> {
        let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
        if lower.starts_with("https://") {
            Some(Self::Https)
        } else if lower.starts_with("http://") {
            Some(Self::Http)
        } else {
            None
        }
    }
}

/// Values reported with each heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    pub ip: Ipv4Addr,
    pub rssi: i8,
    pub uptime_ms: u64,
}

/// Append the telemetry query to `endpoint`.
///
/// ```
/// use esp32_onboarding::heartbeat::{build_url, Telemetry};
/// use std::net::Ipv4Addr;
///
/// let t = Telemetry { ip: Ipv4Addr::new(10, 0, 0, 5), rssi: -42, uptime_ms: 123456 };
/// assert_eq!(
///     build_url("https://x/hb", "ESP32", &t),
///     "https://x/hb?device=ESP32&ip=10.0.0.5&rssi=-42&uptime_ms=123456"
/// );
/// ```
pub fn build_url(endpoint: &str, device_tag: &str, telemetry: &Telemetry) -> String {
    // The query goes before any fragment, which is never sent to the server
    let (base, fragment) = match endpoint.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (endpoint, None),
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{}device={}&ip={}&rssi={}&uptime_ms={}",
        base,
        separator,
        urlencoding::encode(device_tag),
        urlencoding::encode(&telemetry.ip.to_string()),
        telemetry.rssi,
        telemetry.uptime_ms
    );
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    url
}

/// Why a firing sent nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No endpoint stored.
    NoEndpoint,
    /// The station is not connected.
    NotConnected,
}

/// Transport failures: no HTTP response was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint scheme is neither http nor https.
    Unsupported(String),
    /// Could not connect (DNS, TCP or TLS).
    Connect(String),
    /// No response within the request timeout.
    Timeout,
    /// Any other failure building or sending the request.
    Request(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsupported(url) => write!(f, "unsupported scheme in '{}'", url),
            Self::Connect(e) => write!(f, "connect failed: {}", e),
            Self::Timeout => write!(f, "timed out"),
            Self::Request(e) => write!(f, "request failed: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outbound HTTP for heartbeats.
pub trait HeartbeatTransport {
    /// Send one GET and return the status code.
    ///
    /// `secure` is true for https endpoints.
    fn get(&mut self, url: &str, secure: bool) -> Result<u16, TransportError>;
}

/// Result of one firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Skipped(SkipReason),
    /// Some response was received, whatever its status.
    Dispatched(u16),
    Failed(TransportError),
}

/// Fixed-period timer measured from the previous firing.
#[derive(Debug, Clone)]
pub struct HeartbeatScheduler {
    interval_ms: u64,
    last_fired_ms: u64,
}

impl HeartbeatScheduler {
    /// Start the timer at `now_ms`; the first firing is one interval later.
    pub fn new(interval_ms: u64, now_ms: u64) -> Self {
        Self {
            interval_ms,
            last_fired_ms: now_ms,
        }
    }

    /// When the timer last fired (or was started).
    pub fn last_fired_ms(&self) -> u64 {
        self.last_fired_ms
    }

    /// True if a firing is due at `now_ms`. Does not change state.
    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_fired_ms) >= self.interval_ms
    }

    /// Fire if due. The timer advances before anything is sent, so the
    /// cadence does not depend on how the request went.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if !self.is_due(now_ms) {
            return false;
        }
        self.last_fired_ms = now_ms;
        true
    }
}

/// Send one heartbeat for `endpoint` and log the outcome.
pub fn dispatch<N, T>(
    endpoint: &str,
    device_tag: &str,
    uptime_ms: u64,
    network: &N,
    transport: &mut T,
) -> HeartbeatOutcome
where
    N: NetworkProvider + ?Sized,
    T: HeartbeatTransport + ?Sized,
{
    if endpoint.is_empty() {
        return HeartbeatOutcome::Skipped(SkipReason::NoEndpoint);
    }
    let ip = match network.ip_addr() {
        Some(ip) if network.is_connected() => ip,
        _ => return HeartbeatOutcome::Skipped(SkipReason::NotConnected),
    };
    let telemetry = Telemetry {
        ip,
        rssi: network.rssi().unwrap_or(0),
        uptime_ms,
    };

    let url = build_url(endpoint, device_tag, &telemetry);
    let result = match Scheme::of(endpoint) {
        Some(scheme) => transport.get(&url, scheme == Scheme::Https),
        None => Err(TransportError::Unsupported(endpoint.to_string())),
    };

    match result {
        Ok(status) => {
            info!("GET {} -> {}", url, status);
            HeartbeatOutcome::Dispatched(status)
        }
        Err(e) => {
            warn!("heartbeat request failed: {}", e);
            HeartbeatOutcome::Failed(e)
        }
    }
}
