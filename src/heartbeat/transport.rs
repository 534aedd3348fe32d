//! Heartbeat transports.

use super::{HeartbeatTransport, TransportError};
use std::sync::{Arc, Mutex};

/// Transport that records requests and returns a scripted result. Clones share state.
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    requests: Arc<Mutex<Vec<(String, bool)>>>,
    result: Arc<Mutex<Result<u16, TransportError>>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            result: Arc::new(Mutex::new(Ok(200))),
        }
    }
}

impl RecordingTransport {
    /// Transport answering 200 to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Result returned for subsequent requests.
    pub fn respond_with(&self, result: Result<u16, TransportError>) {
        *self.result.lock().unwrap_or_else(|e| e.into_inner()) = result;
    }

    /// `(url, secure)` of every request so far.
    pub fn requests(&self) -> Vec<(String, bool)> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl HeartbeatTransport for RecordingTransport {
    fn get(&mut self, url: &str, secure: bool) -> Result<u16, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((url.to_string(), secure));
        self.result.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Blocking `reqwest` client for host builds.
#[cfg(not(target_os = "espidf"))]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

#[cfg(not(target_os = "espidf"))]
impl ReqwestTransport {
    /// Build a client with a per-request timeout.
    ///
    /// With `allow_insecure_https` the client accepts any server certificate.
    pub fn new(timeout_ms: u64, allow_insecure_https: bool) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .danger_accept_invalid_certs(allow_insecure_https)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[cfg(not(target_os = "espidf"))]
impl HeartbeatTransport for ReqwestTransport {
    fn get(&mut self, url: &str, _secure: bool) -> Result<u16, TransportError> {
        match self.client.get(url).send() {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) if e.is_timeout() => Err(TransportError::Timeout),
            Err(e) if e.is_connect() => Err(TransportError::Connect(e.to_string())),
            Err(e) => Err(TransportError::Request(e.to_string())),
        }
    }
}

/// ESP-IDF HTTP client.
///
/// A new connection is opened per request; plain and TLS endpoints need
/// differently configured connections anyway.
#[cfg(feature = "esp32")]
pub struct EspHttpTransport {
    timeout: std::time::Duration,
    allow_insecure_https: bool,
}

#[cfg(feature = "esp32")]
impl EspHttpTransport {
    pub fn new(timeout_ms: u64, allow_insecure_https: bool) -> Self {
        Self {
            timeout: std::time::Duration::from_millis(timeout_ms),
            allow_insecure_https,
        }
    }
}

#[cfg(feature = "esp32")]
impl HeartbeatTransport for EspHttpTransport {
    fn get(&mut self, url: &str, secure: bool) -> Result<u16, TransportError> {
        use embedded_svc::http::client::Client;
        use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

        // Insecure TLS relies on CONFIG_ESP_TLS_SKIP_SERVER_CERT_VERIFY in sdkconfig
        let verify = secure && !self.allow_insecure_https;
        let config = Configuration {
            timeout: Some(self.timeout),
            use_global_ca_store: false,
            crt_bundle_attach: if verify {
                Some(esp_idf_sys::esp_crt_bundle_attach)
            } else {
                None
            },
            ..Default::default()
        };

        let connection = EspHttpConnection::new(&config)
            .map_err(|e| TransportError::Connect(format!("{:?}", e)))?;
        let mut client = Client::wrap(connection);
        let request = client
            .get(url)
            .map_err(|e| TransportError::Request(format!("{:?}", e)))?;
        let response = request
            .submit()
            .map_err(|e| TransportError::Connect(format!("{:?}", e)))?;
        Ok(response.status())
    }
}
