//! Provisioning credentials.
//!
//! Platform-independent record holding the network name, network secret and
//! report endpoint. The same type is used by every credential store, by the
//! portal submission path and by the heartbeat.
//!
//! # Example
//!
//! ```
//! use esp32_onboarding::config::Credentials;
//!
//! let creds = Credentials::new("Home", "secret123", "https://x/hb");
//! assert!(creds.is_provisioned());
//! assert!(creds.validate().is_ok());
//!
//! let restored = Credentials::from_bytes(&creds.to_bytes());
//! assert_eq!(creds, restored);
//! ```

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Maximum endpoint URL length accepted from the portal.
pub const MAX_ENDPOINT_LEN: usize = 256;

/// Upper bound of an encoded record.
/// Format: [ssid_len:1][ssid:32][password_len:1][password:64][endpoint_len:2][endpoint:256].
pub const MAX_RECORD_LEN: usize = 1 + MAX_SSID_LEN + 1 + MAX_PASSWORD_LEN + 2 + MAX_ENDPOINT_LEN;

/// Network credentials plus the heartbeat endpoint.
///
/// Absent fields are empty strings. The record counts as provisioned only when
/// both `ssid` and `endpoint` are non-empty.
#[derive(Clone, PartialEq, Eq, Default, Zeroize, ZeroizeOnDrop)]
#[cfg_attr(
    not(target_os = "espidf"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Credentials {
    /// Network SSID.
    #[cfg_attr(not(target_os = "espidf"), serde(default))]
    pub ssid: String,
    /// Network password (empty for open networks).
    #[cfg_attr(not(target_os = "espidf"), serde(default))]
    pub password: String,
    /// Heartbeat endpoint URL.
    #[cfg_attr(not(target_os = "espidf"), serde(default))]
    pub endpoint: String,
}

impl Credentials {
    /// Create a record without validating it.
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
            endpoint: endpoint.into(),
        }
    }

    /// True when both the SSID and the endpoint are present.
    pub fn is_provisioned(&self) -> bool {
        !self.ssid.is_empty() && !self.endpoint.is_empty()
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }

    /// Validate a record before it is tried and persisted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        // No lower bound: whether a short secret works is up to the join
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }

        if self.endpoint.is_empty() {
            return Err(ConfigError::EndpointEmpty);
        }
        if self.endpoint.len() > MAX_ENDPOINT_LEN {
            return Err(ConfigError::EndpointTooLong {
                len: self.endpoint.len(),
                max: MAX_ENDPOINT_LEN,
            });
        }
        let lower = self.endpoint.to_ascii_lowercase();
        if !lower.starts_with("http://") && !lower.starts_with("https://") {
            return Err(ConfigError::EndpointScheme);
        }

        Ok(())
    }

    /// Serialize to bytes for storage.
    ///
    /// Format: `[ssid_len:1][ssid:N][password_len:1][password:M][endpoint_len:2 LE][endpoint:K]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let ssid = truncated(&self.ssid, u8::MAX as usize);
        let password = truncated(&self.password, u8::MAX as usize);
        let endpoint = truncated(&self.endpoint, u16::MAX as usize);

        let mut bytes = Vec::with_capacity(4 + ssid.len() + password.len() + endpoint.len());
        bytes.push(ssid.len() as u8);
        bytes.extend_from_slice(ssid);
        bytes.push(password.len() as u8);
        bytes.extend_from_slice(password);
        bytes.extend_from_slice(&(endpoint.len() as u16).to_le_bytes());
        bytes.extend_from_slice(endpoint);
        bytes
    }

    /// Deserialize from bytes.
    ///
    /// Never fails: a field that is missing, truncated or not UTF-8 comes back
    /// empty, along with every field after it.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut reader = FieldReader { bytes, pos: 0 };
        let mut creds = Self::default();

        let Some(ssid) = reader.field(1) else {
            return creds;
        };
        creds.ssid = ssid;
        let Some(password) = reader.field(1) else {
            return creds;
        };
        creds.password = password;
        if let Some(endpoint) = reader.field(2) {
            creds.endpoint = endpoint;
        }
        creds
    }
}

fn truncated(s: &str, max: usize) -> &[u8] {
    let bytes = s.as_bytes();
    &bytes[..bytes.len().min(max)]
}

struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl FieldReader<'_> {
    /// Read one length-prefixed UTF-8 field with a little-endian prefix of `prefix` bytes.
    fn field(&mut self, prefix: usize) -> Option<String> {
        let header = self.bytes.get(self.pos..self.pos + prefix)?;
        let len = header
            .iter()
            .rev()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        let start = self.pos + prefix;
        let data = self.bytes.get(start..start + len)?;
        let value = String::from_utf8(data.to_vec()).ok()?;
        self.pos = start + len;
        Some(value)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &format_args!("**** ({} chars)", self.password.len()))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Errors that can occur while validating credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// Endpoint URL is empty.
    EndpointEmpty,
    /// Endpoint URL exceeds maximum length.
    EndpointTooLong { len: usize, max: usize },
    /// Endpoint URL is neither `http://` nor `https://`.
    EndpointScheme,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::EndpointEmpty => write!(f, "API URL cannot be empty"),
            Self::EndpointTooLong { len, max } => {
                write!(f, "API URL too long: {} bytes (max {})", len, max)
            }
            Self::EndpointScheme => write!(f, "API URL must start with http:// or https://"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> Credentials {
        Credentials::new("Home", "secret123", "https://x/hb")
    }

    #[test]
    fn test_provisioned_requires_ssid_and_endpoint() {
        assert!(home().is_provisioned());
        assert!(!Credentials::default().is_provisioned());
        assert!(!Credentials::new("Home", "secret123", "").is_provisioned());
        assert!(!Credentials::new("", "secret123", "https://x/hb").is_provisioned());
        // Password is not part of the rule
        assert!(Credentials::new("Cafe", "", "http://x/hb").is_provisioned());
    }

    #[test]
    fn test_valid_record() {
        assert!(home().validate().is_ok());
        assert!(Credentials::new("Cafe", "", "http://x/hb").validate().is_ok());
    }

    #[test]
    fn test_ssid_limits() {
        let c = Credentials::new("", "secret123", "https://x/hb");
        assert_eq!(c.validate(), Err(ConfigError::SsidEmpty));

        let c = Credentials::new("a".repeat(33), "secret123", "https://x/hb");
        assert!(matches!(c.validate(), Err(ConfigError::SsidTooLong { .. })));

        let c = Credentials::new("a".repeat(32), "secret123", "https://x/hb");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_password_limits() {
        let c = Credentials::new("Home", "secret", "https://x/hb");
        assert!(c.validate().is_ok());

        let c = Credentials::new("Home", "a".repeat(65), "https://x/hb");
        assert!(matches!(c.validate(), Err(ConfigError::PasswordTooLong { .. })));
    }

    #[test]
    fn test_endpoint_rules() {
        let c = Credentials::new("Home", "secret123", "");
        assert_eq!(c.validate(), Err(ConfigError::EndpointEmpty));

        let c = Credentials::new("Home", "secret123", "ftp://x/hb");
        assert_eq!(c.validate(), Err(ConfigError::EndpointScheme));

        let c = Credentials::new("Home", "secret123", "HTTPS://X/hb");
        assert!(c.validate().is_ok());

        let long = format!("https://x/{}", "a".repeat(MAX_ENDPOINT_LEN));
        let c = Credentials::new("Home", "secret123", long);
        assert!(matches!(c.validate(), Err(ConfigError::EndpointTooLong { .. })));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let c = home();
        let bytes = c.to_bytes();
        assert_eq!(bytes[0], 4);
        assert_eq!(Credentials::from_bytes(&bytes), c);
    }

    #[test]
    fn test_max_record_fits_buffer() {
        let c = Credentials::new(
            "s".repeat(MAX_SSID_LEN),
            "p".repeat(MAX_PASSWORD_LEN),
            "e".repeat(MAX_ENDPOINT_LEN),
        );
        assert_eq!(c.to_bytes().len(), MAX_RECORD_LEN);
    }

    #[test]
    fn test_from_bytes_empty_is_default() {
        assert_eq!(Credentials::from_bytes(&[]), Credentials::default());
    }

    #[test]
    fn test_from_bytes_missing_endpoint() {
        // Older record with only ssid + password
        let bytes = [4, b'H', b'o', b'm', b'e', 0];
        let c = Credentials::from_bytes(&bytes);
        assert_eq!(c.ssid, "Home");
        assert_eq!(c.password, "");
        assert_eq!(c.endpoint, "");
        assert!(!c.is_provisioned());
    }

    #[test]
    fn test_from_bytes_truncated_field() {
        let bytes = [5, b'h', b'e', b'l', b'l'];
        assert_eq!(Credentials::from_bytes(&bytes), Credentials::default());
    }

    #[test]
    fn test_debug_hides_password() {
        let shown = format!("{:?}", home());
        assert!(shown.contains("Home"));
        assert!(!shown.contains("secret123"));
        assert!(shown.contains("9 chars"));
    }

    #[cfg(not(target_os = "espidf"))]
    #[test]
    fn test_json_missing_fields_default_to_empty() {
        let creds: Credentials = serde_json::from_str(r#"{"ssid":"Home"}"#).unwrap();
        assert_eq!(creds, Credentials::new("Home", "", ""));

        let creds: Credentials = serde_json::from_str("{}").unwrap();
        assert!(!creds.is_provisioned());
    }
}
