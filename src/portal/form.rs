//! Decoding of the setup form.

use crate::config::{ConfigError, Credentials};

/// A well-formed submission, ready to be tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub credentials: Credentials,
}

/// Why a submission was rejected before any join was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// SSID (after the manual override) or endpoint is empty.
    MissingField,
    /// A field is present but out of range.
    Invalid(ConfigError),
}

impl std::fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField => write!(f, "SSID and API URL are required"),
            Self::Invalid(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SubmissionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(e) => Some(e),
            Self::MissingField => None,
        }
    }
}

impl From<ConfigError> for SubmissionError {
    fn from(e: ConfigError) -> Self {
        Self::Invalid(e)
    }
}

/// Decode an `application/x-www-form-urlencoded` string into pairs.
///
/// `+` decodes to a space; invalid UTF-8 is replaced.
pub fn parse_form(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

fn field<'a>(fields: &'a [(String, String)], name: &str) -> &'a str {
    fields
        .iter()
        .find(|(k, _)| k == name)
        .map_or("", |(_, v)| v.as_str())
}

/// Build a submission from the form fields `ssid`, `ssid_manual`, `pass` and `api`.
///
/// A non-empty `ssid_manual` replaces `ssid`.
pub fn parse_submission(fields: &[(String, String)]) -> Result<Submission, SubmissionError> {
    let manual = field(fields, "ssid_manual");
    let ssid = if manual.is_empty() {
        field(fields, "ssid")
    } else {
        manual
    };
    let endpoint = field(fields, "api");

    if ssid.is_empty() || endpoint.is_empty() {
        return Err(SubmissionError::MissingField);
    }

    let credentials = Credentials::new(ssid, field(fields, "pass"), endpoint);
    credentials.validate()?;
    Ok(Submission { credentials })
}

/// Decode a request body, falling back to the query string when the body is empty.
pub fn submission_from(body: &[u8], query: &str) -> Result<Submission, SubmissionError> {
    let body = String::from_utf8_lossy(body);
    let source = if body.trim().is_empty() {
        query
    } else {
        &*body
    };
    parse_submission(&parse_form(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_form_decodes() {
        let fields = parse_form("ssid=My+Home&pass=a%26b%2Bc&api=https%3A%2F%2Fx%2Fhb&flag");
        assert_eq!(
            fields,
            vec![
                ("ssid".to_string(), "My Home".to_string()),
                ("pass".to_string(), "a&b+c".to_string()),
                ("api".to_string(), "https://x/hb".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_submission_basic() {
        let submission =
            submission_from(b"ssid=Home&pass=secret123&api=https%3A%2F%2Fx%2Fhb", "").unwrap();
        assert_eq!(
            submission.credentials,
            Credentials::new("Home", "secret123", "https://x/hb")
        );
    }

    #[test]
    fn test_manual_ssid_overrides_selection() {
        let submission =
            submission_from(b"ssid=Scanned&ssid_manual=Hidden&pass=&api=http://x/", "").unwrap();
        assert_eq!(submission.credentials.ssid, "Hidden");
        assert!(submission.credentials.is_open());

        // Empty manual field does not override
        let submission =
            submission_from(b"ssid=Scanned&ssid_manual=&pass=&api=http://x/", "").unwrap();
        assert_eq!(submission.credentials.ssid, "Scanned");
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(
            submission_from(b"ssid=&pass=secret123&api=http://x/", ""),
            Err(SubmissionError::MissingField)
        );
        assert_eq!(
            submission_from(b"ssid=Home&pass=secret123&api=", ""),
            Err(SubmissionError::MissingField)
        );
        assert_eq!(submission_from(b"", ""), Err(SubmissionError::MissingField));
    }

    #[test]
    fn test_out_of_range_fields() {
        let long = format!("ssid=Home&pass={}&api=http://x/", "a".repeat(65));
        assert!(matches!(
            submission_from(long.as_bytes(), ""),
            Err(SubmissionError::Invalid(ConfigError::PasswordTooLong { .. }))
        ));
        assert!(matches!(
            submission_from(b"ssid=Home&pass=&api=ftp://x/", ""),
            Err(SubmissionError::Invalid(ConfigError::EndpointScheme))
        ));
    }

    #[test]
    fn test_query_string_fallback() {
        let submission = submission_from(b"", "ssid=Home&pass=&api=http%3A%2F%2Fx%2F").unwrap();
        assert_eq!(submission.credentials.endpoint, "http://x/");
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            SubmissionError::MissingField.to_string(),
            "SSID and API URL are required"
        );
    }
}
