//! Header classification and display redaction.
//!
//! The capture pipeline uses [`classify`] to decide which headers to keep when
//! `include_all_headers` is off; the control plane uses [`redact_headers`] to
//! produce inspectable payloads that never leak live credentials.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Headers that carry session identity.
const AUTH_HEADERS: [&str; 8] = [
    "cookie",
    "authorization",
    "proxy-authorization",
    "x-csrf-token",
    "x-xsrf-token",
    "x-api-key",
    "apikey",
    "set-cookie",
];

/// Headers that are not credentials but still identify the session context.
const SENSITIVE_HEADERS: [&str; 3] = ["referer", "origin", "user-agent"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderClass {
    Auth,
    Sensitive,
    Safe,
}

pub fn classify(name: &str) -> HeaderClass {
    let lower = name.to_ascii_lowercase();
    if AUTH_HEADERS.contains(&lower.as_str()) || lower.starts_with("x-auth-") {
        HeaderClass::Auth
    } else if SENSITIVE_HEADERS.contains(&lower.as_str()) {
        HeaderClass::Sensitive
    } else {
        HeaderClass::Safe
    }
}

/// Deterministic display form of a header value.
///
/// The hash prefix is stable for a given (name, value) pair, so two redacted
/// captures can still be diffed for changes without exposing the value itself.
pub fn redact(name: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.to_ascii_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    let prefix: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    format!("<redacted:{}:len={}>", prefix, value.len())
}

/// Copy of `headers` with every auth-classified value replaced by its
/// redacted form. Sensitive and safe headers pass through unchanged.
pub fn redact_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            let value = match classify(k) {
                HeaderClass::Auth => redact(k, v),
                _ => v.clone(),
            };
            (k.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_headers_case_insensitively() {
        assert_eq!(classify("Cookie"), HeaderClass::Auth);
        assert_eq!(classify("AUTHORIZATION"), HeaderClass::Auth);
        assert_eq!(classify("x-csrf-token"), HeaderClass::Auth);
        assert_eq!(classify("X-Auth-Request-Email"), HeaderClass::Auth);
        assert_eq!(classify("Referer"), HeaderClass::Sensitive);
        assert_eq!(classify("Accept"), HeaderClass::Safe);
    }

    #[test]
    fn redaction_is_deterministic_and_value_sensitive() {
        let a = redact("Cookie", "session=abc");
        let b = redact("Cookie", "session=abc");
        let c = redact("Cookie", "session=xyz");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.contains("len=11"));
    }

    #[test]
    fn redact_headers_only_touches_auth() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer t".to_string());
        headers.insert("Accept".to_string(), "text/html".to_string());
        let redacted = redact_headers(&headers);
        assert!(redacted["Authorization"].starts_with("<redacted:"));
        assert_eq!(redacted["Accept"], "text/html");
    }
}
