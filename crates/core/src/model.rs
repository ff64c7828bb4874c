//! Wire types shared across the capture and replay halves of the system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

const STANDARD_METHODS: [&str; 9] = [
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

/// True for the standard HTTP verbs; anything else is dropped at the
/// pipeline edge.
pub fn is_standard_method(method: &str) -> bool {
    STANDARD_METHODS.contains(&method.to_ascii_uppercase().as_str())
}

/// Lowercased registrable host of an absolute URL, or `None` when the URL
/// does not parse or has no host.
pub fn url_host(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

/// One observed browser request.
///
/// Header names are stored case-preserved as received; use [`CaptureRecord::header`]
/// for case-insensitive lookup. Unknown top-level keys from older or newer
/// writers are kept in `extra` so they survive a round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub host: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub post_data: Option<String>,
    /// RFC3339 wall-clock timestamp of the observation.
    pub captured_at: String,
    #[serde(default)]
    pub initiator_host: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CaptureRecord {
    pub fn new(request_id: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let host = url_host(&url).unwrap_or_default();
        Self {
            request_id: request_id.into(),
            method: method.into(),
            url,
            host,
            resource_type: None,
            headers: HashMap::new(),
            post_data: None,
            captured_at: chrono::Utc::now().to_rfc3339(),
            initiator_host: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_auth_headers(&self) -> bool {
        self.headers
            .keys()
            .any(|k| matches!(crate::headers::classify(k), crate::headers::HeaderClass::Auth))
    }
}

/// Outcome of one capture run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub count: usize,
    pub bytes_written: u64,
    pub dropped_by_filter: u64,
    pub post_data_misses: u64,
    pub queue_drops: u64,
    pub elapsed_ms: u64,
    pub output_path: PathBuf,
}

/// Outcome of one replay request.
///
/// The body is raw bytes in memory; on the wire (control plane, CLI output)
/// it serializes as base64 under `body_b64`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResult {
    pub status_code: u16,
    pub response_headers: HashMap<String, String>,
    #[serde(rename = "body_b64", with = "base64_bytes")]
    pub body: Vec<u8>,
    pub elapsed_ms: u64,
    pub attempts: u32,
    pub final_url: String,
    pub selected_capture_request_id: String,
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        ser.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        use base64::Engine;
        let s = String::deserialize(de)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
