use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Env var holding a base64url store key, consulted when no explicit key
/// source is configured.
pub const ENCRYPTION_KEY_ENV: &str = "COOKIE_MONSTER_ENCRYPTION_KEY";
/// Env var fallback for the control-plane API token.
pub const API_TOKEN_ENV: &str = "COOKIE_MONSTER_API_TOKEN";
/// Env var permitting a non-loopback control-plane bind (`1` or `true`).
pub const ALLOW_REMOTE_ENV: &str = "COOKIE_MONSTER_ALLOW_REMOTE";

/// Where the symmetric store key comes from. Precedence at resolution time:
/// inline value, then named env var (falling back to
/// [`ENCRYPTION_KEY_ENV`]), then key file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeySource {
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub encryption_key_env: Option<String>,
    #[serde(default)]
    pub encryption_key_file: Option<PathBuf>,
}

impl KeySource {
    pub fn inline(key: impl Into<String>) -> Self {
        Self {
            encryption_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.encryption_key.is_none()
            && self.encryption_key_env.is_none()
            && self.encryption_key_file.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_chrome_host")]
    pub chrome_host: String,
    #[serde(default = "default_chrome_port")]
    pub chrome_port: u16,
    /// Case-insensitive substring matched against target tab URLs/titles.
    #[serde(default)]
    pub target_hint: Option<String>,
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u64,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// When false, only auth and sensitive headers are retained.
    #[serde(default)]
    pub include_all_headers: bool,
    /// Fetch request bodies with a follow-up `Network.getRequestPostData` call.
    #[serde(default)]
    pub capture_post_data: bool,
    /// Keep only these HTTP verbs (empty = all).
    #[serde(default)]
    pub method_filter: Vec<String>,
    /// Keep only URLs whose host contains one of these substrings (empty = all).
    #[serde(default)]
    pub host_filter: Vec<String>,
    /// Keep only these browser resource types, e.g. `XHR`, `Fetch` (empty = all).
    #[serde(default)]
    pub resource_type_filter: Vec<String>,
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
    #[serde(flatten)]
    pub key: KeySource,
}

fn default_chrome_host() -> String {
    "127.0.0.1".to_string()
}

fn default_chrome_port() -> u16 {
    9222
}

fn default_duration_seconds() -> u64 {
    30
}

fn default_max_records() -> usize {
    100
}

fn default_output_file() -> PathBuf {
    PathBuf::from("captures.jsonl")
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chrome_host: default_chrome_host(),
            chrome_port: default_chrome_port(),
            target_hint: None,
            duration_seconds: default_duration_seconds(),
            max_records: default_max_records(),
            include_all_headers: false,
            capture_post_data: false,
            method_filter: Vec::new(),
            host_filter: Vec::new(),
            resource_type_filter: Vec::new(),
            output_file: default_output_file(),
            key: KeySource::default(),
        }
    }
}

/// Constraints for picking one record out of a store. Filters apply in
/// record order; `index` picks the Nth match (0-based), otherwise the last
/// match wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureSelector {
    #[serde(default)]
    pub url_contains: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
}

/// Outbound request body for a replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodySource {
    /// No body.
    #[default]
    None,
    /// Reuse the selected capture's `post_data`.
    Captured,
    /// Literal text.
    Inline { text: String },
    /// Contents of a local file, read once before the first attempt.
    File { path: PathBuf },
    /// JSON value, serialized canonically; sets `Content-Type:
    /// application/json` unless one is already present.
    Json { value: serde_json::Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: f64,
    #[serde(default)]
    pub jitter: bool,
}

fn default_retry_attempts() -> u32 {
    1
}

fn default_backoff_seconds() -> f64 {
    0.5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            backoff_seconds: default_backoff_seconds(),
            jitter: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub capture_file: PathBuf,
    #[serde(default)]
    pub selector: CaptureSelector,
    /// Outbound URL to issue; may differ from the capture URL.
    pub request_url: String,
    /// Outbound method; defaults to the selected capture's method.
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub body: BodySource,
    /// Merged over the capture's headers; wins on conflict (case-insensitive).
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Require the outbound host to equal the selected capture's host.
    #[serde(default)]
    pub enforce_capture_host: bool,
    /// Named site adapter to run over the outbound headers.
    #[serde(default)]
    pub adapter: Option<String>,
    #[serde(flatten)]
    pub key: KeySource,
}

fn default_timeout_seconds() -> u64 {
    20
}

/// Control-plane server settings. Env fallbacks are folded in once by
/// [`ServerConfig::resolve_env`]; nothing downstream reads the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_host")]
    pub host: String,
    #[serde(default = "default_bind_port")]
    pub port: u16,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub allow_remote: bool,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8787
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: default_bind_port(),
            api_token: None,
            allow_remote: false,
        }
    }
}

impl ServerConfig {
    /// Fill unset fields from the process environment.
    pub fn resolve_env(mut self) -> Self {
        if self.api_token.is_none() {
            self.api_token = std::env::var(API_TOKEN_ENV)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
        if !self.allow_remote {
            self.allow_remote = std::env::var(ALLOW_REMOTE_ENV)
                .map(|v| matches!(v.trim(), "1" | "true"))
                .unwrap_or(false);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_config_defaults_from_empty_json() {
        let config: CaptureConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.chrome_port, 9222);
        assert_eq!(config.duration_seconds, 30);
        assert_eq!(config.max_records, 100);
        assert!(!config.include_all_headers);
        assert!(config.key.is_empty());
    }

    #[test]
    fn replay_config_accepts_unknown_fields() {
        let config: ReplayConfig = serde_json::from_str(
            r#"{"capture_file":"cap.jsonl","request_url":"https://a.example/x","some_future_knob":true}"#,
        )
        .unwrap();
        assert_eq!(config.request_url, "https://a.example/x");
        assert_eq!(config.retry.attempts, 1);
    }

    #[test]
    fn body_source_tagged_decoding() {
        let body: BodySource = serde_json::from_str(r#"{"kind":"inline","text":"a=1"}"#).unwrap();
        assert!(matches!(body, BodySource::Inline { ref text } if text == "a=1"));
        let body: BodySource = serde_json::from_str(r#"{"kind":"captured"}"#).unwrap();
        assert!(matches!(body, BodySource::Captured));
    }
}
