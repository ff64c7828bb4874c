//! Control-plane endpoint handlers and error mapping.

use crate::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cookie_monster_capture::{discovery, pipeline, CdpTransport};
use cookie_monster_core::config::{CaptureConfig, KeySource, ReplayConfig};
use cookie_monster_core::headers::redact_headers;
use cookie_monster_core::model::url_host;
use cookie_monster_core::{CaptureRecord, Error};
use cookie_monster_storage::{crypto, diff, health, load_records};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Core error wrapped for HTTP: maps the taxonomy onto status codes and a
/// `{"error":{kind,message}}` body.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Config(_) | Error::Json(_) | Error::EncryptedStoreRequiresKey => {
                StatusCode::BAD_REQUEST
            }
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::DomainNotAllowed(_)
            | Error::PolicyDenied { .. }
            | Error::CaptureHostMismatch { .. }
            | Error::NonLoopbackBindRefused(_) => StatusCode::FORBIDDEN,
            Error::NoMatchingCapture => StatusCode::NOT_FOUND,
            Error::Storage(message) if message.starts_with("capture file not found") => {
                StatusCode::NOT_FOUND
            }
            Error::RequestBodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": { "kind": self.0.kind(), "message": self.0.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn parse_http_url(raw: &str) -> Result<url::Url, ApiError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ApiError(Error::Config(format!("invalid url '{}': {}", raw, e))))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ApiError(Error::Config(format!(
            "url '{}' must be absolute http or https",
            raw
        ))));
    }
    Ok(parsed)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Deserialize)]
pub struct TargetsQuery {
    host: Option<String>,
    port: Option<u16>,
}

pub async fn targets(Query(query): Query<TargetsQuery>) -> ApiResult {
    let targets = discovery::list_page_targets(
        query.host.as_deref().unwrap_or("127.0.0.1"),
        query.port.unwrap_or(9222),
    )
    .await?;
    Ok(Json(json!({ "targets": targets })))
}

/// Up to the last three records, auth values redacted, for quick inspection
/// of what a capture just wrote.
fn redacted_sample(records: &[CaptureRecord]) -> Vec<Value> {
    records
        .iter()
        .rev()
        .take(3)
        .map(|record| {
            let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "headers".to_string(),
                    serde_json::to_value(redact_headers(&record.headers)).unwrap_or(Value::Null),
                );
            }
            value
        })
        .collect()
}

pub async fn capture(State(state): State<AppState>, Json(config): Json<CaptureConfig>) -> ApiResult {
    let lock = state.job_lock("capture", &config.output_file).await;
    let _serialized = lock.lock().await;

    let summary = pipeline::run_capture(&config, &CancellationToken::new()).await?;

    let key = crypto::resolve_key(&config.key)?;
    let sample = match load_records(&config.output_file, key.as_ref()) {
        Ok((records, _)) => redacted_sample(&records),
        Err(_) => Vec::new(),
    };

    Ok(Json(json!({ "summary": summary, "sample": sample })))
}

pub async fn replay(State(state): State<AppState>, Json(config): Json<ReplayConfig>) -> ApiResult {
    parse_http_url(&config.request_url)?;

    let lock = state.job_lock("replay", &config.capture_file).await;
    let _serialized = lock.lock().await;

    let result = cookie_monster_replay::run_replay(
        &config,
        &state.policy,
        &state.adapters,
        &CancellationToken::new(),
    )
    .await?;
    Ok(Json(serde_json::to_value(&result).map_err(Error::Json)?))
}

#[derive(Deserialize)]
pub struct StorePayload {
    capture_file: PathBuf,
    #[serde(flatten)]
    key: KeySource,
}

pub async fn session_health(Json(payload): Json<StorePayload>) -> ApiResult {
    let key = crypto::resolve_key(&payload.key)?;
    let (records, _) = load_records(&payload.capture_file, key.as_ref())?;
    let report = health::analyze(&records);
    Ok(Json(serde_json::to_value(&report).map_err(Error::Json)?))
}

#[derive(Deserialize)]
pub struct DiffPayload {
    a: PathBuf,
    b: PathBuf,
    #[serde(default)]
    a_key: Option<String>,
    #[serde(default)]
    b_key: Option<String>,
}

pub async fn diff(Json(payload): Json<DiffPayload>) -> ApiResult {
    let key_a = payload
        .a_key
        .as_deref()
        .map(crypto::CipherKey::from_base64)
        .transpose()?;
    let key_b = payload
        .b_key
        .as_deref()
        .map(crypto::CipherKey::from_base64)
        .transpose()?;
    let report = diff::compare_capture_files(&payload.a, key_a.as_ref(), &payload.b, key_b.as_ref())?;
    Ok(Json(serde_json::to_value(&report).map_err(Error::Json)?))
}

#[derive(Deserialize)]
pub struct CacheAuthPayload {
    url: String,
    #[serde(default)]
    chrome_host: Option<String>,
    #[serde(default)]
    chrome_port: Option<u16>,
    #[serde(default)]
    duration_seconds: Option<u64>,
    #[serde(default)]
    max_records: Option<usize>,
    #[serde(default)]
    capture_file: Option<PathBuf>,
    #[serde(flatten)]
    key: KeySource,
}

/// Resolve the key for the `/ui/*` default store: explicit source wins,
/// otherwise a key file under the user's home is created on first use.
fn ui_key(state: &AppState, source: &KeySource) -> Result<crypto::CipherKey, Error> {
    if let Some(key) = crypto::resolve_key(source)? {
        return Ok(key);
    }
    crypto::load_or_create_key(&state.default_key_file)
}

pub async fn cache_auth(State(state): State<AppState>, Json(payload): Json<CacheAuthPayload>) -> ApiResult {
    let target = parse_http_url(&payload.url)?;
    let host = target.host_str().unwrap_or_default().to_ascii_lowercase();

    let key = ui_key(&state, &payload.key)?;
    let adapter = state.adapters.auto_detect(&host);
    let output_file = payload
        .capture_file
        .clone()
        .unwrap_or_else(|| state.default_capture_file.clone());

    let chrome_host = payload.chrome_host.clone().unwrap_or_else(|| "127.0.0.1".to_string());
    let chrome_port = payload.chrome_port.unwrap_or(9222);
    let config = CaptureConfig {
        chrome_host: chrome_host.clone(),
        chrome_port,
        target_hint: Some(host.clone()),
        duration_seconds: payload.duration_seconds.unwrap_or(12),
        max_records: payload.max_records.unwrap_or(100),
        include_all_headers: true,
        host_filter: vec![host.clone()],
        output_file: output_file.clone(),
        key: KeySource::inline(key.to_base64()),
        ..Default::default()
    };

    let lock = state.job_lock("cache-auth", &output_file).await;
    let _serialized = lock.lock().await;

    // Attach to the already-debuggable browser on the hinted tab.
    let ws_url = discovery::discover_target(
        &chrome_host,
        chrome_port,
        Some(&host),
        std::time::Duration::from_secs(5),
        8,
    )
    .await?;
    let transport = CdpTransport::connect(&ws_url, std::time::Duration::from_secs(10)).await?;
    let summary = pipeline::run_capture_on(&transport, &config, &CancellationToken::new()).await;
    transport.close();
    let summary = summary?;

    Ok(Json(json!({
        "captured": summary.count,
        "capture_file": output_file,
        "encrypted": true,
        "adapter": adapter.map(|a| a.name()),
    })))
}

#[derive(Deserialize)]
pub struct CheckAuthPayload {
    url: String,
    #[serde(default)]
    capture_file: Option<PathBuf>,
    #[serde(flatten)]
    key: KeySource,
}

fn load_matching(
    state: &AppState,
    payload: &CheckAuthPayload,
) -> Result<(String, PathBuf, Vec<CaptureRecord>), ApiError> {
    let target = parse_http_url(&payload.url)?;
    let host = target.host_str().unwrap_or_default().to_ascii_lowercase();
    let capture_file = payload
        .capture_file
        .clone()
        .unwrap_or_else(|| state.default_capture_file.clone());
    let key = ui_key(state, &payload.key)?;
    let (records, _) = load_records(&capture_file, Some(&key))?;
    let matched = records
        .into_iter()
        .filter(|r| r.host.contains(&host) || url_host(&r.url).map(|h| h.contains(&host)).unwrap_or(false))
        .collect();
    Ok((host, capture_file, matched))
}

pub async fn check_auth(State(state): State<AppState>, Json(payload): Json<CheckAuthPayload>) -> ApiResult {
    let (host, capture_file, matched) = load_matching(&state, &payload)?;
    let auth_count = matched.iter().filter(|r| r.has_auth_headers()).count();
    Ok(Json(json!({
        "url_host": host,
        "capture_file": capture_file,
        "matched_records": matched.len(),
        "records_with_auth_headers": auth_count,
        "has_cached_auth": auth_count > 0,
    })))
}

pub async fn inspect_auth(State(state): State<AppState>, Json(payload): Json<CheckAuthPayload>) -> ApiResult {
    let (host, capture_file, matched) = load_matching(&state, &payload)?;

    let with_auth: Vec<&CaptureRecord> = matched.iter().filter(|r| r.has_auth_headers()).collect();
    let prioritized: Vec<&CaptureRecord> = if with_auth.is_empty() {
        matched.iter().collect()
    } else {
        with_auth
    };

    let records: Vec<Value> = prioritized
        .iter()
        .rev()
        .take(20)
        .rev()
        .map(|record| {
            let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "headers".to_string(),
                    serde_json::to_value(redact_headers(&record.headers)).unwrap_or(Value::Null),
                );
            }
            value
        })
        .collect();

    Ok(Json(json!({
        "url_host": host,
        "capture_file": capture_file,
        "records": records,
    })))
}
