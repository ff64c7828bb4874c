//! The replay engine: pick a capture, rebuild the request, enforce guards,
//! execute with bounded retries, and hand back a structured result.
//!
//! All guard failures happen before any socket is opened. Redirects are
//! followed manually so the domain allowlist can veto cross-host hops.

use crate::adapters::AdapterRegistry;
use crate::policy::ReplayPolicy;
use cookie_monster_core::config::{BodySource, ReplayConfig, RetryConfig};
use cookie_monster_core::{Error, ReplayResult, Result};
use cookie_monster_storage::{crypto, load_records, select};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Responses above this size fail with `ResponseTooLarge`.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;
const MAX_REDIRECTS: usize = 10;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "host",
    "content-length",
];

fn is_hop_by_hop(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOP_BY_HOP.contains(&lower.as_str()) || lower.starts_with("proxy-")
}

struct Executed {
    status_code: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    final_url: String,
}

pub async fn run_replay(
    config: &ReplayConfig,
    policy: &ReplayPolicy,
    adapters: &AdapterRegistry,
    cancel: &CancellationToken,
) -> Result<ReplayResult> {
    let key = crypto::resolve_key(&config.key)?;
    let (records, _) = load_records(&config.capture_file, key.as_ref())?;
    let selected = select(&records, &config.selector).ok_or(Error::NoMatchingCapture)?;

    let method_name = config
        .method
        .clone()
        .unwrap_or_else(|| selected.method.clone())
        .to_ascii_uppercase();
    let method = Method::from_bytes(method_name.as_bytes())
        .map_err(|_| Error::Config(format!("invalid method '{}'", method_name)))?;

    let request_url = Url::parse(&config.request_url)
        .map_err(|e| Error::Config(format!("request_url: {}", e)))?;
    if !matches!(request_url.scheme(), "http" | "https") {
        return Err(Error::Config(
            "request_url must be an absolute http or https URL".to_string(),
        ));
    }
    let target_host = request_url
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| Error::Config("request_url has no host".to_string()))?;

    let mut headers: HashMap<String, String> = selected
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    if let Some(name) = config.adapter.as_deref() {
        let adapter = adapters
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown adapter '{}'", name)))?;
        adapter.rewrite_headers(selected, &mut headers);
    }

    for (name, value) in &config.extra_headers {
        headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
        headers.insert(name.clone(), value.clone());
    }

    let body = resolve_body(&config.body, selected.post_data.as_deref(), &mut headers)?;

    // Guards run before any network I/O.
    if (config.enforce_capture_host || policy.enforce_capture_host) && target_host != selected.host {
        return Err(Error::CaptureHostMismatch {
            replay_host: target_host,
            capture_host: selected.host.clone(),
        });
    }
    policy.check(&request_url, method.as_str())?;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .map_err(|e| Error::Replay(e.to_string()))?;

    let started = Instant::now();
    let max_attempts = config.retry.attempts.max(1);
    let mut attempt = 0u32;
    let executed = loop {
        attempt += 1;
        match execute_once(&client, &method, request_url.clone(), &headers, body.as_deref(), policy, cancel).await {
            Ok(executed) if executed.status_code >= 500 && attempt < max_attempts => {
                debug!(status = executed.status_code, attempt, "retrying after server error");
            }
            Ok(executed) => break executed,
            Err(Error::Transient(reason)) if attempt < max_attempts => {
                debug!(%reason, attempt, "retrying after transient error");
            }
            Err(e) => return Err(e),
        }
        wait_backoff(&config.retry, attempt, cancel).await?;
    };

    Ok(ReplayResult {
        status_code: executed.status_code,
        response_headers: executed.headers,
        body: executed.body,
        elapsed_ms: started.elapsed().as_millis() as u64,
        attempts: attempt,
        final_url: executed.final_url,
        selected_capture_request_id: selected.request_id.clone(),
    })
}

fn resolve_body(
    source: &BodySource,
    captured: Option<&str>,
    headers: &mut HashMap<String, String>,
) -> Result<Option<Vec<u8>>> {
    Ok(match source {
        BodySource::None => None,
        BodySource::Captured => captured.map(|s| s.as_bytes().to_vec()),
        BodySource::Inline { text } => Some(text.clone().into_bytes()),
        BodySource::File { path } => Some(std::fs::read(path)?),
        BodySource::Json { value } => {
            let has_content_type = headers.keys().any(|k| k.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
            }
            Some(serde_json::to_vec(value)?)
        }
    })
}

fn classify_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_body() {
        Error::Transient(e.to_string())
    } else {
        Error::Replay(e.to_string())
    }
}

async fn execute_once(
    client: &reqwest::Client,
    method: &Method,
    mut url: Url,
    headers: &HashMap<String, String>,
    body: Option<&[u8]>,
    policy: &ReplayPolicy,
    cancel: &CancellationToken,
) -> Result<Executed> {
    let mut method = method.clone();
    let mut send_body = true;
    let mut redirects = 0usize;

    loop {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    header_map.insert(n, v);
                }
                _ => debug!(header = %name, "dropping unencodable header"),
            }
        }

        let mut request = client.request(method.clone(), url.clone()).headers(header_map);
        if send_body {
            if let Some(bytes) = body {
                request = request.body(bytes.to_vec());
            }
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = request.send() => result.map_err(classify_send_error)?,
        };

        let status = response.status();
        if status.is_redirection() && redirects < MAX_REDIRECTS {
            if let Some(next) = redirect_target(&response, &url) {
                let cross_host = next.host_str() != url.host_str();
                if cross_host && !policy.host_allowed(next.host_str().unwrap_or_default()) {
                    warn!(location = %next, "redirect target fails the domain allowlist; stopping");
                    return read_response(response).await;
                }
                if matches!(status.as_u16(), 301 | 302 | 303)
                    && method != Method::GET
                    && method != Method::HEAD
                {
                    method = Method::GET;
                    send_body = false;
                }
                redirects += 1;
                url = next;
                continue;
            }
        }

        return read_response(response).await;
    }
}

fn redirect_target(response: &reqwest::Response, base: &Url) -> Option<Url> {
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)?
        .to_str()
        .ok()?;
    base.join(location).ok()
}

async fn read_response(mut response: reqwest::Response) -> Result<Executed> {
    let status_code = response.status().as_u16();
    let final_url = response.url().to_string();

    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(classify_send_error)? {
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(Error::ResponseTooLarge {
                limit: MAX_RESPONSE_BYTES,
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(Executed {
        status_code,
        headers,
        body,
        final_url,
    })
}

async fn wait_backoff(retry: &RetryConfig, finished_attempt: u32, cancel: &CancellationToken) -> Result<()> {
    let exponential =
        retry.backoff_seconds.max(0.0) * 2f64.powi(finished_attempt.saturating_sub(1) as i32);
    let delay = if retry.jitter {
        exponential * rand::random::<f64>()
    } else {
        exponential
    };
    if delay > 0.0 {
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs_f64(delay)) => {}
        }
    }
    Ok(())
}
