//! The capture pipeline: network events in, capture records out.
//!
//! `Network.requestWillBeSent` and `Network.requestWillBeSentExtraInfo`
//! arrive in either order and split one request's headers between them, so
//! both merge into a shared per-request state and the emit decision is
//! re-run after every event for that request. Accepted records stream to the
//! capture store in observation order.

use crate::cdp::CdpTransport;
use crate::discovery;
use cookie_monster_core::config::CaptureConfig;
use cookie_monster_core::headers::{classify, HeaderClass};
use cookie_monster_core::model::{is_standard_method, url_host};
use cookie_monster_core::{CaptureRecord, CaptureSummary, Error, Result};
use cookie_monster_storage::{crypto, StoreWriter};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const DISCOVERY_RETRIES: u32 = 8;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const POST_DATA_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_POST_DATA_BYTES: u64 = 64 * 1024;

/// Per-request state merged from both network event types.
#[derive(Default)]
struct PendingRequest {
    /// True once `requestWillBeSent` was observed; extra-info alone carries
    /// no URL or method, so the entry waits for the request event.
    seen_request: bool,
    url: String,
    method: String,
    resource_type: Option<String>,
    headers: HashMap<String, String>,
    initiator_host: Option<String>,
    has_post_data: bool,
}

enum Decision {
    /// Not enough state yet; more events for this request may arrive.
    Wait,
    /// Permanently filtered out.
    Drop,
    Emit(CaptureRecord),
}

/// Discover a target, attach, and capture until the configured duration or
/// record limit runs out (or `cancel` fires).
pub async fn run_capture(config: &CaptureConfig, cancel: &CancellationToken) -> Result<CaptureSummary> {
    let ws_url = discovery::discover_target(
        &config.chrome_host,
        config.chrome_port,
        config.target_hint.as_deref(),
        DISCOVERY_TIMEOUT,
        DISCOVERY_RETRIES,
    )
    .await?;
    let transport = CdpTransport::connect(&ws_url, CONNECT_TIMEOUT).await?;
    let result = run_capture_on(&transport, config, cancel).await;
    transport.close();
    result
}

/// Capture over an already-connected transport. Split out so tests (and the
/// cache-auth flow, which manages its own attach) can drive the pipeline
/// directly.
pub async fn run_capture_on(
    transport: &CdpTransport,
    config: &CaptureConfig,
    cancel: &CancellationToken,
) -> Result<CaptureSummary> {
    let key = crypto::resolve_key(&config.key)?;

    let mut events = transport.subscribe("Network.requestWillBeSent").await;
    let mut extra_events = transport.subscribe("Network.requestWillBeSentExtraInfo").await;

    let enable_params = if config.capture_post_data {
        json!({ "maxPostDataSize": MAX_POST_DATA_BYTES })
    } else {
        json!({})
    };
    transport.call("Network.enable", enable_params, CALL_TIMEOUT).await?;

    let mut writer = StoreWriter::open_append(&config.output_file, key)?;

    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(config.duration_seconds);
    let mut summary = CaptureSummary {
        output_path: config.output_file.clone(),
        ..Default::default()
    };
    let mut pending: HashMap<String, PendingRequest> = HashMap::new();
    // Request ids already emitted or permanently dropped.
    let mut resolved: HashSet<String> = HashSet::new();

    while summary.count < config.max_records {
        let touched: Option<String> = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("capture cancelled");
                break;
            }
            _ = tokio::time::sleep_until(deadline) => break,
            event = events.recv() => match event {
                Ok(params) => merge_request_event(&params, &mut pending),
                Err(RecvError::Lagged(n)) => {
                    summary.queue_drops += n;
                    None
                }
                Err(RecvError::Closed) => break,
            },
            extra = extra_events.recv() => match extra {
                Ok(params) => merge_extra_info(&params, &mut pending),
                Err(RecvError::Lagged(n)) => {
                    summary.queue_drops += n;
                    None
                }
                Err(RecvError::Closed) => break,
            },
        };

        let Some(request_id) = touched else { continue };
        if resolved.contains(&request_id) {
            continue;
        }
        let Some(entry) = pending.get(&request_id) else { continue };

        match evaluate(&request_id, entry, config) {
            Decision::Wait => {}
            Decision::Drop => {
                resolved.insert(request_id.clone());
                pending.remove(&request_id);
                summary.dropped_by_filter += 1;
            }
            Decision::Emit(mut record) => {
                let has_post_data = entry.has_post_data;
                resolved.insert(request_id.clone());
                pending.remove(&request_id);

                if config.capture_post_data && has_post_data {
                    record.post_data = fetch_post_data(transport, &record.request_id).await;
                    if record.post_data.is_none() {
                        summary.post_data_misses += 1;
                    }
                }
                match writer.append(&record) {
                    Ok(()) => summary.count += 1,
                    Err(Error::RecordTooLarge { size, limit }) => {
                        debug!(size, limit, "skipping oversized record");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    summary.bytes_written = writer.bytes_written();
    writer.close()?;
    summary.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        count = summary.count,
        dropped = summary.dropped_by_filter,
        output = %summary.output_path.display(),
        "capture finished"
    );
    Ok(summary)
}

fn value_to_string(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

/// Fold one `Network.requestWillBeSent` event into the pending state and
/// return the touched request id.
fn merge_request_event(params: &Value, pending: &mut HashMap<String, PendingRequest>) -> Option<String> {
    let request_id = params.get("requestId").and_then(Value::as_str)?.to_string();
    let request = params.get("request")?;

    let entry = pending.entry(request_id.clone()).or_default();
    entry.seen_request = true;
    if let Some(url) = request.get("url").and_then(Value::as_str) {
        entry.url = url.to_string();
    }
    entry.method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_ascii_uppercase();
    if let Some(resource_type) = params.get("type").and_then(Value::as_str) {
        entry.resource_type = Some(resource_type.to_string());
    }
    if entry.initiator_host.is_none() {
        entry.initiator_host = params
            .get("documentURL")
            .and_then(Value::as_str)
            .and_then(url_host);
    }
    if let Some(has_post_data) = request.get("hasPostData").and_then(Value::as_bool) {
        entry.has_post_data = has_post_data;
    }
    if let Some(headers) = request.get("headers").and_then(Value::as_object) {
        for (name, value) in headers {
            entry.headers.insert(name.clone(), value_to_string(value));
        }
    }
    Some(request_id)
}

/// Fold one `Network.requestWillBeSentExtraInfo` event into the pending
/// state. Extra-info carries the headers actually put on the wire (cookies
/// included), so its values win over the request event's.
fn merge_extra_info(params: &Value, pending: &mut HashMap<String, PendingRequest>) -> Option<String> {
    let request_id = params.get("requestId").and_then(Value::as_str)?.to_string();
    let headers = params.get("headers").and_then(Value::as_object)?;

    let entry = pending.entry(request_id.clone()).or_default();
    for (name, value) in headers {
        entry.headers.insert(name.clone(), value_to_string(value));
    }
    Some(request_id)
}

/// Decide what to do with a request's merged state so far. Filter failures
/// are permanent; an empty retained-header set is not, because the auth
/// headers may still arrive in a later extra-info event.
fn evaluate(request_id: &str, entry: &PendingRequest, config: &CaptureConfig) -> Decision {
    if !entry.seen_request {
        return Decision::Wait;
    }

    let Some(host) = url_host(&entry.url) else {
        return Decision::Drop;
    };
    if !is_standard_method(&entry.method) {
        return Decision::Drop;
    }
    if !config.host_filter.is_empty()
        && !config
            .host_filter
            .iter()
            .any(|f| host.contains(&f.to_ascii_lowercase()))
    {
        return Decision::Drop;
    }
    if !config.method_filter.is_empty()
        && !config
            .method_filter
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&entry.method))
    {
        return Decision::Drop;
    }
    if !config.resource_type_filter.is_empty() {
        let matched = entry
            .resource_type
            .as_deref()
            .map(|t| config.resource_type_filter.iter().any(|f| f == t))
            .unwrap_or(false);
        if !matched {
            return Decision::Drop;
        }
    }

    let mut headers = entry.headers.clone();
    if !config.include_all_headers {
        headers.retain(|name, _| !matches!(classify(name), HeaderClass::Safe));
    }
    if headers.is_empty() {
        return Decision::Wait;
    }

    let mut record = CaptureRecord::new(request_id, entry.method.clone(), entry.url.clone());
    record.resource_type = entry.resource_type.clone();
    record.headers = headers;
    record.initiator_host = entry.initiator_host.clone();
    Decision::Emit(record)
}

async fn fetch_post_data(transport: &CdpTransport, request_id: &str) -> Option<String> {
    match transport
        .call(
            "Network.getRequestPostData",
            json!({ "requestId": request_id }),
            POST_DATA_TIMEOUT,
        )
        .await
    {
        Ok(result) => result.get("postData").and_then(Value::as_str).map(String::from),
        Err(e) => {
            debug!(request_id, error = %e, "post data unavailable");
            None
        }
    }
}
