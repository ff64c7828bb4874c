//! Discovery of debuggable browser targets over the DevTools HTTP endpoint.
//!
//! Probes `/json/version` until the endpoint responds, then lists `/json`
//! and picks a page target, preferring ones whose URL or title contains the
//! caller's hint.

use cookie_monster_core::{Error, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::CdpConnectFailed(e.to_string()))
}

/// Wait for the DevTools endpoint to answer `/json/version`, with
/// exponential backoff between attempts.
async fn probe_version(client: &reqwest::Client, host: &str, port: u16, retries: u32) -> Result<()> {
    let url = format!("http://{}:{}/json/version", host, port);
    let mut last_error = String::new();

    for attempt in 0..retries.max(1) {
        if attempt > 0 {
            let backoff = BACKOFF_BASE
                .saturating_mul(1u32 << (attempt - 1).min(8))
                .min(BACKOFF_CAP);
            tokio::time::sleep(backoff).await;
        }
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => last_error = format!("status {}", resp.status()),
            Err(e) => last_error = e.to_string(),
        }
        debug!(attempt, error = %last_error, "DevTools endpoint not ready");
    }

    Err(Error::CdpConnectFailed(format!(
        "could not reach {} ({}); start the browser with --remote-debugging-port",
        url, last_error
    )))
}

/// All debuggable targets of type `page`.
pub async fn list_page_targets(host: &str, port: u16) -> Result<Vec<Value>> {
    let client = http_client(Duration::from_secs(5))?;
    probe_version(&client, host, port, 1).await?;
    fetch_page_targets(&client, host, port).await
}

async fn fetch_page_targets(client: &reqwest::Client, host: &str, port: u16) -> Result<Vec<Value>> {
    let url = format!("http://{}:{}/json", host, port);
    let targets: Vec<Value> = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::CdpConnectFailed(e.to_string()))?
        .json()
        .await
        .map_err(|e| Error::Cdp(format!("unexpected /json response: {}", e)))?;

    Ok(targets
        .into_iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .collect())
}

/// Resolve the WebSocket debugger URL of the best-matching page target.
pub async fn discover_target(
    host: &str,
    port: u16,
    hint: Option<&str>,
    timeout: Duration,
    retries: u32,
) -> Result<String> {
    let client = http_client(timeout)?;
    probe_version(&client, host, port, retries).await?;
    let pages = fetch_page_targets(&client, host, port).await?;

    if pages.is_empty() {
        return Err(Error::NoDebuggableTarget(format!(
            "no page targets at {}:{}; open a tab in the debuggable browser",
            host, port
        )));
    }

    let target = hint
        .map(|h| h.to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .and_then(|hint| {
            pages.iter().find(|t| {
                let url = t.get("url").and_then(|v| v.as_str()).unwrap_or_default();
                let title = t.get("title").and_then(|v| v.as_str()).unwrap_or_default();
                url.to_ascii_lowercase().contains(&hint) || title.to_ascii_lowercase().contains(&hint)
            })
        })
        .unwrap_or(&pages[0]);

    if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
        return Ok(ws_url.to_string());
    }

    // Older browsers omit the field; reconstruct it from the target id.
    match target.get("id").and_then(|v| v.as_str()) {
        Some(id) if !id.is_empty() => Ok(format!("ws://{}:{}/devtools/page/{}", host, port, id)),
        _ => Err(Error::NoDebuggableTarget(
            "target has neither webSocketDebuggerUrl nor id".to_string(),
        )),
    }
}
