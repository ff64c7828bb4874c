//! Stable programmatic entry point for capture and replay.
//!
//! Every instance owns its policy and adapter registry; every call owns its
//! transport and store handles, so instances are cheap and share nothing
//! global. Async methods are the primary surface; the `_blocking` variants
//! drive them on a private runtime for synchronous callers.

use cookie_monster_capture::{discovery, pipeline};
use cookie_monster_core::config::KeySource;
use cookie_monster_core::{
    CaptureConfig, CaptureSummary, ReplayConfig, ReplayResult, Result,
};
use cookie_monster_replay::engine;
use cookie_monster_storage::{crypto, health, load_records, SessionHealth};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use cookie_monster_replay::{Adapter, AdapterRegistry, DenyRule, ReplayPolicy};
pub use tokio_util::sync::CancellationToken as CancelToken;

pub struct CookieMonster {
    policy: ReplayPolicy,
    adapters: AdapterRegistry,
}

impl Default for CookieMonster {
    fn default() -> Self {
        Self::new(None, AdapterRegistry::builtin())
    }
}

impl CookieMonster {
    /// A facade with the given guardrails; `None` means no policy beyond
    /// what each replay config carries itself.
    pub fn new(policy: Option<ReplayPolicy>, adapters: AdapterRegistry) -> Self {
        Self {
            policy: policy.unwrap_or_default(),
            adapters,
        }
    }

    pub fn policy(&self) -> &ReplayPolicy {
        &self.policy
    }

    pub async fn capture(&self, config: &CaptureConfig) -> Result<CaptureSummary> {
        self.capture_with_cancel(config, &CancellationToken::new()).await
    }

    pub async fn capture_with_cancel(
        &self,
        config: &CaptureConfig,
        cancel: &CancellationToken,
    ) -> Result<CaptureSummary> {
        pipeline::run_capture(config, cancel).await
    }

    pub async fn replay(&self, config: &ReplayConfig) -> Result<ReplayResult> {
        self.replay_with_cancel(config, &CancellationToken::new()).await
    }

    pub async fn replay_with_cancel(
        &self,
        config: &ReplayConfig,
        cancel: &CancellationToken,
    ) -> Result<ReplayResult> {
        engine::run_replay(config, &self.policy, &self.adapters, cancel).await
    }

    /// Debuggable page targets of a running browser.
    pub async fn targets(&self, host: &str, port: u16) -> Result<Vec<Value>> {
        discovery::list_page_targets(host, port).await
    }

    /// Load a store and report whether it still carries usable auth.
    pub fn session_health(&self, config_key: &KeySource, capture_file: &std::path::Path) -> Result<SessionHealth> {
        let key = crypto::resolve_key(config_key)?;
        let (records, _) = load_records(capture_file, key.as_ref())?;
        Ok(health::analyze(&records))
    }

    pub fn capture_blocking(&self, config: &CaptureConfig) -> Result<CaptureSummary> {
        block_on(self.capture(config))
    }

    pub fn replay_blocking(&self, config: &ReplayConfig) -> Result<ReplayResult> {
        block_on(self.replay(config))
    }
}

/// Drive a future to completion on a dedicated runtime. The suspendable
/// form is the source of truth; this wrapper keeps the contract identical.
fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime construction cannot fail with static config")
        .block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookie_monster_core::CaptureRecord;
    use cookie_monster_storage::StoreWriter;

    #[test]
    fn session_health_over_a_written_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cap.jsonl");
        let mut writer = StoreWriter::open_append(&path, None).unwrap();
        let mut record = CaptureRecord::new("1", "GET", "https://a.example/x");
        record.headers.insert("Cookie".to_string(), "s=1".to_string());
        writer.append(&record).unwrap();
        writer.close().unwrap();

        let client = CookieMonster::new(None, AdapterRegistry::builtin());
        let health = client.session_health(&KeySource::default(), &path).unwrap();
        assert!(health.has_cookie);
        assert_eq!(health.bearer_token_count, 0);
    }

    /// Full round-trip: a fake browser emits two requests, the pipeline
    /// keeps the filtered one, and a replay against an echo server carries
    /// the captured auth headers.
    #[tokio::test]
    async fn capture_then_replay_round_trip() {
        use cookie_monster_capture::{run_capture_on, CdpTransport};
        use futures::{SinkExt, StreamExt};
        use std::io::{BufRead, BufReader, Write};
        use tokio_tungstenite::tungstenite::Message;

        // Echo server: replies 200 with request headers in the body.
        let http = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let http_port = http.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for stream in http.incoming() {
                let Ok(mut stream) = stream else { break };
                let reader = BufReader::new(stream.try_clone().unwrap());
                let mut echoed = String::new();
                for line in reader.lines() {
                    let line = line.unwrap_or_default();
                    if line.is_empty() {
                        break;
                    }
                    echoed.push_str(&line.to_ascii_lowercase());
                    echoed.push('\n');
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    echoed.len(),
                    echoed
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        // Fake browser: acks commands, emits two request events after enable.
        let replay_url = format!("http://127.0.0.1:{}/x", http_port);
        let event_url = replay_url.clone();
        let ws = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = ws.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = ws.accept().await.unwrap();
            let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut tx, mut rx) = socket.split();
            while let Some(Ok(Message::Text(text))) = rx.next().await {
                let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
                let id = frame["id"].as_u64().unwrap();
                tx.send(Message::Text(
                    serde_json::json!({"id": id, "result": {}}).to_string(),
                ))
                .await
                .unwrap();
                if frame["method"] == "Network.enable" {
                    for (rid, url, headers) in [
                        (
                            "r1",
                            event_url.as_str(),
                            serde_json::json!({"Cookie": "s=1", "Authorization": "Bearer t"}),
                        ),
                        ("r2", "https://b.example/y", serde_json::json!({"Cookie": "o=2"})),
                    ] {
                        let event = serde_json::json!({
                            "method": "Network.requestWillBeSent",
                            "params": {
                                "requestId": rid,
                                "documentURL": url,
                                "type": "XHR",
                                "request": {"url": url, "method": "GET", "headers": headers}
                            }
                        });
                        tx.send(Message::Text(event.to_string())).await.unwrap();
                    }
                }
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let capture_file = dir.path().join("cap.jsonl");
        let capture_config = CaptureConfig {
            host_filter: vec!["127.0.0.1".to_string()],
            duration_seconds: 5,
            max_records: 1,
            output_file: capture_file.clone(),
            ..Default::default()
        };

        let transport = CdpTransport::connect(
            &format!("ws://{}", ws_addr),
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();
        let summary = run_capture_on(&transport, &capture_config, &CancellationToken::new())
            .await
            .unwrap();
        drop(transport);
        assert_eq!(summary.count, 1);

        let client = CookieMonster::new(None, AdapterRegistry::builtin());
        let replay_config: ReplayConfig = serde_json::from_value(serde_json::json!({
            "capture_file": capture_file,
            "request_url": replay_url,
            "enforce_capture_host": true,
        }))
        .unwrap();
        let result = client.replay(&replay_config).await.unwrap();
        assert_eq!(result.status_code, 200);
        let echoed = String::from_utf8(result.body).unwrap();
        assert!(echoed.contains("cookie: s=1"));
        assert!(echoed.contains("authorization: bearer t"));
    }

    #[test]
    fn blocking_replay_propagates_guard_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cap.jsonl");
        let mut writer = StoreWriter::open_append(&path, None).unwrap();
        let mut record = CaptureRecord::new("1", "GET", "https://a.example/x");
        record.headers.insert("Cookie".to_string(), "s=1".to_string());
        writer.append(&record).unwrap();
        writer.close().unwrap();

        let policy = ReplayPolicy {
            allowed_domains: vec!["a.example".to_string()],
            ..Default::default()
        };
        let client = CookieMonster::new(Some(policy), AdapterRegistry::builtin());
        let config: ReplayConfig = serde_json::from_value(serde_json::json!({
            "capture_file": path,
            "request_url": "https://evil.example/x"
        }))
        .unwrap();
        assert!(client.replay_blocking(&config).is_err());
    }
}
