//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Speaks JSON-RPC framing: outbound frames carry `{id, method, params}`,
//! inbound frames carry either a matching `{id, result|error}` response or a
//! `{method, params}` event. A single background reader dispatches inbound
//! frames; commands are serialized so at most one call is in flight.

use cookie_monster_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, warn};

/// Inbound text frames above this size close the transport.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
/// Capacity of each event subscription; the oldest event is dropped on
/// overflow and surfaces to the subscriber as a lag count.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

pub struct CdpTransport {
    ws_tx: mpsc::Sender<String>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    subscriptions: Arc<Mutex<HashMap<String, broadcast::Sender<Value>>>>,
    next_id: AtomicU64,
    /// Serializes `call` so responses can't interleave between callers.
    call_lock: Mutex<()>,
    oversize_closed: Arc<AtomicBool>,
    unknown_frames: Arc<AtomicU64>,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpTransport {
    pub async fn connect(ws_url: &str, connect_timeout: Duration) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(ws_url))
            .await
            .map_err(|_| {
                Error::CdpConnectFailed(format!(
                    "timed out connecting to {} after {:?}",
                    ws_url, connect_timeout
                ))
            })?
            .map_err(|e| Error::CdpConnectFailed(format!("{}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let subscriptions: Arc<Mutex<HashMap<String, broadcast::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let oversize_closed = Arc::new(AtomicBool::new(false));
        let unknown_frames = Arc::new(AtomicU64::new(0));

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    warn!(error = %e, "CDP WebSocket write error");
                    break;
                }
            }
        });

        let pending_reader = pending.clone();
        let subs_reader = subscriptions.clone();
        let oversize_reader = oversize_closed.clone();
        let unknown_reader = unknown_frames.clone();
        let reader_handle = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if text.len() > MAX_FRAME_BYTES {
                            warn!(bytes = text.len(), "oversize CDP frame; closing transport");
                            oversize_reader.store(true, Ordering::SeqCst);
                            break;
                        }
                        let Ok(value) = serde_json::from_str::<Value>(&text) else {
                            unknown_reader.fetch_add(1, Ordering::Relaxed);
                            continue;
                        };
                        if let Some(id) = value.get("id").and_then(|v| v.as_u64()) {
                            let mut pending = pending_reader.lock().await;
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(value);
                            }
                        } else if let Some(method) = value.get("method").and_then(|v| v.as_str()) {
                            let subs = subs_reader.lock().await;
                            if let Some(sender) = subs.get(method) {
                                let params = value.get("params").cloned().unwrap_or(Value::Null);
                                // No receivers is fine; the event is simply dropped.
                                let _ = sender.send(params);
                            }
                        } else {
                            unknown_reader.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "CDP WebSocket read error");
                        break;
                    }
                    _ => {}
                }
            }
            // Release pending callers; their receivers resolve to an error.
            pending_reader.lock().await.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            subscriptions,
            next_id: AtomicU64::new(1),
            call_lock: Mutex::new(()),
            oversize_closed,
            unknown_frames,
            reader_handle,
            writer_handle,
        })
    }

    fn closed_error(&self) -> Error {
        if self.oversize_closed.load(Ordering::SeqCst) {
            Error::CdpFrameOversize {
                limit: MAX_FRAME_BYTES,
            }
        } else {
            Error::Cdp("transport closed".to_string())
        }
    }

    /// Send a command and wait for its response.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let _serialized = self.call_lock.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = json!({ "id": id, "method": method, "params": params }).to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.ws_tx.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(self.closed_error());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    let message = error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| error.to_string());
                    Err(Error::Cdp(message))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::CdpCallTimeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Subscribe to an event by its protocol name, e.g.
    /// `Network.requestWillBeSent`. Every subscriber of the same event gets
    /// every frame; a slow subscriber observes dropped-oldest lag.
    pub async fn subscribe(&self, event: &str) -> broadcast::Receiver<Value> {
        let mut subs = self.subscriptions.lock().await;
        subs.entry(event.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_QUEUE_CAPACITY).0)
            .subscribe()
    }

    /// Frames that were neither responses nor events.
    pub fn unknown_frames(&self) -> u64 {
        self.unknown_frames.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

impl Drop for CdpTransport {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    /// Minimal in-process CDP endpoint: answers every command with `id`
    /// echoed, and emits canned events after the first command.
    async fn spawn_fake_cdp(events: Vec<Value>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut tx, mut rx) = ws.split();
            while let Some(Ok(Message::Text(text))) = rx.next().await {
                let frame: Value = serde_json::from_str(&text).unwrap();
                let id = frame["id"].as_u64().unwrap();
                let method = frame["method"].as_str().unwrap_or_default().to_string();
                let response = if method == "Fail.me" {
                    json!({"id": id, "error": {"message": "boom"}})
                } else {
                    json!({"id": id, "result": {"ok": true}})
                };
                tx.send(Message::Text(response.to_string())).await.unwrap();
                for event in &events {
                    tx.send(Message::Text(event.to_string())).await.unwrap();
                }
            }
        });
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn call_resolves_matching_response() {
        let url = spawn_fake_cdp(vec![]).await;
        let transport = CdpTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
        let result = transport
            .call("Network.enable", json!({}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        transport.close();
    }

    #[tokio::test]
    async fn call_surfaces_protocol_errors() {
        let url = spawn_fake_cdp(vec![]).await;
        let transport = CdpTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
        match transport.call("Fail.me", json!({}), Duration::from_secs(5)).await {
            Err(Error::Cdp(message)) => assert_eq!(message, "boom"),
            other => panic!("expected Cdp error, got {:?}", other),
        }
        transport.close();
    }

    #[tokio::test]
    async fn events_fan_out_to_subscribers() {
        let event = json!({
            "method": "Network.requestWillBeSent",
            "params": {"requestId": "r1"}
        });
        let url = spawn_fake_cdp(vec![event]).await;
        let transport = CdpTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
        let mut events = transport.subscribe("Network.requestWillBeSent").await;

        transport
            .call("Network.enable", json!({}), Duration::from_secs(5))
            .await
            .unwrap();

        let params = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(params["requestId"], "r1");
        transport.close();
    }

    #[tokio::test]
    async fn connect_refused_is_a_connect_error() {
        match CdpTransport::connect("ws://127.0.0.1:1/devtools", Duration::from_secs(2)).await {
            Err(Error::CdpConnectFailed(_)) => {}
            other => panic!("expected CdpConnectFailed, got {:?}", other.map(|_| ())),
        }
    }
}
