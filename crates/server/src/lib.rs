//! Local control-plane HTTP API over the capture and replay engines.
//!
//! Single-user, single-host: the listener refuses non-loopback binds unless
//! explicitly allowed, and every mutating (POST) endpoint can be gated behind
//! a shared token compared in constant time.

pub mod routes;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header::HeaderName, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use cookie_monster_core::{Error, Result, ServerConfig};
use cookie_monster_replay::{AdapterRegistry, ReplayPolicy};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Request bodies above this size are refused with 413.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Header carrying the control-plane token.
pub const TOKEN_HEADER: &str = "x-cm-token";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub policy: Arc<ReplayPolicy>,
    pub adapters: Arc<AdapterRegistry>,
    /// Default encrypted store used by the `/ui/*` endpoints.
    pub default_capture_file: PathBuf,
    pub default_key_file: PathBuf,
    job_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AppState {
    pub fn new(config: ServerConfig, policy: ReplayPolicy, adapters: AdapterRegistry) -> Self {
        let state_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cookie-monster")
            .join("ui");
        Self {
            config: Arc::new(config),
            policy: Arc::new(policy),
            adapters: Arc::new(adapters),
            default_capture_file: state_dir.join("captures.enc.jsonl"),
            default_key_file: state_dir.join("key.txt"),
            job_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Jobs touching the same capture file are serialized per endpoint;
    /// different files proceed in parallel.
    pub(crate) async fn job_lock(&self, endpoint: &str, file: &Path) -> Arc<Mutex<()>> {
        let key = format!("{}:{}", endpoint, file.display());
        let mut locks = self.job_locks.lock().await;
        locks.entry(key).or_insert_with(Default::default).clone()
    }
}

fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Every POST endpoint requires the configured token; reads stay open.
/// A 401 carries no body, on purpose.
async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let token = match state.config.api_token.as_deref() {
        Some(t) if !t.is_empty() => t,
        _ => return next.run(req).await,
    };
    if req.method() != Method::POST {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get(HeaderName::from_static(TOKEN_HEADER))
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(value) if secure_eq(value, token) => next.run(req).await,
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/targets", get(routes::targets))
        .route("/capture", post(routes::capture))
        .route("/replay", post(routes::replay))
        .route("/session-health", post(routes::session_health))
        .route("/diff", post(routes::diff))
        .route("/ui/cache-auth", post(routes::cache_auth))
        .route("/ui/check-auth", post(routes::check_auth))
        .route("/ui/inspect-auth", post(routes::inspect_auth))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Resolve the bind address, refusing non-loopback targets unless
/// `allow_remote` is set. No socket is opened here.
pub fn resolve_bind_addr(config: &ServerConfig) -> Result<SocketAddr> {
    let ip: IpAddr = match config.host.parse() {
        Ok(ip) => ip,
        Err(_) => (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("cannot resolve bind host '{}': {}", config.host, e)))?
            .next()
            .ok_or_else(|| Error::Config(format!("bind host '{}' resolved to nothing", config.host)))?
            .ip(),
    };
    if !ip.is_loopback() && !config.allow_remote {
        return Err(Error::NonLoopbackBindRefused(format!(
            "{}:{}",
            config.host, config.port
        )));
    }
    Ok(SocketAddr::new(ip, config.port))
}

pub async fn serve(
    config: ServerConfig,
    policy: ReplayPolicy,
    adapters: AdapterRegistry,
) -> Result<()> {
    let addr = resolve_bind_addr(&config)?;
    let state = AppState::new(config, policy, adapters);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control plane listening");
    axum::serve(listener, app).await.map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_non_loopback_bind_without_allow_remote() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8787,
            api_token: None,
            allow_remote: false,
        };
        match resolve_bind_addr(&config) {
            Err(Error::NonLoopbackBindRefused(addr)) => assert_eq!(addr, "0.0.0.0:8787"),
            other => panic!("expected NonLoopbackBindRefused, got {:?}", other),
        }
    }

    #[test]
    fn allow_remote_permits_wildcard_bind() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8787,
            api_token: None,
            allow_remote: true,
        };
        assert!(resolve_bind_addr(&config).is_ok());
    }

    #[test]
    fn loopback_binds_resolve() {
        for host in ["127.0.0.1", "::1", "localhost"] {
            let config = ServerConfig {
                host: host.to_string(),
                port: 8787,
                api_token: None,
                allow_remote: false,
            };
            let addr = resolve_bind_addr(&config).unwrap();
            assert!(addr.ip().is_loopback(), "{} should be loopback", host);
        }
    }

    #[test]
    fn secure_eq_semantics() {
        assert!(secure_eq("token", "token"));
        assert!(!secure_eq("token", "Token"));
        assert!(!secure_eq("token", "toke"));
        assert!(secure_eq("", ""));
    }
}
