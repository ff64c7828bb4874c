use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No debuggable page target: {0}")]
    NoDebuggableTarget(String),

    #[error("CDP connect failed: {0}")]
    CdpConnectFailed(String),

    #[error("CDP command '{method}' timed out after {timeout_ms}ms")]
    CdpCallTimeout { method: String, timeout_ms: u64 },

    #[error("CDP frame exceeded {limit} bytes; transport closed")]
    CdpFrameOversize { limit: usize },

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("Capture file is encrypted; provide an encryption key")]
    EncryptedStoreRequiresKey,

    #[error("Encrypted capture line failed authentication: {0}")]
    CaptureAuthFailure(String),

    #[error("Record is {size} bytes; limit is {limit}")]
    RecordTooLarge { size: usize, limit: usize },

    #[error("No captured requests matched the replay selector")]
    NoMatchingCapture,

    #[error("Replay host '{replay_host}' does not match capture host '{capture_host}'")]
    CaptureHostMismatch {
        replay_host: String,
        capture_host: String,
    },

    #[error("Replay blocked: {0}")]
    DomainNotAllowed(String),

    #[error("Replay blocked by deny rule #{rule_index}")]
    PolicyDenied { rule_index: usize },

    #[error("Response body exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Refusing to bind non-loopback address '{0}' (set allow_remote to override)")]
    NonLoopbackBindRefused(String),

    #[error("Request body too large")]
    RequestBodyTooLarge,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Replay error: {0}")]
    Replay(String),
}

impl Error {
    /// Stable machine-readable kind, used in control-plane error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_invalid",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::NoDebuggableTarget(_) => "no_debuggable_target",
            Error::CdpConnectFailed(_) => "cdp_connect_failed",
            Error::CdpCallTimeout { .. } => "cdp_call_timeout",
            Error::CdpFrameOversize { .. } => "cdp_frame_oversize",
            Error::Cdp(_) => "cdp",
            Error::EncryptedStoreRequiresKey => "encrypted_store_requires_key",
            Error::CaptureAuthFailure(_) => "capture_auth_failure",
            Error::RecordTooLarge { .. } => "record_too_large",
            Error::NoMatchingCapture => "no_matching_capture",
            Error::CaptureHostMismatch { .. } => "capture_host_mismatch",
            Error::DomainNotAllowed(_) => "domain_not_allowed",
            Error::PolicyDenied { .. } => "policy_denied",
            Error::ResponseTooLarge { .. } => "response_too_large",
            Error::Transient(_) => "transient",
            Error::Cancelled => "cancelled",
            Error::NonLoopbackBindRefused(_) => "non_loopback_bind_refused",
            Error::RequestBodyTooLarge => "request_body_too_large",
            Error::Unauthorized => "unauthorized",
            Error::Storage(_) => "storage",
            Error::Replay(_) => "replay",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
