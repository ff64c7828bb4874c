use cookie_monster_client::{AdapterRegistry, CookieMonster};
use cookie_monster_core::config::{CaptureSelector, KeySource, ReplayConfig, RetryConfig};
use cookie_monster_replay::ReplayPolicy;
use std::path::PathBuf;

pub struct ReplayArgs {
    pub capture_file: PathBuf,
    pub request_url: String,
    pub method: Option<String>,
    pub url_contains: Option<String>,
    pub timeout: u64,
    pub attempts: u32,
    pub allowed_domains: Vec<String>,
    pub enforce_capture_host: bool,
    pub encryption_key: Option<String>,
    pub encryption_key_env: Option<String>,
}

pub async fn run(args: ReplayArgs) -> anyhow::Result<()> {
    let config = ReplayConfig {
        capture_file: args.capture_file,
        selector: CaptureSelector {
            url_contains: args.url_contains,
            ..Default::default()
        },
        request_url: args.request_url,
        method: args.method,
        body: Default::default(),
        extra_headers: Default::default(),
        retry: RetryConfig {
            attempts: args.attempts,
            ..Default::default()
        },
        timeout_seconds: args.timeout,
        enforce_capture_host: args.enforce_capture_host,
        adapter: None,
        key: KeySource {
            encryption_key: args.encryption_key,
            encryption_key_env: args.encryption_key_env,
            encryption_key_file: None,
        },
    };
    let policy = ReplayPolicy {
        allowed_domains: args.allowed_domains,
        ..Default::default()
    };

    let client = CookieMonster::new(Some(policy), AdapterRegistry::builtin());
    let result = client.replay(&config).await?;

    let preview_len = result.body.len().min(400);
    let preview = String::from_utf8_lossy(&result.body[..preview_len]);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "status_code": result.status_code,
            "attempts": result.attempts,
            "elapsed_ms": result.elapsed_ms,
            "final_url": result.final_url,
            "selected_capture_request_id": result.selected_capture_request_id,
            "body_preview": preview,
        }))?
    );
    Ok(())
}
