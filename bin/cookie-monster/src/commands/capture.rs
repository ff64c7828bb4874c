use cookie_monster_client::{AdapterRegistry, CookieMonster};
use cookie_monster_core::config::{CaptureConfig, KeySource};
use std::path::PathBuf;

pub struct CaptureArgs {
    pub chrome_host: String,
    pub chrome_port: u16,
    pub target_hint: Option<String>,
    pub duration: u64,
    pub max_records: usize,
    pub host_filter: Vec<String>,
    pub include_all_headers: bool,
    pub post_data: bool,
    pub output: PathBuf,
    pub encryption_key: Option<String>,
    pub encryption_key_env: Option<String>,
}

pub async fn run(args: CaptureArgs) -> anyhow::Result<()> {
    let config = CaptureConfig {
        chrome_host: args.chrome_host,
        chrome_port: args.chrome_port,
        target_hint: args.target_hint,
        duration_seconds: args.duration,
        max_records: args.max_records,
        host_filter: args.host_filter,
        include_all_headers: args.include_all_headers,
        capture_post_data: args.post_data,
        output_file: args.output,
        key: KeySource {
            encryption_key: args.encryption_key,
            encryption_key_env: args.encryption_key_env,
            encryption_key_file: None,
        },
        ..Default::default()
    };

    let summary = CookieMonster::new(None, AdapterRegistry::builtin())
        .capture(&config)
        .await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
