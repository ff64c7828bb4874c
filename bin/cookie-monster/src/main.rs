mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "cookie-monster")]
#[command(about = "Capture auth headers from a debuggable browser and replay requests", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture request headers from a running browser
    Capture {
        #[arg(long, default_value = "127.0.0.1")]
        chrome_host: String,
        #[arg(long, default_value = "9222")]
        chrome_port: u16,
        /// Match target tab/request URLs by substring
        #[arg(long)]
        target_hint: Option<String>,
        #[arg(long, default_value = "30")]
        duration: u64,
        #[arg(long, default_value = "100")]
        max_records: usize,
        /// Keep only URLs whose host contains this substring (repeatable)
        #[arg(long = "host")]
        host_filter: Vec<String>,
        /// Store all request headers instead of only auth/sensitive ones
        #[arg(long)]
        include_all_headers: bool,
        /// Also collect request bodies
        #[arg(long)]
        post_data: bool,
        #[arg(long, default_value = "captures.jsonl")]
        output: PathBuf,
        /// Base64url store key; omit to write plaintext
        #[arg(long)]
        encryption_key: Option<String>,
        /// Env var holding the store key
        #[arg(long)]
        encryption_key_env: Option<String>,
    },

    /// Replay an HTTP request using captured headers
    Replay {
        #[arg(long, default_value = "captures.jsonl")]
        capture_file: PathBuf,
        #[arg(long)]
        request_url: String,
        #[arg(long)]
        method: Option<String>,
        /// Pick the capture whose URL contains this substring
        #[arg(long)]
        url_contains: Option<String>,
        #[arg(long, default_value = "20")]
        timeout: u64,
        #[arg(long, default_value = "1")]
        attempts: u32,
        /// Refuse hosts outside these domains (repeatable)
        #[arg(long = "allowed-domain")]
        allowed_domains: Vec<String>,
        /// Require the target host to equal the capture's host
        #[arg(long)]
        enforce_capture_host: bool,
        #[arg(long)]
        encryption_key: Option<String>,
        #[arg(long)]
        encryption_key_env: Option<String>,
    },

    /// List debuggable page targets
    Targets {
        #[arg(long, default_value = "127.0.0.1")]
        chrome_host: String,
        #[arg(long, default_value = "9222")]
        chrome_port: u16,
    },

    /// Report whether a capture file still carries usable auth
    SessionHealth {
        #[arg(long)]
        capture_file: PathBuf,
        #[arg(long)]
        encryption_key: Option<String>,
        #[arg(long)]
        encryption_key_env: Option<String>,
    },

    /// Compare the latest records of two capture files
    Diff {
        a: PathBuf,
        b: PathBuf,
        #[arg(long)]
        a_key: Option<String>,
        #[arg(long)]
        b_key: Option<String>,
    },

    /// Run the local control-plane API
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value = "8787")]
        port: u16,
        /// Token required on every POST endpoint
        #[arg(long)]
        api_token: Option<String>,
        /// Permit binding a non-loopback address
        #[arg(long)]
        allow_remote: bool,
        /// Refuse replays to hosts outside these domains (repeatable)
        #[arg(long = "allowed-domain")]
        allowed_domains: Vec<String>,
    },

    /// Generate a fresh base64url store key
    GenerateKey,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Capture {
            chrome_host,
            chrome_port,
            target_hint,
            duration,
            max_records,
            host_filter,
            include_all_headers,
            post_data,
            output,
            encryption_key,
            encryption_key_env,
        } => {
            commands::capture::run(commands::capture::CaptureArgs {
                chrome_host,
                chrome_port,
                target_hint,
                duration,
                max_records,
                host_filter,
                include_all_headers,
                post_data,
                output,
                encryption_key,
                encryption_key_env,
            })
            .await?;
        }
        Commands::Replay {
            capture_file,
            request_url,
            method,
            url_contains,
            timeout,
            attempts,
            allowed_domains,
            enforce_capture_host,
            encryption_key,
            encryption_key_env,
        } => {
            commands::replay::run(commands::replay::ReplayArgs {
                capture_file,
                request_url,
                method,
                url_contains,
                timeout,
                attempts,
                allowed_domains,
                enforce_capture_host,
                encryption_key,
                encryption_key_env,
            })
            .await?;
        }
        Commands::Targets {
            chrome_host,
            chrome_port,
        } => {
            commands::inspect::targets(&chrome_host, chrome_port).await?;
        }
        Commands::SessionHealth {
            capture_file,
            encryption_key,
            encryption_key_env,
        } => {
            commands::inspect::session_health(&capture_file, encryption_key, encryption_key_env)?;
        }
        Commands::Diff { a, b, a_key, b_key } => {
            commands::inspect::diff(&a, &b, a_key, b_key)?;
        }
        Commands::Serve {
            host,
            port,
            api_token,
            allow_remote,
            allowed_domains,
        } => {
            commands::serve::run(host, port, api_token, allow_remote, allowed_domains).await?;
        }
        Commands::GenerateKey => {
            println!("{}", cookie_monster_storage::CipherKey::generate().to_base64());
        }
    }

    Ok(())
}
