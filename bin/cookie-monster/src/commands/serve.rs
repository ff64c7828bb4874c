use cookie_monster_core::ServerConfig;
use cookie_monster_replay::{AdapterRegistry, ReplayPolicy};

pub async fn run(
    host: String,
    port: u16,
    api_token: Option<String>,
    allow_remote: bool,
    allowed_domains: Vec<String>,
) -> anyhow::Result<()> {
    let config = ServerConfig {
        host,
        port,
        api_token,
        allow_remote,
    }
    .resolve_env();
    let policy = ReplayPolicy {
        allowed_domains,
        ..Default::default()
    };

    cookie_monster_server::serve(config, policy, AdapterRegistry::builtin()).await?;
    Ok(())
}
