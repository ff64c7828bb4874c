use cookie_monster_core::config::KeySource;
use cookie_monster_storage::{compare_capture_files, crypto, health, load_records, CipherKey};
use std::path::Path;

pub async fn targets(chrome_host: &str, chrome_port: u16) -> anyhow::Result<()> {
    let client = cookie_monster_client::CookieMonster::default();
    let targets = client.targets(chrome_host, chrome_port).await?;
    println!("{}", serde_json::to_string_pretty(&targets)?);
    Ok(())
}

pub fn session_health(
    capture_file: &Path,
    encryption_key: Option<String>,
    encryption_key_env: Option<String>,
) -> anyhow::Result<()> {
    let key = crypto::resolve_key(&KeySource {
        encryption_key,
        encryption_key_env,
        encryption_key_file: None,
    })?;
    let (records, stats) = load_records(capture_file, key.as_ref())?;
    let report = health::analyze(&records);
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "records": records.len(),
            "corrupt_lines": stats.corrupt_lines,
            "auth_failures": stats.auth_failures,
            "health": report,
        }))?
    );
    Ok(())
}

pub fn diff(
    a: &Path,
    b: &Path,
    a_key: Option<String>,
    b_key: Option<String>,
) -> anyhow::Result<()> {
    let key_a = a_key.as_deref().map(CipherKey::from_base64).transpose()?;
    let key_b = b_key.as_deref().map(CipherKey::from_base64).transpose()?;
    let report = compare_capture_files(a, key_a.as_ref(), b, key_b.as_ref())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
