//! AES-256-GCM encryption for capture store lines.
//!
//! An encrypted line is the literal prefix `ENC:` followed by
//! base64url (no padding) of `nonce || ciphertext`. The nonce is fresh per
//! line; no key identifier is embedded.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cookie_monster_core::config::{KeySource, ENCRYPTION_KEY_ENV};
use cookie_monster_core::{Error, Result};
use rand::rngs::OsRng;
use rand::RngCore;

pub const ENC_PREFIX: &str = "ENC:";
pub const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
/// Key files larger than this are rejected as misconfiguration.
const MAX_KEY_FILE_BYTES: u64 = 1024;

/// A resolved 256-bit store key.
#[derive(Clone)]
pub struct CipherKey([u8; KEY_SIZE]);

impl CipherKey {
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim().as_bytes())
            .map_err(|e| Error::Config(format!("encryption key is not valid base64url: {}", e)))?;
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|v: Vec<u8>| {
            Error::Config(format!(
                "encryption key must be {} bytes, got {}",
                KEY_SIZE,
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("CipherKey(..)")
    }
}

/// Resolve a key source: inline value, then named (or default) env var, then
/// key file. `Ok(None)` means no key is configured anywhere.
pub fn resolve_key(source: &KeySource) -> Result<Option<CipherKey>> {
    if let Some(inline) = source.encryption_key.as_deref() {
        let inline = inline.trim();
        if !inline.is_empty() {
            return CipherKey::from_base64(inline).map(Some);
        }
    }

    let env_name = source
        .encryption_key_env
        .as_deref()
        .unwrap_or(ENCRYPTION_KEY_ENV);
    if let Ok(value) = std::env::var(env_name) {
        let value = value.trim().to_string();
        if !value.is_empty() {
            return CipherKey::from_base64(&value).map(Some);
        }
    }

    if let Some(path) = source.encryption_key_file.as_deref() {
        let meta = std::fs::metadata(path)
            .map_err(|e| Error::Config(format!("key file {}: {}", path.display(), e)))?;
        if !meta.is_file() {
            return Err(Error::Config(format!(
                "key file {} is not a regular file",
                path.display()
            )));
        }
        if meta.len() > MAX_KEY_FILE_BYTES {
            return Err(Error::Config(format!(
                "key file {} is too large ({} bytes)",
                path.display(),
                meta.len()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        return CipherKey::from_base64(content.trim()).map(Some);
    }

    Ok(None)
}

/// Read a key from `path`, generating and persisting a fresh one when the
/// file does not exist yet.
pub fn load_or_create_key(path: &std::path::Path) -> Result<CipherKey> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        return CipherKey::from_base64(content.trim());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let key = CipherKey::generate();
    std::fs::write(path, key.to_base64())?;
    Ok(key)
}

pub fn encrypt_line(plaintext: &str, key: &CipherKey) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| Error::Storage("encryption failed".to_string()))?;
    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(format!("{}{}", ENC_PREFIX, URL_SAFE_NO_PAD.encode(combined)))
}

/// Decrypt an `ENC:`-prefixed line back to its JSON plaintext. A line
/// without the prefix is returned unchanged.
pub fn decrypt_line(line: &str, key: &CipherKey) -> Result<String> {
    let Some(encoded) = line.strip_prefix(ENC_PREFIX) else {
        return Ok(line.to_string());
    };
    let combined = URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(|e| Error::CaptureAuthFailure(format!("bad base64: {}", e)))?;
    if combined.len() <= NONCE_SIZE {
        return Err(Error::CaptureAuthFailure("ciphertext too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::CaptureAuthFailure("authentication tag mismatch".to_string()))?;
    String::from_utf8(plaintext)
        .map_err(|_| Error::CaptureAuthFailure("plaintext is not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_through_base64() {
        let key = CipherKey::generate();
        let restored = CipherKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key.0, restored.0);
    }

    #[test]
    fn rejects_short_keys() {
        let short = URL_SAFE_NO_PAD.encode([0u8; 16]);
        assert!(CipherKey::from_base64(&short).is_err());
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = CipherKey::generate();
        let line = encrypt_line(r#"{"a":1}"#, &key).unwrap();
        assert!(line.starts_with(ENC_PREFIX));
        assert_eq!(decrypt_line(&line, &key).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let key = CipherKey::generate();
        let other = CipherKey::generate();
        let line = encrypt_line("secret", &key).unwrap();
        match decrypt_line(&line, &other) {
            Err(cookie_monster_core::Error::CaptureAuthFailure(_)) => {}
            other => panic!("expected CaptureAuthFailure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn plaintext_lines_pass_through() {
        let key = CipherKey::generate();
        assert_eq!(decrypt_line(r#"{"a":1}"#, &key).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn resolve_prefers_inline_key() {
        let key = CipherKey::generate();
        let source = KeySource::inline(key.to_base64());
        let resolved = resolve_key(&source).unwrap().unwrap();
        assert_eq!(resolved.to_base64(), key.to_base64());
    }
}
