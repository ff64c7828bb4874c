//! Append-only JSONL capture store.
//!
//! Every line is either a JSON-encoded [`CaptureRecord`] or an `ENC:` line
//! holding one. Readers tolerate mixed files, decrypting only prefixed lines.

use crate::crypto::{self, CipherKey, ENC_PREFIX};
use cookie_monster_core::config::CaptureSelector;
use cookie_monster_core::{CaptureRecord, Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Serialized records at or above this size are rejected.
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;
/// Lines longer than this are counted as corrupt and skipped.
pub const MAX_LINE_BYTES: usize = 2 * 1024 * 1024;

/// Appends records one line at a time, holding an exclusive advisory lock
/// for its whole lifetime so two captures cannot interleave in one file.
pub struct StoreWriter {
    file: File,
    path: PathBuf,
    key: Option<CipherKey>,
    bytes_written: u64,
}

impl StoreWriter {
    pub fn open_append(path: &Path, key: Option<CipherKey>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::Storage(format!(
                "capture file {} is locked by another writer",
                path.display()
            ))
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            key,
            bytes_written: 0,
        })
    }

    pub fn append(&mut self, record: &CaptureRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        if json.len() >= MAX_RECORD_BYTES {
            return Err(Error::RecordTooLarge {
                size: json.len(),
                limit: MAX_RECORD_BYTES,
            });
        }
        let line = match &self.key {
            Some(key) => crypto::encrypt_line(&json, key)?,
            None => json,
        };
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.bytes_written += line.len() as u64 + 1;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fsync and release the lock.
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadStats {
    pub corrupt_lines: u64,
    pub auth_failures: u64,
}

/// Load every record from `path` in insertion order.
///
/// Malformed and unauthenticated lines are skipped with a counter increment;
/// an encrypted line with no key configured aborts the whole load.
pub fn load_records(path: &Path, key: Option<&CipherKey>) -> Result<(Vec<CaptureRecord>, LoadStats)> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            Error::Storage(format!("capture file not found: {}", path.display()))
        }
        _ => Error::Io(e),
    })?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut stats = LoadStats::default();
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() > MAX_LINE_BYTES {
            stats.corrupt_lines += 1;
            continue;
        }

        let json = if trimmed.starts_with(ENC_PREFIX) {
            let Some(key) = key else {
                return Err(Error::EncryptedStoreRequiresKey);
            };
            match crypto::decrypt_line(trimmed, key) {
                Ok(plain) => plain,
                Err(e) => {
                    debug!(error = %e, "skipping undecryptable capture line");
                    stats.auth_failures += 1;
                    continue;
                }
            }
        } else {
            trimmed.to_string()
        };

        match serde_json::from_str::<CaptureRecord>(&json) {
            Ok(record) => records.push(record),
            Err(e) => {
                debug!(error = %e, "skipping malformed capture line");
                stats.corrupt_lines += 1;
            }
        }
    }

    Ok((records, stats))
}

/// Apply selector filters in record order and pick the Nth match
/// (`selector.index`) or the last one. The most recent observation is the
/// most likely to still carry valid auth.
pub fn select<'a>(records: &'a [CaptureRecord], selector: &CaptureSelector) -> Option<&'a CaptureRecord> {
    let matches: Vec<&CaptureRecord> = records
        .iter()
        .filter(|r| {
            if let Some(needle) = selector.url_contains.as_deref() {
                if !r.url.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()) {
                    return false;
                }
            }
            if let Some(method) = selector.method.as_deref() {
                if !r.method.eq_ignore_ascii_case(method) {
                    return false;
                }
            }
            if let Some(rtype) = selector.resource_type.as_deref() {
                if r.resource_type.as_deref() != Some(rtype) {
                    return false;
                }
            }
            true
        })
        .collect();

    match selector.index {
        Some(i) => matches.get(i).copied(),
        None => matches.last().copied(),
    }
}
