//! Compare the most recent record of two capture files, e.g. a known-good
//! session against one that stopped working.

use crate::crypto::CipherKey;
use crate::store::load_records;
use cookie_monster_core::{CaptureRecord, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureDiff {
    pub headers_added: Vec<String>,
    pub headers_removed: Vec<String>,
    pub method_changed: bool,
}

fn signature(record: &CaptureRecord) -> (BTreeSet<String>, String) {
    let names = record
        .headers
        .keys()
        .map(|k| k.to_ascii_lowercase())
        .collect();
    (names, record.method.to_ascii_uppercase())
}

pub fn compare_capture_files(
    path_a: &Path,
    key_a: Option<&CipherKey>,
    path_b: &Path,
    key_b: Option<&CipherKey>,
) -> Result<CaptureDiff> {
    let (records_a, _) = load_records(path_a, key_a)?;
    let (records_b, _) = load_records(path_b, key_b)?;

    let (Some(last_a), Some(last_b)) = (records_a.last(), records_b.last()) else {
        return Err(Error::Storage(
            "both capture files must contain at least one record".to_string(),
        ));
    };

    let (headers_a, method_a) = signature(last_a);
    let (headers_b, method_b) = signature(last_b);

    Ok(CaptureDiff {
        headers_added: headers_b.difference(&headers_a).cloned().collect(),
        headers_removed: headers_a.difference(&headers_b).cloned().collect(),
        method_changed: method_a != method_b,
    })
}
