//! Session-health analysis over a set of captures: is there a cookie at all,
//! how many bearer tokens were seen, and has the most recent JWT expired.

use chrono::{DateTime, Utc};
use cookie_monster_core::CaptureRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHealth {
    pub has_cookie: bool,
    pub bearer_token_count: usize,
    pub jwt_expired: Option<bool>,
    pub jwt_expires_at: Option<String>,
}

/// Best-effort decode of a JWT `exp` claim. Returns `None` for anything that
/// is not a well-formed JWT; opaque bearer tokens are common and fine.
fn decode_jwt_exp(token: &str) -> Option<DateTime<Utc>> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::<Utc>::from_timestamp(exp, 0)
}

pub fn analyze(records: &[CaptureRecord]) -> SessionHealth {
    let mut has_cookie = false;
    let mut bearer_tokens: Vec<String> = Vec::new();

    for record in records {
        if record.header("cookie").is_some() {
            has_cookie = true;
        }
        if let Some(auth) = record.header("authorization") {
            if auth.len() > 7 && auth[..7].eq_ignore_ascii_case("bearer ") {
                bearer_tokens.push(auth[7..].trim().to_string());
            }
        }
    }

    let mut jwt_expired = None;
    let mut jwt_expires_at = None;
    if let Some(token) = bearer_tokens.last() {
        if let Some(exp) = decode_jwt_exp(token) {
            jwt_expires_at = Some(exp.to_rfc3339());
            jwt_expired = Some(exp <= Utc::now());
        }
    }

    SessionHealth {
        has_cookie,
        bearer_token_count: bearer_tokens.len(),
        jwt_expired,
        jwt_expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn record_with(headers: &[(&str, &str)]) -> CaptureRecord {
        let mut r = CaptureRecord::new("1", "GET", "https://a.example/x");
        for (k, v) in headers {
            r.headers.insert(k.to_string(), v.to_string());
        }
        r
    }

    fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp).as_bytes());
        format!("{}.{}.sig", header, payload)
    }

    #[test]
    fn empty_store_has_no_auth() {
        let health = analyze(&[]);
        assert!(!health.has_cookie);
        assert_eq!(health.bearer_token_count, 0);
        assert_eq!(health.jwt_expired, None);
    }

    #[test]
    fn counts_cookies_and_bearer_tokens() {
        let records = vec![
            record_with(&[("Cookie", "s=1")]),
            record_with(&[("Authorization", "Bearer opaque-token")]),
        ];
        let health = analyze(&records);
        assert!(health.has_cookie);
        assert_eq!(health.bearer_token_count, 1);
        // Opaque token: no expiry info.
        assert_eq!(health.jwt_expired, None);
    }

    #[test]
    fn expired_jwt_is_flagged() {
        let token = jwt_with_exp(1_000_000_000); // 2001
        let records = vec![record_with(&[("Authorization", &format!("Bearer {}", token))])];
        let health = analyze(&records);
        assert_eq!(health.jwt_expired, Some(true));
        assert!(health.jwt_expires_at.is_some());
    }

    #[test]
    fn future_jwt_is_not_expired() {
        let token = jwt_with_exp(4_000_000_000); // 2096
        let records = vec![record_with(&[("Authorization", &format!("Bearer {}", token))])];
        let health = analyze(&records);
        assert_eq!(health.jwt_expired, Some(false));
    }
}
