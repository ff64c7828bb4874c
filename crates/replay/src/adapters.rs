//! Site adapters: stateless, named header tweaks for services whose captures
//! need a nudge before replaying (extra API-key headers, accept types).
//!
//! The registry is handed to the facade and replay engine at construction;
//! nothing here holds state.

use cookie_monster_core::CaptureRecord;
use std::collections::HashMap;
use std::sync::Arc;

pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;
    /// Whether this adapter wants to handle the given host.
    fn host_matches(&self, host: &str) -> bool;
    /// Rewrite the outbound headers, with the selected capture available for
    /// context (e.g. to copy a companion header forward).
    fn rewrite_headers(&self, capture: &CaptureRecord, headers: &mut HashMap<String, String>);
}

/// Supabase pairs every `Authorization: Bearer ...` with a project `apikey`
/// header; replays that drop it get 401s even with a live session.
struct SupabaseAdapter;

impl Adapter for SupabaseAdapter {
    fn name(&self) -> &'static str {
        "supabase"
    }

    fn host_matches(&self, host: &str) -> bool {
        host.ends_with("supabase.com") || host.ends_with("supabase.co")
    }

    fn rewrite_headers(&self, capture: &CaptureRecord, headers: &mut HashMap<String, String>) {
        let has_apikey = headers.keys().any(|k| k.eq_ignore_ascii_case("apikey"));
        if !has_apikey {
            if let Some(value) = capture.header("apikey") {
                headers.insert("apikey".to_string(), value.to_string());
            }
        }
    }
}

/// GitHub's REST API wants an explicit JSON accept type; captures from the
/// web UI usually carry `text/html`.
struct GithubAdapter;

impl Adapter for GithubAdapter {
    fn name(&self) -> &'static str {
        "github"
    }

    fn host_matches(&self, host: &str) -> bool {
        host == "github.com" || host.ends_with(".github.com")
    }

    fn rewrite_headers(&self, _capture: &CaptureRecord, headers: &mut HashMap<String, String>) {
        headers.retain(|k, _| !k.eq_ignore_ascii_case("accept"));
        headers.insert("Accept".to_string(), "application/vnd.github+json".to_string());
    }
}

/// Gmail endpoints are picky about missing origin context.
struct GmailAdapter;

impl Adapter for GmailAdapter {
    fn name(&self) -> &'static str {
        "gmail"
    }

    fn host_matches(&self, host: &str) -> bool {
        host == "mail.google.com" || host == "gmail.com"
    }

    fn rewrite_headers(&self, _capture: &CaptureRecord, headers: &mut HashMap<String, String>) {
        let has_origin = headers.keys().any(|k| k.eq_ignore_ascii_case("origin"));
        if !has_origin {
            headers.insert("Origin".to_string(), "https://mail.google.com".to_string());
        }
    }
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// Registry with no adapters; replays pass headers through untouched.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self {
            adapters: vec![
                Arc::new(SupabaseAdapter),
                Arc::new(GithubAdapter),
                Arc::new(GmailAdapter),
            ],
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.push(adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        let name = name.trim().to_ascii_lowercase();
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    pub fn auto_detect(&self, host: &str) -> Option<Arc<dyn Adapter>> {
        let host = host.to_ascii_lowercase();
        self.adapters.iter().find(|a| a.host_matches(&host)).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup_by_name() {
        let registry = AdapterRegistry::builtin();
        assert!(registry.get("supabase").is_some());
        assert!(registry.get(" GitHub ").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn auto_detect_by_host() {
        let registry = AdapterRegistry::builtin();
        assert_eq!(registry.auto_detect("db.supabase.co").unwrap().name(), "supabase");
        assert_eq!(registry.auto_detect("api.github.com").unwrap().name(), "github");
        assert!(registry.auto_detect("example.com").is_none());
    }

    #[test]
    fn supabase_copies_apikey_forward() {
        let registry = AdapterRegistry::builtin();
        let adapter = registry.get("supabase").unwrap();

        let mut capture = CaptureRecord::new("1", "GET", "https://db.supabase.co/rest/v1/t");
        capture.headers.insert("apikey".to_string(), "anon-key".to_string());
        capture
            .headers
            .insert("Authorization".to_string(), "Bearer jwt".to_string());

        let mut headers: HashMap<String, String> =
            [("Authorization".to_string(), "Bearer jwt".to_string())].into();
        adapter.rewrite_headers(&capture, &mut headers);
        assert_eq!(headers.get("apikey").map(String::as_str), Some("anon-key"));
    }

    #[test]
    fn github_forces_json_accept() {
        let registry = AdapterRegistry::builtin();
        let adapter = registry.get("github").unwrap();
        let capture = CaptureRecord::new("1", "GET", "https://github.com/");
        let mut headers: HashMap<String, String> =
            [("Accept".to_string(), "text/html".to_string())].into();
        adapter.rewrite_headers(&capture, &mut headers);
        assert_eq!(
            headers.get("Accept").map(String::as_str),
            Some("application/vnd.github+json")
        );
    }
}
