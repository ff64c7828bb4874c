//! Declarative guardrails applied before a replay touches the network.

use cookie_monster_core::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// One ordered deny rule; the first matching rule denies the replay.
/// Globs support `*` and `?`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyRule {
    pub host_glob: String,
    /// Methods the rule applies to; empty = all.
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default = "default_path_glob")]
    pub path_glob: String,
}

fn default_path_glob() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayPolicy {
    /// Hosts (or parent domains) replays may target; empty = no allowlist.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Hosts (or parent domains) always refused, checked before the allowlist.
    #[serde(default)]
    pub denied_domains: Vec<String>,
    #[serde(default)]
    pub deny_rules: Vec<DenyRule>,
    /// Require the replay host to equal the selected capture's host.
    #[serde(default)]
    pub enforce_capture_host: bool,
}

/// Host equality or dot-suffix match: `a.example` matches `a.example` and
/// `login.a.example`, never `evil-a.example`.
fn domain_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim().to_ascii_lowercase();
    if domain.is_empty() {
        return false;
    }
    host == domain || host.ends_with(&format!(".{}", domain))
}

impl ReplayPolicy {
    /// Whether `host` passes the deny/allow domain lists. Used both for the
    /// pre-flight check and for re-checking cross-host redirect targets.
    pub fn host_allowed(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if self.denied_domains.iter().any(|d| domain_matches(&host, d)) {
            return false;
        }
        if self.allowed_domains.is_empty() {
            return true;
        }
        self.allowed_domains.iter().any(|d| domain_matches(&host, d))
    }

    /// Full pre-flight validation of the outbound URL and method.
    pub fn check(&self, url: &Url, method: &str) -> Result<()> {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

        if self.denied_domains.iter().any(|d| domain_matches(&host, d)) {
            return Err(Error::DomainNotAllowed(format!(
                "host '{}' is denied by policy",
                host
            )));
        }
        if !self.allowed_domains.is_empty()
            && !self.allowed_domains.iter().any(|d| domain_matches(&host, d))
        {
            return Err(Error::DomainNotAllowed(format!(
                "host '{}' is not in the domain allowlist",
                host
            )));
        }

        let path = url.path();
        for (rule_index, rule) in self.deny_rules.iter().enumerate() {
            let method_applies = rule.methods.is_empty()
                || rule.methods.iter().any(|m| m.eq_ignore_ascii_case(method));
            if method_applies
                && glob_match(&rule.host_glob, &host)
                && glob_match(&rule.path_glob, path)
            {
                return Err(Error::PolicyDenied { rule_index });
            }
        }
        Ok(())
    }
}

/// Case-insensitive glob match with `*` (any run) and `?` (any one char).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let text: Vec<char> = text.to_ascii_lowercase().chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut star_text = 0usize;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_text = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            star_text += 1;
            t = star_text;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn glob_basics() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*.example", "api.example"));
        assert!(glob_match("api.*.example", "api.eu.example"));
        assert!(glob_match("/admin/*", "/admin/users"));
        assert!(!glob_match("/admin/*", "/public"));
        assert!(glob_match("h?st", "host"));
        assert!(!glob_match("h?st", "heist"));
    }

    #[test]
    fn empty_policy_allows_everything() {
        let policy = ReplayPolicy::default();
        assert!(policy.check(&url("https://anywhere.example/x"), "GET").is_ok());
    }

    #[test]
    fn allowlist_with_dot_suffix_semantics() {
        let policy = ReplayPolicy {
            allowed_domains: vec!["a.example".to_string()],
            ..Default::default()
        };
        assert!(policy.check(&url("https://a.example/x"), "GET").is_ok());
        assert!(policy.check(&url("https://login.a.example/x"), "GET").is_ok());
        match policy.check(&url("https://evil-a.example/x"), "GET") {
            Err(Error::DomainNotAllowed(_)) => {}
            other => panic!("expected DomainNotAllowed, got {:?}", other),
        }
    }

    #[test]
    fn denied_domains_beat_the_allowlist() {
        let policy = ReplayPolicy {
            allowed_domains: vec!["example".to_string()],
            denied_domains: vec!["internal.example".to_string()],
            ..Default::default()
        };
        assert!(policy.check(&url("https://www.example/"), "GET").is_ok());
        assert!(policy.check(&url("https://internal.example/"), "GET").is_err());
    }

    #[test]
    fn first_matching_deny_rule_wins_with_its_index() {
        let policy = ReplayPolicy {
            deny_rules: vec![
                DenyRule {
                    host_glob: "*.bank.example".to_string(),
                    methods: vec!["POST".to_string()],
                    path_glob: "/transfer/*".to_string(),
                },
                DenyRule {
                    host_glob: "*".to_string(),
                    methods: vec![],
                    path_glob: "/admin/*".to_string(),
                },
            ],
            ..Default::default()
        };
        // GET is not covered by rule 0.
        assert!(policy
            .check(&url("https://api.bank.example/transfer/new"), "GET")
            .is_ok());
        match policy.check(&url("https://api.bank.example/transfer/new"), "POST") {
            Err(Error::PolicyDenied { rule_index: 0 }) => {}
            other => panic!("expected rule 0, got {:?}", other),
        }
        match policy.check(&url("https://any.example/admin/panel"), "DELETE") {
            Err(Error::PolicyDenied { rule_index: 1 }) => {}
            other => panic!("expected rule 1, got {:?}", other),
        }
    }

    #[test]
    fn host_allowed_mirrors_domain_checks() {
        let policy = ReplayPolicy {
            allowed_domains: vec!["a.example".to_string()],
            ..Default::default()
        };
        assert!(policy.host_allowed("a.example"));
        assert!(policy.host_allowed("sub.a.example"));
        assert!(!policy.host_allowed("b.example"));
    }
}
