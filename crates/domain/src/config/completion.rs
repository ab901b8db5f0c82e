use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completion service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings for the external completion service and the orchestration
/// client in front of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Full URL of the prediction endpoint.
    #[serde(default = "d_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Bound on a blocking request.
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,
    /// Bound on connecting to, and on each chunk of, a streamed request.
    #[serde(default = "d_15000")]
    pub stream_timeout_ms: u64,
    /// Retries after the first attempt (network, timeout and 5xx only).
    #[serde(default = "d_2")]
    pub max_retries: u32,
    #[serde(default = "d_500")]
    pub backoff_base_ms: u64,
    #[serde(default = "d_8000")]
    pub backoff_max_ms: u64,
    /// Upper bound of the random delay added to each backoff.
    #[serde(default = "d_250")]
    pub backoff_jitter_ms: u64,
    #[serde(default = "d_30")]
    pub cache_ttl_secs: u64,
    /// Most recent turns kept when building a request.
    #[serde(default = "d_10")]
    pub history_limit: usize,
    /// Character budget for the clamped history.
    #[serde(default = "d_4000")]
    pub history_char_budget: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: d_endpoint(),
            auth: AuthConfig::default(),
            timeout_ms: 30_000,
            stream_timeout_ms: 15_000,
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            backoff_jitter_ms: 250,
            cache_ttl_secs: 30,
            history_limit: 10,
            history_char_budget: 4_000,
        }
    }
}

/// Where the completion service API key comes from.
///
/// Every field is optional; with none set, requests go out without an
/// `Authorization` header.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key (for config-only setups; prefer env or keychain).
    #[serde(default)]
    pub key: Option<String>,
    /// Keychain service name (e.g. "studysync").
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name (e.g. "completion-api-key").
    #[serde(default)]
    pub account: Option<String>,
}

impl AuthConfig {
    pub fn is_configured(&self) -> bool {
        self.env.is_some() || self.key.is_some() || (self.service.is_some() && self.account.is_some())
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_endpoint() -> String {
    "http://localhost:3000/api/v1/prediction".into()
}
fn d_30000() -> u64 {
    30_000
}
fn d_15000() -> u64 {
    15_000
}
fn d_2() -> u32 {
    2
}
fn d_500() -> u64 {
    500
}
fn d_8000() -> u64 {
    8_000
}
fn d_250() -> u64 {
    250
}
fn d_30() -> u64 {
    30
}
fn d_10() -> usize {
    10
}
fn d_4000() -> usize {
    4_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_section_uses_documented_defaults() {
        let cfg: CompletionConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.timeout_ms, 30_000);
        assert_eq!(cfg.stream_timeout_ms, 15_000);
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.cache_ttl_secs, 30);
        assert_eq!(cfg.history_limit, 10);
        assert_eq!(cfg.history_char_budget, 4_000);
        assert!(!cfg.auth.is_configured());
    }

    #[test]
    fn keychain_auth_needs_both_fields() {
        let auth = AuthConfig {
            service: Some("studysync".into()),
            ..Default::default()
        };
        assert!(!auth.is_configured());
        let auth = AuthConfig {
            service: Some("studysync".into()),
            account: Some("completion-api-key".into()),
            ..Default::default()
        };
        assert!(auth.is_configured());
    }
}
