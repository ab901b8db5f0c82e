mod completion;
mod observability;
mod rate_limit;
mod retention;
mod server;
mod store;
mod subscriptions;

pub use completion::*;
pub use observability::*;
pub use rate_limit::*;
pub use retention::*;
pub use server::*;
pub use store::*;
pub use subscriptions::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return every issue found.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut error = |field: &str, message: &str| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            })
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty");
        }
        if self.completion.endpoint.trim().is_empty() {
            error("completion.endpoint", "endpoint must not be empty");
        }
        if self.completion.timeout_ms == 0 || self.completion.stream_timeout_ms == 0 {
            error("completion.timeout_ms", "timeouts must be greater than 0");
        }
        if self.completion.history_limit == 0 {
            error("completion.history_limit", "history_limit must be at least 1");
        }
        if self.retention.keep_last == 0 {
            error("retention.keep_last", "keep_last must be at least 1");
        }
        if self.retention.batch_ops < 2 {
            error(
                "retention.batch_ops",
                "batch_ops must allow at least one archive move (2 operations)",
            );
        }
        if self.retention.batch_ops > self.store.max_batch_ops {
            error(
                "retention.batch_ops",
                "batch_ops must not exceed store.max_batch_ops",
            );
        }
        if self.rate_limit.api.max_requests == 0 || self.rate_limit.messages.max_requests == 0 {
            error("rate_limit", "max_requests must be greater than 0");
        }
        if self.rate_limit.api.window_secs == 0 || self.rate_limit.messages.window_secs == 0 {
            error("rate_limit", "window_secs must be greater than 0");
        }

        if self.retention.soft_quota > self.retention.keep_last {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "retention.soft_quota".into(),
                message: "soft_quota exceeds keep_last; AI context is bounded by keep_last".into(),
            });
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        errors
    }
}
