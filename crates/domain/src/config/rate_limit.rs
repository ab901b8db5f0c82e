use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sliding-window rate limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// General API limit, keyed by caller.
    #[serde(default = "d_api")]
    pub api: WindowLimit,
    /// Message sends, keyed by conversation owner.
    #[serde(default = "d_messages")]
    pub messages: WindowLimit,
    /// How often expired windows and cache entries are swept. `0` disables it.
    #[serde(default = "d_1800")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api: d_api(),
            messages: d_messages(),
            sweep_interval_secs: 1_800,
        }
    }
}

/// `max_requests` calls per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub max_requests: u32,
    pub window_secs: u64,
}

fn d_api() -> WindowLimit {
    WindowLimit {
        max_requests: 100,
        window_secs: 15 * 60,
    }
}
fn d_messages() -> WindowLimit {
    WindowLimit {
        max_requests: 20,
        window_secs: 60,
    }
}
fn d_1800() -> u64 {
    1_800
}
