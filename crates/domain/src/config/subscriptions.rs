use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Real-time subscriptions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionsConfig {
    /// Window used when a subscriber does not ask for one.
    #[serde(default = "d_50")]
    pub default_window: usize,
    /// Largest window a subscriber may request.
    #[serde(default = "d_500")]
    pub max_window: usize,
    /// Snapshots buffered per subscriber before the refresh task waits.
    #[serde(default = "d_16")]
    pub channel_capacity: usize,
    /// Consecutive failed refreshes before a subscription reports `Stalled`.
    #[serde(default = "d_3")]
    pub stall_threshold: u32,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            default_window: 50,
            max_window: 500,
            channel_capacity: 16,
            stall_threshold: 3,
        }
    }
}

impl SubscriptionsConfig {
    /// Resolve a requested window against the default and the ceiling.
    pub fn window(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_window)
            .clamp(1, self.max_window.max(1))
    }
}

fn d_50() -> usize {
    50
}
fn d_500() -> usize {
    500
}
fn d_16() -> usize {
    16
}
fn d_3() -> u32 {
    3
}
