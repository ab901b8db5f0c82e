use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retention & archival
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Soft quota: most recent messages considered when building AI context.
    /// Never affects storage.
    #[serde(default = "d_500")]
    pub soft_quota: usize,
    /// Hard retention ceiling: hot messages kept per conversation before
    /// the overflow is archived.
    #[serde(default = "d_10000")]
    pub keep_last: usize,
    /// Operations per archival commit. Each archived message costs two
    /// (archive put + hot delete), so this must stay below the store's
    /// per-commit limit.
    #[serde(default = "d_450")]
    pub batch_ops: usize,
    /// Interval of the background archival sweep. `0` disables it.
    #[serde(default = "d_3600")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            soft_quota: 500,
            keep_last: 10_000,
            batch_ops: 450,
            sweep_interval_secs: 3_600,
        }
    }
}

fn d_500() -> usize {
    500
}
fn d_10000() -> usize {
    10_000
}
fn d_450() -> usize {
    450
}
fn d_3600() -> u64 {
    3_600
}
