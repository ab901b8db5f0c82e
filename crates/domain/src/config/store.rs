use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the store snapshot and the feedback log.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// How often the in-memory store is snapshotted to disk. `0` disables the
    /// periodic snapshot; the server still writes one on shutdown.
    #[serde(default = "d_30")]
    pub flush_interval_secs: u64,
    /// Existence-check attempts before a write against a conversation that
    /// is not yet visible fails with `NotFound`.
    #[serde(default = "d_3")]
    pub existence_retries: u32,
    /// Fixed delay between existence-check attempts.
    #[serde(default = "d_1000")]
    pub existence_retry_delay_ms: u64,
    /// Per-commit operation ceiling enforced by the store.
    #[serde(default = "d_500")]
    pub max_batch_ops: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            flush_interval_secs: 30,
            existence_retries: 3,
            existence_retry_delay_ms: 1_000,
            max_batch_ops: 500,
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_30() -> u64 {
    30
}
fn d_3() -> u32 {
    3
}
fn d_1000() -> u64 {
    1_000
}
fn d_500() -> usize {
    500
}
