//! `studysync archive`: one archival pass against the local store snapshot.
//!
//! Operates on the snapshot directly, so run it while the server is stopped;
//! a running server would overwrite the result on its next flush.

use std::sync::Arc;

use anyhow::Context;

use ss_domain::clock::system_clock;
use ss_domain::config::Config;
use ss_sessions::{MemoryStore, RetentionManager};

pub async fn archive(
    config: Arc<Config>,
    conversation_id: String,
    keep_last: Option<usize>,
) -> anyhow::Result<()> {
    let store = Arc::new(
        MemoryStore::open(
            &config.store.state_path,
            system_clock(),
            config.store.max_batch_ops,
        )
        .context("opening conversation store")?,
    );
    let retention = RetentionManager::new(store.clone(), &config.retention);
    let keep_last = keep_last.unwrap_or_else(|| retention.keep_last());

    let report = retention
        .archive_old_messages(&conversation_id, keep_last)
        .await
        .with_context(|| format!("archiving conversation {conversation_id}"))?;
    store.flush().await.context("writing store snapshot")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
