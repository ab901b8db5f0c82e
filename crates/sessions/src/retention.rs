//! Retention and archival.
//!
//! Two independent bounds: [`soft_trim`] caps what an in-memory consumer
//! holds (nothing is deleted), and [`RetentionManager`] moves the oldest
//! messages of an oversized conversation into the archive in size-limited
//! batches.

use std::sync::Arc;

use serde::Serialize;

use ss_domain::config::RetentionConfig;
use ss_domain::error::{Error, Result};
use ss_domain::trace::TraceEvent;

use crate::batch::{ConversationUpdate, CountChange, WriteBatch};
use crate::store::{DocumentStore, MessageQuery};

/// The most recent `max_count` items of an oldest-first slice.
pub fn soft_trim<T>(items: &[T], max_count: usize) -> &[T] {
    &items[items.len().saturating_sub(max_count)..]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    pub conversation_id: String,
    pub archived: usize,
    pub batches: usize,
    /// Hot message count after the pass.
    pub hot_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub conversations: usize,
    pub archived: usize,
    pub failures: usize,
}

pub struct RetentionManager {
    store: Arc<dyn DocumentStore>,
    keep_last: usize,
    batch_ops: usize,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn DocumentStore>, config: &RetentionConfig) -> Self {
        Self {
            store,
            keep_last: config.keep_last,
            // An archive move is two operations; never go below one move.
            batch_ops: config.batch_ops.max(2),
        }
    }

    pub fn keep_last(&self) -> usize {
        self.keep_last
    }

    /// Archive everything but the newest `keep_last` messages.
    ///
    /// Each batch commits independently, so a failure part-way leaves the
    /// conversation consistent: every message is either hot or archived,
    /// never both, never neither. Running it again finishes the job.
    pub async fn archive_old_messages(
        &self,
        conversation_id: &str,
        keep_last: usize,
    ) -> Result<ArchiveReport> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {conversation_id}")))?;

        let total = self.store.count_messages(conversation_id).await?;
        if total <= keep_last {
            return Ok(ArchiveReport {
                conversation_id: conversation_id.to_owned(),
                archived: 0,
                batches: 0,
                hot_count: total,
            });
        }

        let overflow = total - keep_last;
        let oldest = self
            .store
            .query_messages(conversation_id, MessageQuery::oldest(overflow))
            .await?;

        let per_batch = self.batch_ops / 2;
        let mut archived = 0;
        let mut batches = 0;
        for chunk in oldest.chunks(per_batch) {
            let mut batch = WriteBatch::new();
            for message in chunk {
                batch.archive_message(conversation_id, &message.id);
            }
            if let Err(e) = self.store.commit(batch).await {
                tracing::warn!(
                    conversation_id,
                    archived,
                    batches,
                    error = %e,
                    "archive batch failed; earlier batches stay committed"
                );
                return Err(e);
            }
            archived += chunk.len();
            batches += 1;
        }

        // Re-count rather than subtract: appends may have landed meanwhile.
        let hot_count = self.store.count_messages(conversation_id).await?;
        let mut finish = WriteBatch::new();
        finish.update_conversation(
            conversation_id,
            ConversationUpdate {
                message_count: CountChange::Set(hot_count),
                ..Default::default()
            },
        );
        self.store.commit(finish).await?;

        TraceEvent::ArchivePass {
            conversation_id: conversation.id.clone(),
            archived,
            batches,
            hot_count,
        }
        .emit();

        Ok(ArchiveReport {
            conversation_id: conversation.id,
            archived,
            batches,
            hot_count,
        })
    }

    /// Run an archive pass over every conversation with the configured
    /// `keep_last`. Individual failures are logged and counted.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let ids = self.store.conversation_ids().await?;
        let mut report = SweepReport {
            conversations: ids.len(),
            ..Default::default()
        };
        for id in ids {
            match self.archive_old_messages(&id, self.keep_last).await {
                Ok(pass) => report.archived += pass.archived,
                // Deleted mid-sweep.
                Err(Error::NotFound(_)) => {}
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(conversation_id = %id, error = %e, "archive pass failed");
                }
            }
        }
        if report.archived > 0 || report.failures > 0 {
            tracing::info!(
                conversations = report.conversations,
                archived = report.archived,
                failures = report.failures,
                "retention sweep finished"
            );
        }
        Ok(report)
    }
}
