//! Message feedback log.
//!
//! Thumbs-up/down submissions are appended to `feedback.jsonl` under the
//! state path and mirrored in memory for stats.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use ss_domain::clock::SharedClock;
use ss_domain::error::{Error, Result};
use ss_domain::model::Feedback;
use ss_domain::trace::TraceEvent;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    pub message_id: String,
    pub chat_id: String,
    pub feedback: Feedback,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub id: String,
    pub message_id: String,
    pub chat_id: String,
    pub feedback: Feedback,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackStats {
    pub total: usize,
    pub positive: usize,
    pub negative: usize,
    /// Share of positive ratings in `[0, 1]`, two decimals.
    pub positive_rate: f64,
}

pub struct FeedbackStore {
    inner: RwLock<Vec<FeedbackRecord>>,
    persist_path: Option<PathBuf>,
    clock: SharedClock,
}

impl FeedbackStore {
    /// Load `state_path/feedback.jsonl`, skipping unreadable lines.
    pub fn new(state_path: &Path, clock: SharedClock) -> Self {
        let persist_path = state_path.join("feedback.jsonl");
        let mut records = Vec::new();
        if let Ok(data) = std::fs::read_to_string(&persist_path) {
            records.extend(
                data.lines()
                    .filter_map(|line| serde_json::from_str::<FeedbackRecord>(line).ok()),
            );
            if !records.is_empty() {
                tracing::info!(count = records.len(), "loaded feedback from disk");
            }
        }
        Self {
            inner: RwLock::new(records),
            persist_path: Some(persist_path),
            clock,
        }
    }

    pub fn in_memory(clock: SharedClock) -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
            persist_path: None,
            clock,
        }
    }

    pub async fn submit(&self, submission: FeedbackSubmission) -> Result<FeedbackRecord> {
        if submission.message_id.trim().is_empty() || submission.chat_id.trim().is_empty() {
            return Err(Error::Validation(
                "messageId and chatId are required".into(),
            ));
        }

        let record = FeedbackRecord {
            id: Uuid::new_v4().to_string(),
            message_id: submission.message_id,
            chat_id: submission.chat_id,
            feedback: submission.feedback,
            reason: submission.reason.filter(|r| !r.trim().is_empty()),
            message_text: submission.message_text,
            created_at: self.clock.now(),
        };

        if let Some(path) = &self.persist_path {
            append_line(path, &record).await?;
        }
        self.inner.write().await.push(record.clone());

        TraceEvent::FeedbackRecorded {
            feedback_id: record.id.clone(),
            message_id: record.message_id.clone(),
            positive: record.feedback == Feedback::Up,
        }
        .emit();

        Ok(record)
    }

    /// Totals across every conversation, or one when `chat_id` is given.
    pub async fn stats(&self, chat_id: Option<&str>) -> FeedbackStats {
        let records = self.inner.read().await;
        let (mut positive, mut negative) = (0, 0);
        for record in records
            .iter()
            .filter(|r| chat_id.map_or(true, |id| r.chat_id == id))
        {
            match record.feedback {
                Feedback::Up => positive += 1,
                Feedback::Down => negative += 1,
            }
        }
        let total = positive + negative;
        let positive_rate = if total == 0 {
            0.0
        } else {
            (positive as f64 / total as f64 * 100.0).round() / 100.0
        };
        FeedbackStats {
            total,
            positive,
            negative,
            positive_rate,
        }
    }
}

async fn append_line(path: &Path, record: &FeedbackRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ss_domain::clock::ManualClock;

    use super::*;

    fn submission(chat: &str, feedback: Feedback) -> FeedbackSubmission {
        FeedbackSubmission {
            message_id: "m1".into(),
            chat_id: chat.into(),
            feedback,
            reason: None,
            message_text: None,
        }
    }

    #[tokio::test]
    async fn stats_round_positive_rate() {
        let store = FeedbackStore::in_memory(Arc::new(ManualClock::starting_now()));
        for f in [Feedback::Up, Feedback::Up, Feedback::Down] {
            store.submit(submission("c1", f)).await.unwrap();
        }
        store.submit(submission("c2", Feedback::Down)).await.unwrap();

        let c1 = store.stats(Some("c1")).await;
        assert_eq!((c1.total, c1.positive, c1.negative), (3, 2, 1));
        assert_eq!(c1.positive_rate, 0.67);

        let all = store.stats(None).await;
        assert_eq!(all.total, 4);
        assert_eq!(all.positive_rate, 0.5);
    }

    #[tokio::test]
    async fn empty_stats_have_zero_rate() {
        let store = FeedbackStore::in_memory(Arc::new(ManualClock::starting_now()));
        assert_eq!(store.stats(None).await.positive_rate, 0.0);
    }

    #[tokio::test]
    async fn records_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let clock: SharedClock = Arc::new(ManualClock::starting_now());
        {
            let store = FeedbackStore::new(dir.path(), clock.clone());
            store.submit(submission("c1", Feedback::Up)).await.unwrap();
        }
        let reloaded = FeedbackStore::new(dir.path(), clock);
        assert_eq!(reloaded.stats(Some("c1")).await.positive, 1);
    }

    #[tokio::test]
    async fn missing_ids_are_rejected() {
        let store = FeedbackStore::in_memory(Arc::new(ManualClock::starting_now()));
        let err = store.submit(submission("", Feedback::Up)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
