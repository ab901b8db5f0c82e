//! The write path: conversation creation and message appends.
//!
//! Every append commits the message together with its conversation
//! metadata (`updated_at`, `message_count`, derived title) in one batch, so
//! readers never observe a message without the matching metadata.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use ss_domain::config::StoreConfig;
use ss_domain::error::{Error, Result};
use ss_domain::model::{
    derive_title, Conversation, ConversationMeta, Feedback, Message, Persona, Role, DEFAULT_TITLE,
};
use ss_domain::trace::TraceEvent;

use crate::batch::{ConversationUpdate, CountChange, WriteBatch};
use crate::store::{DocumentStore, MessageQuery};

pub struct MessageWriter {
    store: Arc<dyn DocumentStore>,
    existence_retries: u32,
    existence_retry_delay: Duration,
}

impl MessageWriter {
    pub fn new(store: Arc<dyn DocumentStore>, config: &StoreConfig) -> Self {
        Self::with_existence_policy(
            store,
            config.existence_retries,
            Duration::from_millis(config.existence_retry_delay_ms),
        )
    }

    pub fn with_existence_policy(
        store: Arc<dyn DocumentStore>,
        retries: u32,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            existence_retries: retries.max(1),
            existence_retry_delay: delay,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // ── Conversations ─────────────────────────────────────────────────

    /// Create a conversation. Blank or missing titles start as the default
    /// so the first user message can name it. Timestamps come from the
    /// store's clock on insert.
    pub async fn create_conversation(
        &self,
        owner_id: &str,
        persona: Persona,
        title: Option<&str>,
    ) -> Result<Conversation> {
        if owner_id.trim().is_empty() {
            return Err(Error::Validation("owner id is required".into()));
        }
        let title = title
            .and_then(derive_title)
            .unwrap_or_else(|| DEFAULT_TITLE.to_owned());

        let unstamped = chrono::DateTime::<chrono::Utc>::default();
        let conversation = self
            .store
            .insert_conversation(Conversation {
                id: Uuid::new_v4().to_string(),
                title,
                owner_id: owner_id.to_owned(),
                persona,
                created_at: unstamped,
                updated_at: unstamped,
                meta: ConversationMeta::default(),
            })
            .await?;

        TraceEvent::ConversationCreated {
            conversation_id: conversation.id.clone(),
            owner_id: conversation.owner_id.clone(),
        }
        .emit();

        Ok(conversation)
    }

    /// Look a conversation up once.
    pub async fn conversation(&self, id: &str) -> Result<Conversation> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }

    /// Look a conversation up, tolerating a freshly created one that is not
    /// visible yet: up to `existence_retries` attempts with a fixed delay.
    pub async fn wait_for_conversation(&self, id: &str) -> Result<Conversation> {
        for attempt in 1..=self.existence_retries {
            if let Some(conversation) = self.store.get_conversation(id).await? {
                return Ok(conversation);
            }
            if attempt < self.existence_retries {
                tracing::debug!(conversation_id = id, attempt, "conversation not visible yet");
                tokio::time::sleep(self.existence_retry_delay).await;
            }
        }
        Err(Error::NotFound(format!("conversation {id}")))
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<usize> {
        let removed = self.store.delete_conversation(id).await?;
        TraceEvent::ConversationDeleted {
            conversation_id: id.to_owned(),
            messages_removed: removed,
        }
        .emit();
        Ok(removed)
    }

    // ── Messages ──────────────────────────────────────────────────────

    /// Append a user message and return its id.
    pub async fn append_user_message(&self, conversation_id: &str, text: &str) -> Result<String> {
        Ok(self.append(conversation_id, Role::User, text).await?.id)
    }

    /// Append an assistant message and return its id.
    pub async fn append_assistant_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<String> {
        Ok(self.append(conversation_id, Role::Assistant, text).await?.id)
    }

    /// Append a message and return it as stored.
    pub async fn append(&self, conversation_id: &str, role: Role, text: &str) -> Result<Message> {
        if conversation_id.trim().is_empty() {
            return Err(Error::Validation("conversation id is required".into()));
        }
        if text.trim().is_empty() {
            return Err(Error::Validation("message text must not be empty".into()));
        }

        let conversation = self.wait_for_conversation(conversation_id).await?;
        let title_if_default = if conversation.has_default_title() {
            self.title_candidate(conversation_id, role, text).await?
        } else {
            None
        };

        let mut batch = WriteBatch::new();
        batch.insert_message(conversation_id, role, text).update_conversation(
            conversation_id,
            ConversationUpdate {
                touch: true,
                message_count: CountChange::Add(1),
                title_if_default: title_if_default.clone(),
            },
        );
        let receipt = self.store.commit(batch).await?;

        let message = receipt
            .inserted
            .into_iter()
            .next()
            .ok_or_else(|| Error::Store("commit returned no inserted message".into()))?;
        let updated = receipt.conversations.into_iter().next();

        if let (Some(candidate), Some(updated)) = (&title_if_default, &updated) {
            if updated.title == *candidate && conversation.has_default_title() {
                TraceEvent::TitleDerived {
                    conversation_id: conversation_id.to_owned(),
                    title: candidate.clone(),
                }
                .emit();
            }
        }
        TraceEvent::MessageAppended {
            conversation_id: conversation_id.to_owned(),
            message_id: message.id.clone(),
            role: role.as_str().to_owned(),
            message_count: updated.map_or(0, |c| c.meta.message_count),
        }
        .emit();

        Ok(message)
    }

    /// The title is derived from the first user message, whichever append
    /// happens to carry it.
    async fn title_candidate(
        &self,
        conversation_id: &str,
        role: Role,
        text: &str,
    ) -> Result<Option<String>> {
        let first_user = self
            .store
            .query_messages(
                conversation_id,
                MessageQuery {
                    role: Some(Role::User),
                    ..MessageQuery::oldest(1)
                },
            )
            .await?;
        Ok(match first_user.first() {
            Some(first) => derive_title(&first.text),
            None if role == Role::User => derive_title(text),
            None => None,
        })
    }

    pub async fn set_feedback(
        &self,
        conversation_id: &str,
        message_id: &str,
        feedback: Feedback,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.set_feedback(conversation_id, message_id, feedback);
        self.store.commit(batch).await?;
        Ok(())
    }
}
