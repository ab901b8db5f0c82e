//! The ordered, transactional document store the rest of the crate is
//! written against.
//!
//! A store holds conversations, their hot message log (ordered by the
//! server-assigned `created_at`), and an append-only archive. Multi-document
//! writes go through [`WriteBatch`] and are all-or-nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use ss_domain::error::Result;
use ss_domain::model::{ArchivedMessage, Conversation, Message, Role};

use crate::batch::WriteBatch;
use crate::cursor::{ConversationPosition, MessagePosition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Oldest first.
    #[default]
    Asc,
    /// Newest first.
    Desc,
}

/// Query over one conversation's hot messages.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub direction: Direction,
    pub limit: Option<usize>,
    /// Exclusive position to resume from, in the query's direction.
    pub start_after: Option<MessagePosition>,
    pub role: Option<Role>,
}

impl MessageQuery {
    pub fn newest(limit: usize) -> Self {
        Self {
            direction: Direction::Desc,
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn oldest(limit: usize) -> Self {
        Self {
            direction: Direction::Asc,
            limit: Some(limit),
            ..Default::default()
        }
    }
}

/// Query over one owner's conversations, always `updated_at` descending.
#[derive(Debug, Clone, Default)]
pub struct ConversationQuery {
    pub limit: Option<usize>,
    pub start_after: Option<ConversationPosition>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Change feed
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Coarse change notification. Subscribers re-query on receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Messages { conversation_id: String },
    Conversations { owner_id: String },
}

/// What a committed batch produced.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub committed_at: DateTime<Utc>,
    /// Messages inserted by the batch, with their assigned ids and timestamps.
    pub inserted: Vec<Message>,
    /// Post-commit state of every conversation the batch updated.
    pub conversations: Vec<Conversation>,
}

impl CommitReceipt {
    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DocumentStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new conversation, stamping its server timestamps.
    async fn insert_conversation(&self, conversation: Conversation) -> Result<Conversation>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Remove a conversation together with its hot and archived messages.
    /// Returns the number of messages removed.
    async fn delete_conversation(&self, id: &str) -> Result<usize>;

    async fn conversation_ids(&self) -> Result<Vec<String>>;

    async fn query_conversations(
        &self,
        owner_id: &str,
        query: ConversationQuery,
    ) -> Result<Vec<Conversation>>;

    async fn query_messages(
        &self,
        conversation_id: &str,
        query: MessageQuery,
    ) -> Result<Vec<Message>>;

    async fn count_messages(&self, conversation_id: &str) -> Result<usize>;

    async fn archived_messages(&self, conversation_id: &str) -> Result<Vec<ArchivedMessage>>;

    /// Apply every operation in the batch atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt>;

    fn watch(&self) -> broadcast::Receiver<StoreChange>;
}
