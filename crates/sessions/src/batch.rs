//! Atomic multi-document writes.

use ss_domain::model::{Feedback, Role};

/// How a conversation's hot message count changes in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountChange {
    #[default]
    Unchanged,
    /// Server-side increment; safe under concurrent appends.
    Add(usize),
    Set(usize),
}

/// Field updates applied to a conversation document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationUpdate {
    /// Bump `updated_at` to the commit time.
    pub touch: bool,
    pub message_count: CountChange,
    /// Applied only while the stored title is still the default, which
    /// makes title derivation idempotent under concurrent first messages.
    pub title_if_default: Option<String>,
}

#[derive(Debug, Clone)]
pub enum WriteOp {
    InsertMessage {
        conversation_id: String,
        role: Role,
        text: String,
    },
    UpdateConversation {
        conversation_id: String,
        update: ConversationUpdate,
    },
    /// Copy a hot message into the archive, stamped with the commit time.
    PutArchived {
        conversation_id: String,
        message_id: String,
    },
    DeleteMessage {
        conversation_id: String,
        message_id: String,
    },
    SetFeedback {
        conversation_id: String,
        message_id: String,
        feedback: Feedback,
    },
}

/// An ordered list of operations committed all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_message(&mut self, conversation_id: &str, role: Role, text: &str) -> &mut Self {
        self.ops.push(WriteOp::InsertMessage {
            conversation_id: conversation_id.to_owned(),
            role,
            text: text.to_owned(),
        });
        self
    }

    pub fn update_conversation(
        &mut self,
        conversation_id: &str,
        update: ConversationUpdate,
    ) -> &mut Self {
        self.ops.push(WriteOp::UpdateConversation {
            conversation_id: conversation_id.to_owned(),
            update,
        });
        self
    }

    /// Move a message from the hot log into the archive (two operations).
    pub fn archive_message(&mut self, conversation_id: &str, message_id: &str) -> &mut Self {
        self.ops.push(WriteOp::PutArchived {
            conversation_id: conversation_id.to_owned(),
            message_id: message_id.to_owned(),
        });
        self.ops.push(WriteOp::DeleteMessage {
            conversation_id: conversation_id.to_owned(),
            message_id: message_id.to_owned(),
        });
        self
    }

    pub fn set_feedback(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        feedback: Feedback,
    ) -> &mut Self {
        self.ops.push(WriteOp::SetFeedback {
            conversation_id: conversation_id.to_owned(),
            message_id: message_id.to_owned(),
            feedback,
        });
        self
    }

    /// Number of operations, as counted against the store's batch ceiling.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}
