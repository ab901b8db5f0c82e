//! Opaque pagination cursors.
//!
//! A cursor encodes the ordering key of the last item a page returned:
//! `<micros since epoch>:<document id>`. Ids break ties between documents
//! sharing a timestamp.

use chrono::{DateTime, Utc};

use ss_domain::error::{Error, Result};
use ss_domain::model::{Conversation, Message};

/// Ordering key of a message inside its conversation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessagePosition {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl MessagePosition {
    pub fn of(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            id: message.id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        encode(self.created_at, &self.id)
    }

    pub fn decode(cursor: &str) -> Result<Self> {
        let (created_at, id) = decode(cursor)?;
        Ok(Self { created_at, id })
    }
}

/// Ordering key of a conversation in an owner's list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConversationPosition {
    pub updated_at: DateTime<Utc>,
    pub id: String,
}

impl ConversationPosition {
    pub fn of(conversation: &Conversation) -> Self {
        Self {
            updated_at: conversation.updated_at,
            id: conversation.id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        encode(self.updated_at, &self.id)
    }

    pub fn decode(cursor: &str) -> Result<Self> {
        let (updated_at, id) = decode(cursor)?;
        Ok(Self { updated_at, id })
    }
}

fn encode(at: DateTime<Utc>, id: &str) -> String {
    format!("{}:{}", at.timestamp_micros(), id)
}

fn decode(cursor: &str) -> Result<(DateTime<Utc>, String)> {
    let invalid = || Error::Validation(format!("invalid cursor: {cursor:?}"));
    let (micros, id) = cursor.split_once(':').ok_or_else(invalid)?;
    if id.is_empty() {
        return Err(invalid());
    }
    let micros: i64 = micros.parse().map_err(|_| invalid())?;
    let at = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(invalid)?;
    Ok((at, id.to_owned()))
}
