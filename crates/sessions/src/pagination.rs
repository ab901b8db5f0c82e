//! Cursor pagination over message history and conversation lists.

use std::sync::Arc;

use serde::Serialize;

use ss_domain::error::{Error, Result};
use ss_domain::model::{Conversation, Message};

use crate::cursor::{ConversationPosition, MessagePosition};
use crate::store::{ConversationQuery, DocumentStore, MessageQuery};

/// Largest page any caller may ask for.
pub const MAX_PAGE_SIZE: usize = 200;

/// A page of items plus the cursor for the next page. `cursor` is `None`
/// only when the page came back empty.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
}

impl<T> Page<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            cursor: None,
        }
    }
}

pub struct Paginator {
    store: Arc<dyn DocumentStore>,
}

impl Paginator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The newest `page_size` messages, oldest first. The cursor points at
    /// the earliest returned message.
    pub async fn fetch_latest(&self, conversation_id: &str, page_size: usize) -> Result<Page<Message>> {
        let page_size = check_page_size(page_size)?;
        let newest = self
            .store
            .query_messages(conversation_id, MessageQuery::newest(page_size))
            .await?;
        Ok(message_page(newest))
    }

    /// Up to `page_size` messages strictly older than `cursor`, oldest first.
    pub async fn fetch_older(
        &self,
        conversation_id: &str,
        cursor: &str,
        page_size: usize,
    ) -> Result<Page<Message>> {
        let page_size = check_page_size(page_size)?;
        let position = MessagePosition::decode(cursor)?;
        let older = self
            .store
            .query_messages(
                conversation_id,
                MessageQuery {
                    start_after: Some(position),
                    ..MessageQuery::newest(page_size)
                },
            )
            .await?;
        Ok(message_page(older))
    }

    /// An owner's conversations, most recently active first. The cursor
    /// points at the last (least recent) conversation returned.
    pub async fn fetch_conversations_page(
        &self,
        owner_id: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page<Conversation>> {
        let page_size = check_page_size(page_size)?;
        let start_after = cursor.map(ConversationPosition::decode).transpose()?;
        let items = self
            .store
            .query_conversations(
                owner_id,
                ConversationQuery {
                    limit: Some(page_size),
                    start_after,
                },
            )
            .await?;
        if items.is_empty() {
            return Ok(Page::empty());
        }
        let cursor = items
            .last()
            .map(|c| ConversationPosition::of(c).encode());
        Ok(Page { items, cursor })
    }
}

/// Newest-first query results become an oldest-first page.
fn message_page(mut newest_first: Vec<Message>) -> Page<Message> {
    if newest_first.is_empty() {
        return Page::empty();
    }
    newest_first.reverse();
    let cursor = newest_first.first().map(|m| MessagePosition::of(m).encode());
    Page {
        items: newest_first,
        cursor,
    }
}

fn check_page_size(page_size: usize) -> Result<usize> {
    if page_size == 0 {
        return Err(Error::Validation("page size must be at least 1".into()));
    }
    Ok(page_size.min(MAX_PAGE_SIZE))
}
