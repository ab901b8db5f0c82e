//! Server-side AI turn: answer one user message and append the reply.

use ss_domain::error::{Error, Result};
use ss_domain::model::{Message, Role};
use ss_sessions::{soft_trim, MessageQuery};

use crate::runtime::prompt::{history_turns, render_question};
use crate::state::AppState;

/// Answer the user message `message_id` of conversation `chat_id`.
///
/// The conversation may have been created moments ago, so its lookup
/// tolerates a short visibility delay. The prompt carries the persona and
/// every message before the one being answered, soft-trimmed to the
/// retention quota. Returns the appended assistant message.
pub async fn respond(state: &AppState, chat_id: &str, message_id: &str) -> Result<Message> {
    if chat_id.trim().is_empty() || message_id.trim().is_empty() {
        return Err(Error::Validation("chatId and messageId are required".into()));
    }

    let conversation = state.writer.wait_for_conversation(chat_id).await?;
    let messages = state
        .store
        .query_messages(chat_id, MessageQuery::default())
        .await?;

    let position = messages
        .iter()
        .position(|m| m.id == message_id)
        .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
    let question = &messages[position];
    if question.role != Role::User {
        return Err(Error::Validation(format!(
            "message {message_id} is not a user message"
        )));
    }

    let prior = soft_trim(&messages[..position], state.config.retention.soft_quota);
    let history = history_turns(prior);
    let prompt = render_question(&conversation.persona, &question.text);

    tracing::debug!(
        conversation_id = chat_id,
        message_id,
        history = history.len(),
        "running AI turn"
    );

    let completion = state.client.ask(&prompt, &history).await?;
    state
        .writer
        .append(chat_id, Role::Assistant, &completion.text)
        .await
}

/// Run [`respond`] in the background, logging the outcome.
pub fn spawn_respond(state: AppState, chat_id: String, message_id: String) {
    tokio::spawn(async move {
        match respond(&state, &chat_id, &message_id).await {
            Ok(reply) => tracing::info!(
                conversation_id = %chat_id,
                message_id = %reply.id,
                "assistant reply appended"
            ),
            Err(e) => tracing::warn!(
                conversation_id = %chat_id,
                message_id = %message_id,
                error = %e,
                "AI turn failed"
            ),
        }
    });
}
