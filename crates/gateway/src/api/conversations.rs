//! Conversation endpoints.
//!
//! - `POST   /v1/conversations`              : create
//! - `GET    /v1/conversations`              : page an owner's conversations
//! - `GET    /v1/conversations/events`       : SSE window of an owner's conversations
//! - `GET    /v1/conversations/:id`          : fetch one
//! - `DELETE /v1/conversations/:id`          : delete (cascades to messages)
//! - `POST   /v1/conversations/:id/archive`  : run one archival pass

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use ss_domain::model::Persona;

use crate::api::events::subscription_sse;
use crate::api::{api_error, error_response};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 20;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/conversations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub owner_id: String,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub title: Option<String>,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Json(body): Json<CreateConversationRequest>,
) -> Response {
    match state
        .writer
        .create_conversation(&body.owner_id, body.persona, body.title.as_deref())
        .await
    {
        Ok(conversation) => (StatusCode::CREATED, Json(conversation)).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/conversations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub cursor: Option<String>,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> Response {
    let Some(owner_id) = query.owner_id.filter(|o| !o.trim().is_empty()) else {
        return api_error(StatusCode::BAD_REQUEST, "owner_id is required");
    };

    match state
        .paginator
        .fetch_conversations_page(
            &owner_id,
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            query.cursor.as_deref(),
        )
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/conversations/events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ConversationEventsQuery {
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub window: Option<usize>,
}

pub async fn conversation_events_sse(
    State(state): State<AppState>,
    Query(query): Query<ConversationEventsQuery>,
) -> Response {
    let Some(owner_id) = query.owner_id.filter(|o| !o.trim().is_empty()) else {
        return api_error(StatusCode::BAD_REQUEST, "owner_id is required");
    };

    let window = state.subscriptions.config().window(query.window);
    let subscription = state.subscriptions.subscribe_conversations(&owner_id, window);
    subscription_sse(subscription).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET / DELETE /v1/conversations/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.writer.conversation(&id).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.writer.delete_conversation(&id).await {
        Ok(removed) => Json(serde_json::json!({
            "deleted": true,
            "messagesRemoved": removed,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/conversations/:id/archive
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ArchiveQuery {
    #[serde(default)]
    pub keep_last: Option<usize>,
}

pub async fn archive_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ArchiveQuery>,
) -> Response {
    let keep_last = query.keep_last.unwrap_or_else(|| state.retention.keep_last());
    if keep_last == 0 {
        return api_error(StatusCode::BAD_REQUEST, "keep_last must be at least 1");
    }
    match state.retention.archive_old_messages(&id, keep_last).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(&e),
    }
}
