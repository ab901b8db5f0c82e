//! Message endpoints under `/v1/conversations/:id/messages`.
//!
//! - `POST` append a user message (per-owner message rate limit)
//! - `GET` latest page, or the page before `before`
//! - `GET .../events` SSE window of the newest messages
//! - `POST .../:message_id/feedback` thumbs up / down

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use ss_domain::error::Error;
use ss_domain::model::{Feedback, Role};

use crate::api::error_response;
use crate::api::events::subscription_sse;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/conversations/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub text: String,
}

pub async fn append_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AppendMessageRequest>,
) -> Response {
    // Rejected requests must not spend the owner's message quota.
    if body.text.trim().is_empty() {
        return error_response(&Error::Validation("message text must not be empty".into()));
    }
    let conversation = match state.writer.wait_for_conversation(&id).await {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };
    if let Err(e) = state.message_limiter.check(&conversation.owner_id) {
        return error_response(&e);
    }

    match state.writer.append(&id, Role::User, &body.text).await {
        Ok(message) => (StatusCode::CREATED, Json(message)).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/conversations/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Cursor from a previous page; returns strictly older messages.
    #[serde(default)]
    pub before: Option<String>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Response {
    if let Err(e) = state.writer.conversation(&id).await {
        return error_response(&e);
    }

    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let page = match query.before.as_deref() {
        Some(cursor) => state.paginator.fetch_older(&id, cursor, page_size).await,
        None => state.paginator.fetch_latest(&id, page_size).await,
    };
    match page {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/conversations/:id/messages/events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct MessageEventsQuery {
    #[serde(default)]
    pub window: Option<usize>,
}

pub async fn message_events_sse(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessageEventsQuery>,
) -> Response {
    if let Err(e) = state.writer.conversation(&id).await {
        return error_response(&e);
    }

    let window = state.subscriptions.config().window(query.window);
    let subscription = state.subscriptions.subscribe_messages(&id, window);
    subscription_sse(subscription).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/conversations/:id/messages/:message_id/feedback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct MessageFeedbackRequest {
    pub feedback: Feedback,
}

pub async fn set_message_feedback(
    State(state): State<AppState>,
    Path((id, message_id)): Path<(String, String)>,
    Json(body): Json<MessageFeedbackRequest>,
) -> Response {
    match state.writer.set_feedback(&id, &message_id, body.feedback).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => error_response(&e),
    }
}
