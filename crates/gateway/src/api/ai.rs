//! AI endpoints.
//!
//! - `POST /ai/respond`                    : answer a stored user message in the background
//! - `POST /v1/ai/ask`                     : blocking ask
//! - `POST /v1/ai/stream`                  : SSE streaming ask
//! - `POST /v1/ai/stream/:request_id/cancel`: abort a streaming ask

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use ss_domain::error::Error;
use ss_domain::stream::StreamEvent;
use ss_providers::{ChannelHandler, HistoryTurn};

use crate::api::{api_error, error_response};
use crate::runtime::cancel::CancelMap;
use crate::runtime::spawn_respond;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /ai/respond
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub message_id: String,
}

pub async fn respond(
    State(state): State<AppState>,
    Json(body): Json<RespondRequest>,
) -> Response {
    if body.chat_id.trim().is_empty() || body.message_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "chatId and messageId are required");
    }
    if let Err(e) = state.message_limiter.check(&format!("ai:{}", body.chat_id)) {
        return error_response(&e);
    }

    spawn_respond(state, body.chat_id, body.message_id);
    Json(serde_json::json!({ "ok": true })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/ai/ask
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
}

pub async fn ask(State(state): State<AppState>, Json(body): Json<AskRequest>) -> Response {
    match state.client.ask(&body.question, &body.history).await {
        Ok(completion) => Json(completion).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/ai/stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cancels the request and unregisters it when the SSE stream is dropped,
/// whether it finished or the client went away.
struct StreamGuard {
    request_id: String,
    token: CancellationToken,
    cancel_map: Arc<CancelMap>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.token.cancel();
        self.cancel_map.remove(&self.request_id);
    }
}

pub async fn ask_stream(
    State(state): State<AppState>,
    Json(body): Json<AskRequest>,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let token = state.cancel_map.register(&request_id);
    let guard = StreamGuard {
        request_id: request_id.clone(),
        token: token.clone(),
        cancel_map: state.cancel_map.clone(),
    };

    let (handler, mut rx) = ChannelHandler::channel();
    if let Err(e) = state
        .client
        .ask_streaming(&body.question, &body.history, handler, token)
    {
        // Dropping the guard unregisters the request.
        drop(guard);
        return error_response(&e);
    }

    let opened = serde_json::json!({ "requestId": request_id }).to_string();
    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Event::default().event("request").data(opened));
        while let Some(event) = rx.recv().await {
            let event_type = match &event {
                StreamEvent::Token { .. } => "token",
                StreamEvent::Done { .. } => "done",
                StreamEvent::Error { .. } => "error",
            };
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event_type).data(data));
        }
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/ai/stream/:request_id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel_stream(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Response {
    if state.cancel_map.cancel(&request_id) {
        tracing::info!(request_id = %request_id, "streaming request cancelled");
        Json(serde_json::json!({ "cancelled": true })).into_response()
    } else {
        error_response(&Error::NotFound(format!("streaming request {request_id}")))
    }
}
