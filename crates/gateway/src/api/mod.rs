pub mod ai;
pub mod auth;
pub mod conversations;
mod events;
pub mod feedback;
pub mod limit;
pub mod messages;

use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use ss_domain::error::Error;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (health only) and **protected**
/// (bearer-token auth, then the per-caller API rate limit).
///
/// `state` is needed to wire up the middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(health));

    let protected = Router::new()
        // Conversations
        .route(
            "/v1/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route("/v1/conversations/events", get(conversations::conversation_events_sse))
        .route(
            "/v1/conversations/:id",
            get(conversations::get_conversation).delete(conversations::delete_conversation),
        )
        .route("/v1/conversations/:id/archive", post(conversations::archive_conversation))
        // Messages
        .route(
            "/v1/conversations/:id/messages",
            get(messages::list_messages).post(messages::append_message),
        )
        .route("/v1/conversations/:id/messages/events", get(messages::message_events_sse))
        .route(
            "/v1/conversations/:id/messages/:message_id/feedback",
            post(messages::set_message_feedback),
        )
        // AI
        .route("/ai/respond", post(ai::respond))
        .route("/v1/ai/ask", post(ai::ask))
        .route("/v1/ai/stream", post(ai::ask_stream))
        .route("/v1/ai/stream/:request_id/cancel", post(ai::cancel_stream))
        // Feedback
        .route("/feedback", post(feedback::submit_feedback))
        .route("/feedback/stats", get(feedback::feedback_stats))
        // Layers run bottom-up: auth first, then the rate limit.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            limit::require_api_quota,
        ))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Map a domain error onto its HTTP status. Rate-limit rejections carry a
/// `Retry-After` header in whole seconds.
pub(crate) fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::warn!(error = %err, "request failed");
    }

    let mut response = api_error(status, err.to_string());
    if let Error::RateLimited { retry_after_ms } = err {
        let secs = retry_after_ms.div_ceil(1_000).max(1);
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}
