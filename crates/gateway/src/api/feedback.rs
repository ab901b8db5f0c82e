use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use ss_domain::error::Error;
use ss_sessions::FeedbackSubmission;

use crate::api::error_response;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /feedback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Record a rating and, when the rated message still exists, attach it to
/// the message as well.
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackSubmission>,
) -> Response {
    let record = match state.feedback.submit(body).await {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };

    match state
        .writer
        .set_feedback(&record.chat_id, &record.message_id, record.feedback)
        .await
    {
        Ok(()) | Err(Error::NotFound(_)) => {}
        Err(e) => tracing::warn!(
            message_id = %record.message_id,
            error = %e,
            "failed to attach feedback to message"
        ),
    }

    Json(serde_json::json!({
        "success": true,
        "feedbackId": record.id,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /feedback/stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    #[serde(default)]
    pub chat_id: Option<String>,
}

pub async fn feedback_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let stats = state.feedback.stats(query.chat_id.as_deref()).await;
    Json(stats).into_response()
}
