use std::time::Duration;

use serde::{Deserialize, Serialize};

use ss_domain::error::Result;
use ss_domain::model::Role;
use ss_domain::stream::BoxStream;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One prior turn sent as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub message: String,
}

impl HistoryTurn {
    pub fn new(role: Role, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
        }
    }
}

/// Wire body of a prediction call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryTurn>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// A normalized answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_documents: Vec<serde_json::Value>,
    /// Served from the response cache without a network call.
    pub cached: bool,
}

/// What a streaming call produced: either incremental text chunks or, when
/// the backend ignored the stream flag, one JSON body.
pub enum TransportStream {
    Incremental(BoxStream<'static, Result<String>>),
    Whole(serde_json::Value),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One network call to the completion service, no retries.
///
/// Failures must be classified into the shared error taxonomy: `Client`
/// for 4xx, `Server` for 5xx, `Timeout` and `Http` for transport problems.
#[async_trait::async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Blocking prediction; returns the decoded response body.
    async fn send(&self, request: &CompletionRequest, timeout: Duration) -> Result<serde_json::Value>;

    /// Streaming prediction. `chunk_timeout` bounds the wait for each chunk.
    async fn send_streaming(
        &self,
        request: &CompletionRequest,
        chunk_timeout: Duration,
    ) -> Result<TransportStream>;
}
