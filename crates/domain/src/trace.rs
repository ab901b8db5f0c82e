use serde::Serialize;

/// Structured trace events emitted across all studysync crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ConversationCreated {
        conversation_id: String,
        owner_id: String,
    },
    ConversationDeleted {
        conversation_id: String,
        messages_removed: usize,
    },
    MessageAppended {
        conversation_id: String,
        message_id: String,
        role: String,
        message_count: usize,
    },
    TitleDerived {
        conversation_id: String,
        title: String,
    },
    ArchivePass {
        conversation_id: String,
        archived: usize,
        batches: usize,
        hot_count: usize,
    },
    CompletionRequest {
        attempt: u32,
        streaming: bool,
        status: Option<u16>,
        duration_ms: u64,
    },
    CompletionRetry {
        attempt: u32,
        backoff_ms: u64,
        reason: String,
    },
    CacheHit {
        key: String,
    },
    RateLimited {
        limiter: String,
        key: String,
        retry_after_ms: u64,
    },
    SubscriptionOpened {
        subscription_id: String,
        target: String,
        window: usize,
    },
    SubscriptionClosed {
        subscription_id: String,
    },
    SubscriptionStalled {
        subscription_id: String,
        failures: u32,
    },
    FeedbackRecorded {
        feedback_id: String,
        message_id: String,
        positive: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ss_event");
    }
}
