use std::sync::Arc;

use ss_domain::clock::SharedClock;
use ss_domain::config::Config;
use ss_providers::{CompletionClient, CompletionTransport, SlidingWindowLimiter};
use ss_sessions::{
    DocumentStore, FeedbackStore, MemoryStore, MessageWriter, Paginator, RetentionManager,
    SubscriptionManager,
};

use crate::runtime::cancel::CancelMap;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Storage**: the document store and the services layered on it
/// - **AI**: the orchestration client and in-flight stream tokens
/// - **Security & limits**: token hash, sliding-window limiters
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: SharedClock,

    // ── Storage ───────────────────────────────────────────────────────
    /// Concrete handle, kept for snapshot flushing.
    pub memory_store: Arc<MemoryStore>,
    pub store: Arc<dyn DocumentStore>,
    pub writer: Arc<MessageWriter>,
    pub paginator: Arc<Paginator>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub retention: Arc<RetentionManager>,
    pub feedback: Arc<FeedbackStore>,

    // ── AI ────────────────────────────────────────────────────────────
    pub client: Arc<CompletionClient>,
    pub cancel_map: Arc<CancelMap>,

    // ── Security & limits ─────────────────────────────────────────────
    /// SHA-256 of the API token. `None` disables auth (dev mode).
    pub api_token_hash: Option<Vec<u8>>,
    /// Every protected request, keyed by caller.
    pub api_limiter: Arc<SlidingWindowLimiter>,
    /// Message appends and AI turns.
    pub message_limiter: Arc<SlidingWindowLimiter>,
}

impl AppState {
    /// Wire every service over one store and one completion transport.
    /// Auth starts disabled; see `bootstrap::build_app_state`.
    pub fn assemble(
        config: Arc<Config>,
        memory_store: Arc<MemoryStore>,
        transport: Arc<dyn CompletionTransport>,
        feedback: Arc<FeedbackStore>,
        clock: SharedClock,
    ) -> Self {
        let store: Arc<dyn DocumentStore> = memory_store.clone();
        let client = Arc::new(CompletionClient::new(
            transport,
            &config.completion,
            clock.clone(),
        ));

        Self {
            writer: Arc::new(MessageWriter::new(store.clone(), &config.store)),
            paginator: Arc::new(Paginator::new(store.clone())),
            subscriptions: Arc::new(SubscriptionManager::new(
                store.clone(),
                config.subscriptions.clone(),
            )),
            retention: Arc::new(RetentionManager::new(store.clone(), &config.retention)),
            api_limiter: Arc::new(SlidingWindowLimiter::new(
                "api",
                config.rate_limit.api,
                clock.clone(),
            )),
            message_limiter: Arc::new(SlidingWindowLimiter::new(
                "messages",
                config.rate_limit.messages,
                clock.clone(),
            )),
            cancel_map: Arc::new(CancelMap::new()),
            api_token_hash: None,
            memory_store,
            store,
            feedback,
            client,
            clock,
            config,
        }
    }
}
