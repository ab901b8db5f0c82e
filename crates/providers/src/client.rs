//! The orchestration client.
//!
//! Pipeline for every request: validate → clamp history → cache lookup →
//! rate limit → bounded network call with retries → normalize → cache.
//! The limiter is only consulted on a cache miss, so cached answers never
//! spend quota.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ss_domain::clock::SharedClock;
use ss_domain::config::CompletionConfig;
use ss_domain::error::{Error, Result};
use ss_domain::stream::StreamEvent;
use ss_domain::trace::TraceEvent;

use crate::cache::{cache_key, ResponseCache};
use crate::history::clamp_history;
use crate::normalize::classify;
use crate::rate_limit::SlidingWindowLimiter;
use crate::retry::RetryPolicy;
use crate::traits::{Completion, CompletionRequest, CompletionTransport, HistoryTurn, TransportStream};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming callbacks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receives the progress of a streaming request.
///
/// Exactly one of `on_done` / `on_error` fires per request, unless the
/// request is cancelled, in which case neither does.
pub trait StreamHandler: Send + Sync {
    fn on_token(&self, token: &str);
    fn on_done(&self, completion: &Completion);
    fn on_error(&self, error: &Error);
}

/// Forwards callbacks as [`StreamEvent`]s over a channel.
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelHandler {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl StreamHandler for ChannelHandler {
    fn on_token(&self, token: &str) {
        let _ = self.tx.send(StreamEvent::Token {
            text: token.to_owned(),
        });
    }

    fn on_done(&self, completion: &Completion) {
        let _ = self.tx.send(StreamEvent::Done {
            text: completion.text.clone(),
            cached: completion.cached,
        });
    }

    fn on_error(&self, error: &Error) {
        let _ = self.tx.send(StreamEvent::Error {
            message: error.to_string(),
        });
    }
}

/// Handle to a running streaming request.
pub struct StreamingCall {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamingCall {
    /// Abort the request. No further callbacks fire and the cache is left
    /// as it was.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the request task to end (finished, failed or cancelled).
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "streaming task ended abnormally");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CompletionClient {
    transport: Arc<dyn CompletionTransport>,
    cache: ResponseCache,
    limiter: Option<(Arc<SlidingWindowLimiter>, String)>,
    retry: RetryPolicy,
    timeout: Duration,
    stream_timeout: Duration,
    history_limit: usize,
    history_char_budget: usize,
}

impl CompletionClient {
    pub fn new(
        transport: Arc<dyn CompletionTransport>,
        config: &CompletionConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            transport,
            cache: ResponseCache::new(Duration::from_secs(config.cache_ttl_secs), clock),
            limiter: None,
            retry: RetryPolicy::from_config(config),
            timeout: Duration::from_millis(config.timeout_ms),
            stream_timeout: Duration::from_millis(config.stream_timeout_ms),
            history_limit: config.history_limit,
            history_char_budget: config.history_char_budget,
        }
    }

    /// Count every network-bound request against `limiter` under `key`.
    pub fn with_limiter(mut self, limiter: Arc<SlidingWindowLimiter>, key: &str) -> Self {
        self.limiter = Some((limiter, key.to_owned()));
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Validate and clamp; returns the request plus its cache key.
    fn prepare(&self, question: &str, history: &[HistoryTurn], stream: bool) -> Result<(CompletionRequest, String)> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::Validation("question must not be empty".into()));
        }
        let history = clamp_history(history, self.history_limit, self.history_char_budget);
        let key = cache_key(question, &history);
        Ok((
            CompletionRequest {
                question: question.to_owned(),
                history,
                stream,
            },
            key,
        ))
    }

    fn cached(&self, key: &str) -> Option<Completion> {
        let hit = self.cache.get(key)?;
        TraceEvent::CacheHit {
            key: key.chars().take(12).collect(),
        }
        .emit();
        Some(hit)
    }

    fn check_limit(&self) -> Result<()> {
        match &self.limiter {
            Some((limiter, key)) => limiter.check(key),
            None => Ok(()),
        }
    }

    // ── Blocking ──────────────────────────────────────────────────────

    pub async fn ask(&self, question: &str, history: &[HistoryTurn]) -> Result<Completion> {
        let (request, key) = self.prepare(question, history, false)?;
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }
        self.check_limit()?;

        let request = &request;
        let payload = self
            .with_retry(false, || async move {
                bounded(self.timeout, self.transport.send(request, self.timeout)).await
            })
            .await?;

        let shape = classify(&payload)?;
        let well_formed = shape.is_well_formed();
        let completion = shape.into_completion();
        if well_formed {
            self.cache.insert(key, completion.clone());
        }
        Ok(completion)
    }

    // ── Streaming ─────────────────────────────────────────────────────

    /// Start a streaming request. Validation and rate-limit failures are
    /// returned here; everything later goes to `handler`.
    pub fn ask_streaming(
        self: &Arc<Self>,
        question: &str,
        history: &[HistoryTurn],
        handler: Arc<dyn StreamHandler>,
        cancel: CancellationToken,
    ) -> Result<StreamingCall> {
        let (request, key) = self.prepare(question, history, true)?;
        let hit = self.cached(&key);
        if hit.is_none() {
            self.check_limit()?;
        }

        let client = Arc::clone(self);
        let token = cancel.clone();
        let errors = Arc::clone(&handler);
        let task = tokio::spawn(async move {
            let work = async move {
                match hit {
                    Some(hit) => {
                        handler.on_token(&hit.text);
                        handler.on_done(&hit);
                        Ok(())
                    }
                    None => client.run_stream(request, key, handler.as_ref()).await,
                }
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("streaming request aborted by caller");
                }
                result = work => match result {
                    Ok(()) | Err(Error::Aborted) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "streaming request failed");
                        errors.on_error(&e);
                    }
                },
            }
        });

        Ok(StreamingCall { cancel, task })
    }

    async fn run_stream(
        &self,
        request: CompletionRequest,
        key: String,
        handler: &dyn StreamHandler,
    ) -> Result<()> {
        let request = &request;
        let stream = self
            .with_retry(true, || async move {
                bounded(
                    self.stream_timeout,
                    self.transport.send_streaming(request, self.stream_timeout),
                )
                .await
            })
            .await?;

        match stream {
            TransportStream::Whole(payload) => {
                let shape = classify(&payload)?;
                let well_formed = shape.is_well_formed();
                let completion = shape.into_completion();
                handler.on_token(&completion.text);
                if well_formed {
                    self.cache.insert(key, completion.clone());
                }
                handler.on_done(&completion);
            }
            TransportStream::Incremental(mut chunks) => {
                // Tokens already surfaced cannot be retracted, so a failure
                // mid-stream is final.
                let mut text = String::new();
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    if chunk.is_empty() {
                        continue;
                    }
                    handler.on_token(&chunk);
                    text.push_str(&chunk);
                }
                if text.trim().is_empty() {
                    return Err(Error::MalformedResponse("stream carried no text".into()));
                }
                let completion = Completion {
                    text,
                    source_documents: Vec::new(),
                    cached: false,
                };
                self.cache.insert(key, completion.clone());
                handler.on_done(&completion);
            }
        }
        Ok(())
    }

    // ── Retry loop ────────────────────────────────────────────────────

    async fn with_retry<T, F, Fut>(&self, streaming: bool, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = call().await;

            TraceEvent::CompletionRequest {
                attempt,
                streaming,
                status: match &result {
                    Ok(_) => Some(200),
                    Err(Error::Server { status, .. } | Error::Client { status, .. }) => Some(*status),
                    Err(_) => None,
                },
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            }
            .emit();

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt <= self.retry.max_retries => {
                    let backoff = self.retry.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "completion request failed, retrying"
                    );
                    TraceEvent::CompletionRetry {
                        attempt,
                        backoff_ms: backoff.as_millis() as u64,
                        reason: e.to_string(),
                    }
                    .emit();
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Apply a hard deadline to a transport call, whatever the transport does.
async fn bounded<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "completion request exceeded {}ms",
            limit.as_millis()
        ))),
    }
}
