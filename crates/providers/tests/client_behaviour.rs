//! Orchestration client behaviour against a scripted transport: retry
//! budget, 4xx handling, caching, normalization and streaming aborts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use ss_domain::clock::ManualClock;
use ss_domain::config::{CompletionConfig, WindowLimit};
use ss_domain::error::{Error, Result};
use ss_domain::model::Role;
use ss_providers::{
    Completion, CompletionClient, CompletionRequest, CompletionTransport, HistoryTurn,
    SlidingWindowLimiter, StreamHandler, TransportStream,
};

// ── Scripted transport ────────────────────────────────────────────────

enum Step {
    Reply(Value),
    Fail(Error),
    Hang,
    Chunks(Vec<&'static str>, Duration),
}

#[derive(Default)]
struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            ..Default::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, request: &CompletionRequest) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        self.steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| Step::Fail(Error::Other("script exhausted".into())))
    }
}

#[async_trait::async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn send(&self, request: &CompletionRequest, _timeout: Duration) -> Result<Value> {
        match self.next_step(request) {
            Step::Reply(value) => Ok(value),
            Step::Fail(e) => Err(e),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!({ "text": "too late" }))
            }
            Step::Chunks(..) => panic!("chunks scripted for a blocking call"),
        }
    }

    async fn send_streaming(
        &self,
        request: &CompletionRequest,
        _chunk_timeout: Duration,
    ) -> Result<TransportStream> {
        match self.next_step(request) {
            Step::Reply(value) => Ok(TransportStream::Whole(value)),
            Step::Fail(e) => Err(e),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(Error::Other("unreachable".into()))
            }
            Step::Chunks(chunks, gap) => {
                let stream = async_stream::stream! {
                    for chunk in chunks {
                        yield Ok(chunk.to_string());
                        tokio::time::sleep(gap).await;
                    }
                };
                Ok(TransportStream::Incremental(Box::pin(stream)))
            }
        }
    }
}

// ── Recording handler ─────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl StreamHandler for Recorder {
    fn on_token(&self, token: &str) {
        self.events.lock().push(format!("token:{token}"));
    }
    fn on_done(&self, completion: &Completion) {
        self.events
            .lock()
            .push(format!("done:{}:{}", completion.text, completion.cached));
    }
    fn on_error(&self, error: &Error) {
        self.events.lock().push(format!("error:{error}"));
    }
}

fn config() -> CompletionConfig {
    CompletionConfig {
        timeout_ms: 200,
        stream_timeout_ms: 200,
        max_retries: 3,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        backoff_jitter_ms: 0,
        ..Default::default()
    }
}

fn client(transport: Arc<ScriptedTransport>) -> (CompletionClient, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    (
        CompletionClient::new(transport, &config(), clock.clone()),
        clock,
    )
}

fn server_error() -> Step {
    Step::Fail(Error::Server {
        status: 503,
        message: "unavailable".into(),
    })
}

// ── Blocking ask ──────────────────────────────────────────────────────

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let transport = ScriptedTransport::new(vec![
        server_error(),
        server_error(),
        Step::Reply(json!({ "text": "finally" })),
    ]);
    let (client, _clock) = client(transport.clone());

    let completion = client.ask("What is DNA?", &[]).await.unwrap();
    assert_eq!(completion.text, "finally");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let transport = ScriptedTransport::new((0..10).map(|_| server_error()).collect());
    let (client, _clock) = client(transport.clone());

    let err = client.ask("What is DNA?", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Server { status: 503, .. }));
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn client_errors_are_never_retried() {
    let transport = ScriptedTransport::new(vec![
        Step::Fail(Error::Client {
            status: 400,
            message: "bad question".into(),
        }),
        Step::Reply(json!({ "text": "unused" })),
    ]);
    let (client, _clock) = client(transport.clone());

    let err = client.ask("What is DNA?", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Client { status: 400, .. }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn hung_requests_time_out_and_are_retried() {
    let transport = ScriptedTransport::new(vec![
        Step::Hang,
        Step::Reply(json!({ "text": "recovered" })),
    ]);
    let (client, _clock) = client(transport.clone());

    let completion = client.ask("slow?", &[]).await.unwrap();
    assert_eq!(completion.text, "recovered");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn repeat_within_ttl_is_served_from_cache() {
    let transport = ScriptedTransport::new(vec![
        Step::Reply(json!({ "text": "cached answer" })),
        Step::Reply(json!({ "text": "second answer" })),
    ]);
    let (client, clock) = client(transport.clone());
    let history = vec![HistoryTurn::new(Role::User, "earlier")];

    let first = client.ask("Explain osmosis", &history).await.unwrap();
    let second = client.ask("Explain osmosis", &history).await.unwrap();
    assert_eq!(first.text, second.text);
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(transport.calls(), 1);

    clock.advance(chrono::Duration::seconds(31));
    let third = client.ask("Explain osmosis", &history).await.unwrap();
    assert_eq!(third.text, "second answer");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn non_standard_response_field_is_normalized() {
    let transport = ScriptedTransport::new(vec![Step::Reply(json!({ "response": "42" }))]);
    let (client, _clock) = client(transport);

    let completion = client.ask("Meaning of life?", &[]).await.unwrap();
    assert_eq!(completion.text, "42");
}

#[tokio::test]
async fn unknown_shapes_are_returned_but_not_cached() {
    let transport = ScriptedTransport::new(vec![
        Step::Reply(json!({ "answer": "odd" })),
        Step::Reply(json!({ "answer": "odd" })),
    ]);
    let (client, _clock) = client(transport.clone());

    let completion = client.ask("q", &[]).await.unwrap();
    assert_eq!(completion.text, r#"{"answer":"odd"}"#);
    client.ask("q", &[]).await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn history_is_clamped_before_sending() {
    let transport = ScriptedTransport::new(vec![Step::Reply(json!({ "text": "ok" }))]);
    let (client, _clock) = client(transport.clone());
    let history: Vec<HistoryTurn> = (0..15)
        .map(|i| HistoryTurn::new(Role::User, format!("turn {i}")))
        .collect();

    client.ask("q", &history).await.unwrap();
    let sent = transport.last_request.lock().clone().unwrap();
    assert_eq!(sent.history.len(), 10);
    assert_eq!(sent.history[0].message, "turn 5");
}

#[tokio::test]
async fn empty_question_is_rejected_without_a_call() {
    let transport = ScriptedTransport::new(vec![]);
    let (client, _clock) = client(transport.clone());
    assert!(matches!(
        client.ask("   ", &[]).await,
        Err(Error::Validation(_))
    ));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn limiter_refuses_without_a_network_call() {
    let transport = ScriptedTransport::new(vec![
        Step::Reply(json!({ "text": "one" })),
        Step::Reply(json!({ "text": "two" })),
    ]);
    let clock = Arc::new(ManualClock::starting_now());
    let limiter = Arc::new(SlidingWindowLimiter::new(
        "completion",
        WindowLimit {
            max_requests: 1,
            window_secs: 60,
        },
        clock.clone(),
    ));
    let client = CompletionClient::new(transport.clone(), &config(), clock)
        .with_limiter(limiter, "global");

    client.ask("first", &[]).await.unwrap();
    // Cache hits do not spend quota.
    client.ask("first", &[]).await.unwrap();
    let err = client.ask("second", &[]).await.unwrap_err();
    assert!(matches!(err, Error::RateLimited { .. }));
    assert_eq!(transport.calls(), 1);
}

// ── Streaming ─────────────────────────────────────────────────────────

#[tokio::test]
async fn incremental_stream_surfaces_tokens_then_done() {
    let transport = ScriptedTransport::new(vec![Step::Chunks(
        vec!["Photo", "synthesis"],
        Duration::from_millis(1),
    )]);
    let (client, _clock) = client(transport);
    let client = Arc::new(client);
    let recorder = Arc::new(Recorder::default());

    let call = client
        .ask_streaming("What is photosynthesis?", &[], recorder.clone(), CancellationToken::new())
        .unwrap();
    call.finished().await;

    assert_eq!(
        recorder.events(),
        ["token:Photo", "token:synthesis", "done:Photosynthesis:false"]
    );
    assert_eq!(client.cache().len(), 1);
}

#[tokio::test]
async fn whole_body_stream_synthesizes_one_token() {
    let transport = ScriptedTransport::new(vec![Step::Reply(json!({ "data": { "text": "all at once" } }))]);
    let (client, _clock) = client(transport);
    let client = Arc::new(client);
    let recorder = Arc::new(Recorder::default());

    client
        .ask_streaming("q", &[], recorder.clone(), CancellationToken::new())
        .unwrap()
        .finished()
        .await;

    assert_eq!(recorder.events(), ["token:all at once", "done:all at once:false"]);
}

#[tokio::test]
async fn stream_failure_reports_one_error() {
    let transport = ScriptedTransport::new(vec![Step::Fail(Error::Client {
        status: 401,
        message: "no key".into(),
    })]);
    let (client, _clock) = client(transport);
    let client = Arc::new(client);
    let recorder = Arc::new(Recorder::default());

    client
        .ask_streaming("q", &[], recorder.clone(), CancellationToken::new())
        .unwrap()
        .finished()
        .await;

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].starts_with("error:"));
}

#[tokio::test]
async fn aborted_stream_fires_no_error_and_leaves_cache_untouched() {
    let transport = ScriptedTransport::new(vec![
        Step::Reply(json!({ "text": "earlier answer" })),
        Step::Chunks(vec!["partial", " never", " finished"], Duration::from_secs(5)),
    ]);
    let (client, _clock) = client(transport);
    let client = Arc::new(client);

    client.ask("earlier", &[]).await.unwrap();
    assert_eq!(client.cache().len(), 1);

    let recorder = Arc::new(Recorder::default());
    let call = client
        .ask_streaming("long one", &[], recorder.clone(), CancellationToken::new())
        .unwrap();

    for _ in 0..100 {
        if !recorder.events().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    call.cancel();
    call.finished().await;

    assert_eq!(recorder.events(), ["token:partial"]);
    assert_eq!(client.cache().len(), 1);
    assert!(client.ask("earlier", &[]).await.unwrap().cached);
}

#[tokio::test]
async fn cached_answer_streams_as_one_token() {
    let transport = ScriptedTransport::new(vec![Step::Reply(json!({ "text": "memo" }))]);
    let (client, _clock) = client(transport.clone());
    let client = Arc::new(client);
    client.ask("again", &[]).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    client
        .ask_streaming("again", &[], recorder.clone(), CancellationToken::new())
        .unwrap()
        .finished()
        .await;

    assert_eq!(recorder.events(), ["token:memo", "done:memo:true"]);
    assert_eq!(transport.calls(), 1);
}
