//! `studysync ask`: one-shot question against the completion service.
//!
//! Streams tokens to stdout as they arrive (or prints the whole answer with
//! `--no-stream`). Ctrl-C aborts the request cleanly.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use ss_domain::clock::system_clock;
use ss_domain::config::Config;
use ss_domain::stream::StreamEvent;
use ss_providers::{ChannelHandler, CompletionClient, HttpTransport, SlidingWindowLimiter};

pub async fn ask(config: Arc<Config>, question: String, no_stream: bool) -> anyhow::Result<()> {
    let clock = system_clock();
    let transport = Arc::new(
        HttpTransport::from_config(&config.completion)
            .context("initializing completion transport")?,
    );
    let limiter = Arc::new(SlidingWindowLimiter::new(
        "completion",
        config.rate_limit.api,
        clock.clone(),
    ));
    let client = Arc::new(
        CompletionClient::new(transport, &config.completion, clock).with_limiter(limiter, "cli"),
    );

    if no_stream {
        let completion = client.ask(&question, &[]).await?;
        println!("{}", completion.text);
        return Ok(());
    }

    let (handler, mut rx) = ChannelHandler::channel();
    let call = client.ask_streaming(&question, &[], handler, CancellationToken::new())?;
    let cancel = call.cancellation_token();

    let mut failure = None;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(StreamEvent::Token { text }) => {
                    print!("{text}");
                    std::io::stdout().flush().ok();
                }
                Some(StreamEvent::Done { .. }) => println!(),
                Some(StreamEvent::Error { message }) => failure = Some(message),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                eprintln!("\nrequest cancelled");
            }
        }
    }
    call.finished().await;

    match failure {
        Some(message) => anyhow::bail!("completion failed: {message}"),
        None => Ok(()),
    }
}
