//! AI response orchestration: everything between "the user asked
//! something" and "here is the answer text".
//!
//! [`CompletionClient`] clamps history, consults the [`ResponseCache`],
//! applies the [`SlidingWindowLimiter`], retries transient failures with
//! [`RetryPolicy`] backoff, and normalizes whatever shape the completion
//! backend answers with. Streaming requests run as cancellable tasks that
//! report through a [`StreamHandler`].

pub mod cache;
pub mod client;
pub mod history;
pub mod http;
pub mod normalize;
pub mod rate_limit;
pub mod retry;
pub(crate) mod sse;
pub mod traits;
pub mod util;

pub use cache::{cache_key, ResponseCache};
pub use client::{ChannelHandler, CompletionClient, StreamHandler, StreamingCall};
pub use history::clamp_history;
pub use http::HttpTransport;
pub use normalize::{classify, ResponseShape};
pub use rate_limit::SlidingWindowLimiter;
pub use retry::RetryPolicy;
pub use traits::{Completion, CompletionRequest, CompletionTransport, HistoryTurn, TransportStream};
