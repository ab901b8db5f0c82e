use serde::Serialize;
use std::pin::Pin;

/// A boxed async stream, used for streamed completions and subscriptions.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while a completion streams back to a caller.
///
/// An aborted request produces no terminal event at all: the stream simply
/// stops.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A text chunk, in arrival order.
    #[serde(rename = "token")]
    Token { text: String },

    /// The stream finished; `text` is the concatenation of every token.
    #[serde(rename = "done")]
    Done { text: String, cached: bool },

    /// The request failed after its retry budget was spent.
    #[serde(rename = "error")]
    Error { message: String },
}
