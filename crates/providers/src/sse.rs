//! Incremental response framing.
//!
//! Streamed predictions arrive either as server-sent events or as
//! newline-delimited chunks. Both are buffered, split into complete frames
//! and reduced to plain text chunks by [`chunk_text`]:
//! - [`drain_data_lines`] -- pull complete `data:` payloads from an SSE buffer
//! - [`drain_lines`] -- pull complete lines from an NDJSON / plain-text buffer
//! - [`chunk_stream`] -- build a `BoxStream` of text chunks from a response

use std::time::Duration;

use ss_domain::error::{Error, Result};
use ss_domain::stream::BoxStream;

use crate::util::from_reqwest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    EventStream,
    Lines,
}

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by `\n\n`; only `data:` lines are kept. The buffer
/// is drained in place and a trailing partial event stays for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Extract complete, non-blank lines from a newline-delimited buffer.
pub(crate) fn drain_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

/// Reduce one frame to its text: `{"text": ..}` objects and JSON strings
/// yield their content, anything unparseable is taken as plain text.
/// Control frames (`[DONE]`, objects without text) yield nothing.
pub(crate) fn chunk_text(frame: &str) -> Option<String> {
    if frame == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(frame) {
        Ok(serde_json::Value::Object(map)) => map
            .get("text")
            .or_else(|| map.get("token"))
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        Ok(serde_json::Value::String(s)) => Some(s),
        _ => Some(frame.to_owned()),
    }
}

/// Append `bytes` to `buffer`, holding back an incomplete UTF-8 sequence
/// at the end in `pending` until the rest of it arrives.
fn push_utf8(buffer: &mut String, pending: &mut Vec<u8>, bytes: &[u8]) {
    pending.extend_from_slice(bytes);
    let valid = match std::str::from_utf8(pending) {
        Ok(s) => s.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        // Invalid (not just truncated) input: keep going lossily.
        Err(_) => pending.len(),
    };
    let rest = pending.split_off(valid);
    buffer.push_str(&String::from_utf8_lossy(pending));
    *pending = rest;
}

fn drain(framing: Framing, buffer: &mut String) -> Vec<String> {
    match framing {
        Framing::EventStream => drain_data_lines(buffer),
        Framing::Lines => drain_lines(buffer),
    }
}

/// Build a stream of text chunks from a streaming response.
///
/// Each wait for the next network chunk is bounded by `chunk_timeout`; the
/// remaining buffer is flushed when the body closes.
pub(crate) fn chunk_stream(
    response: reqwest::Response,
    framing: Framing,
    chunk_timeout: Duration,
) -> BoxStream<'static, Result<String>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut pending = Vec::new();

        loop {
            match tokio::time::timeout(chunk_timeout, response.chunk()).await {
                Err(_) => {
                    yield Err(Error::Timeout(format!(
                        "no stream data for {}ms",
                        chunk_timeout.as_millis()
                    )));
                    break;
                }
                Ok(Ok(Some(bytes))) => {
                    push_utf8(&mut buffer, &mut pending, &bytes);
                    for frame in drain(framing, &mut buffer) {
                        if let Some(text) = chunk_text(&frame) {
                            yield Ok(text);
                        }
                    }
                }
                Ok(Ok(None)) => {
                    buffer.push_str(&String::from_utf8_lossy(&pending));
                    if !buffer.trim().is_empty() {
                        buffer.push_str(match framing {
                            Framing::EventStream => "\n\n",
                            Framing::Lines => "\n",
                        });
                        for frame in drain(framing, &mut buffer) {
                            if let Some(text) = chunk_text(&frame) {
                                yield Ok(text);
                            }
                        }
                    }
                    break;
                }
                Ok(Err(e)) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("event: token\ndata: first\n\ndata: second\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["first", "second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        assert_eq!(drain_data_lines(&mut buf), vec!["complete"]);
        assert_eq!(buf, "data: partial");

        buf.push_str("\n\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["partial"]);
    }

    #[test]
    fn drain_lines_skips_blank_lines() {
        let mut buf = String::from("{\"text\":\"a\"}\n\n{\"text\":\"b\"}\n{\"te");
        assert_eq!(drain_lines(&mut buf), vec!["{\"text\":\"a\"}", "{\"text\":\"b\"}"]);
        assert_eq!(buf, "{\"te");
    }

    #[test]
    fn chunk_text_accepts_objects_strings_and_plain_text() {
        assert_eq!(chunk_text(r#"{"text":"Hel"}"#).as_deref(), Some("Hel"));
        assert_eq!(chunk_text(r#""lo""#).as_deref(), Some("lo"));
        assert_eq!(chunk_text("plain words").as_deref(), Some("plain words"));
        assert_eq!(chunk_text("[DONE]"), None);
        assert_eq!(chunk_text(r#"{"event":"start"}"#), None);
    }

    #[test]
    fn split_utf8_sequence_is_held_back() {
        let mut buf = String::new();
        let mut pending = Vec::new();
        let bytes = "é".as_bytes();
        push_utf8(&mut buf, &mut pending, &bytes[..1]);
        assert!(buf.is_empty());
        push_utf8(&mut buf, &mut pending, &bytes[1..]);
        assert_eq!(buf, "é");
        assert!(pending.is_empty());
    }
}
