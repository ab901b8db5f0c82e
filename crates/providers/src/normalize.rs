//! Response-shape normalization.
//!
//! Backends answer with `{text}`, `{response}`, or the same wrapped in
//! `{data: ..}`. Payloads are classified into a closed set of shapes by
//! trying candidate paths in order; the first non-empty string wins and an
//! unrecognised payload falls back to its serialized form.

use serde_json::Value;

use ss_domain::error::{Error, Result};

use crate::traits::Completion;

/// Top-level answer fields, in priority order.
const DIRECT_FIELDS: [&str; 2] = ["text", "response"];
/// Fields looked up under `data`, in priority order.
const NESTED_FIELDS: [&str; 2] = ["text", "response"];

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    DirectText {
        text: String,
        source_documents: Vec<Value>,
    },
    NestedText {
        text: String,
        source_documents: Vec<Value>,
    },
    /// Nothing matched; `raw` is the payload itself.
    Unknown { raw: String },
}

impl ResponseShape {
    pub fn text(&self) -> &str {
        match self {
            ResponseShape::DirectText { text, .. } | ResponseShape::NestedText { text, .. } => text,
            ResponseShape::Unknown { raw } => raw,
        }
    }

    /// Only recognised shapes are worth caching.
    pub fn is_well_formed(&self) -> bool {
        !matches!(self, ResponseShape::Unknown { .. })
    }

    pub fn into_completion(self) -> Completion {
        let (text, source_documents) = match self {
            ResponseShape::DirectText {
                text,
                source_documents,
            }
            | ResponseShape::NestedText {
                text,
                source_documents,
            } => (text, source_documents),
            ResponseShape::Unknown { raw } => (raw, Vec::new()),
        };
        Completion {
            text,
            source_documents,
            cached: false,
        }
    }
}

fn first_text<'a>(object: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|field| object.get(*field).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
}

fn source_documents(object: &Value) -> Vec<Value> {
    object
        .get("sourceDocuments")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Classify a decoded response body. Only an empty body is an error.
pub fn classify(payload: &Value) -> Result<ResponseShape> {
    match payload {
        Value::Null => Err(Error::MalformedResponse("empty response body".into())),
        Value::String(raw) if raw.trim().is_empty() => {
            Err(Error::MalformedResponse("empty response body".into()))
        }
        // A bare text body carries no shape to trust.
        Value::String(raw) => Ok(ResponseShape::Unknown { raw: raw.clone() }),
        _ => {
            if let Some(text) = first_text(payload, &DIRECT_FIELDS) {
                return Ok(ResponseShape::DirectText {
                    text: text.to_owned(),
                    source_documents: source_documents(payload),
                });
            }
            if let Some(data) = payload.get("data") {
                if let Some(text) = first_text(data, &NESTED_FIELDS) {
                    let mut docs = source_documents(data);
                    if docs.is_empty() {
                        docs = source_documents(payload);
                    }
                    return Ok(ResponseShape::NestedText {
                        text: text.to_owned(),
                        source_documents: docs,
                    });
                }
            }
            tracing::warn!("completion response matched no known shape; using raw payload");
            Ok(ResponseShape::Unknown {
                raw: payload.to_string(),
            })
        }
    }
}
