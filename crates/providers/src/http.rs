//! reqwest-backed [`CompletionTransport`] for a prediction endpoint.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;

use ss_domain::config::CompletionConfig;
use ss_domain::error::{Error, Result};

use crate::sse::{chunk_stream, Framing};
use crate::traits::{CompletionRequest, CompletionTransport, TransportStream};
use crate::util::{from_reqwest, resolve_api_key};

/// Error bodies are cut to this many characters in error messages.
const ERROR_BODY_LIMIT: usize = 500;

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransport {
    /// Build from config. An unconfigured `[completion.auth]` means requests
    /// go out without an `Authorization` header.
    pub fn from_config(config: &CompletionConfig) -> Result<Self> {
        let api_key = if config.auth.is_configured() {
            Some(resolve_api_key(&config.auth)?)
        } else {
            None
        };
        Self::new(&config.endpoint, api_key)
    }

    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self> {
        if endpoint.trim().is_empty() {
            return Err(Error::Config("completion endpoint is empty".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_owned(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post(&self, request: &CompletionRequest) -> reqwest::RequestBuilder {
        let builder = self.client.post(&self.endpoint).json(request);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// Map a non-success status to the error taxonomy, keeping a bounded
/// excerpt of the body.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let code = status.as_u16();
    Err(if status.is_client_error() {
        Error::Client {
            status: code,
            message,
        }
    } else if status.is_server_error() {
        Error::Server {
            status: code,
            message,
        }
    } else {
        Error::Http(format!("unexpected status {code}: {message}"))
    })
}

/// Decode a whole body: JSON when it parses, otherwise the raw text as a
/// JSON string so normalization can still use it.
fn decode_body(body: &str) -> serde_json::Value {
    if body.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_owned()))
}

#[async_trait::async_trait]
impl CompletionTransport for HttpTransport {
    async fn send(&self, request: &CompletionRequest, timeout: Duration) -> Result<serde_json::Value> {
        let response = self
            .post(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = check_status(response).await?;
        let body = response.text().await.map_err(from_reqwest)?;
        Ok(decode_body(&body))
    }

    async fn send_streaming(
        &self,
        request: &CompletionRequest,
        chunk_timeout: Duration,
    ) -> Result<TransportStream> {
        let response = self.post(request).send().await.map_err(from_reqwest)?;
        let response = check_status(response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.contains("text/event-stream") {
            tracing::debug!(endpoint = %self.endpoint, "streaming as server-sent events");
            return Ok(TransportStream::Incremental(chunk_stream(
                response,
                Framing::EventStream,
                chunk_timeout,
            )));
        }
        if content_type.contains("application/json") {
            let body = tokio::time::timeout(chunk_timeout, response.text())
                .await
                .map_err(|_| Error::Timeout("reading response body".into()))?
                .map_err(from_reqwest)?;
            return Ok(TransportStream::Whole(decode_body(&body)));
        }
        // NDJSON, text/plain and anything unlabelled.
        Ok(TransportStream::Incremental(chunk_stream(
            response,
            Framing::Lines,
            chunk_timeout,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_body_becomes_a_json_string() {
        assert_eq!(decode_body("just text"), serde_json::json!("just text"));
        assert_eq!(decode_body(r#"{"text":"hi"}"#)["text"], "hi");
        assert!(decode_body("  ").is_null());
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        assert!(matches!(HttpTransport::new(" ", None), Err(Error::Config(_))));
    }

    #[test]
    fn request_body_omits_empty_fields() {
        let request = CompletionRequest {
            question: "why?".into(),
            history: Vec::new(),
            stream: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({ "question": "why?" }));
    }
}
