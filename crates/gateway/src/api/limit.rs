//! Per-caller sliding-window limit on every protected route.
//!
//! Callers are keyed by a short digest of their bearer token, or
//! `anonymous` when none is sent.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::api::auth::{bearer_token, hash_token};
use crate::api::error_response;
use crate::state::AppState;

pub async fn require_api_quota(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = caller_key(req.headers());
    if let Err(e) = state.api_limiter.check(&key) {
        return error_response(&e);
    }
    next.run(req).await
}

pub(crate) fn caller_key(headers: &HeaderMap) -> String {
    match bearer_token(headers) {
        "" => "anonymous".into(),
        token => hex::encode(&hash_token(token)[..8]),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn missing_token_is_anonymous() {
        assert_eq!(caller_key(&HeaderMap::new()), "anonymous");
    }

    #[test]
    fn token_key_is_a_stable_digest_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        let key = caller_key(&headers);
        assert_eq!(key.len(), 16);
        assert_eq!(key, caller_key(&headers));
    }
}
