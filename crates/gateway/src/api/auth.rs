//! API authentication middleware.
//!
//! Reads the env var named by `config.server.api_token_env` (default
//! `SS_API_TOKEN`) **once at startup** and caches the SHA-256 digest in
//! `AppState`.
//! - If the env var is set and non-empty, every protected request must carry
//!   `Authorization: Bearer <token>`.
//! - If the env var is unset or empty, the server logs a warning once and
//!   allows unauthenticated access (dev mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::api::api_error;
use crate::state::AppState;

/// Digest stored in `AppState::api_token_hash`.
pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// The bearer token of a request, or `""` when absent.
pub(crate) fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
}

/// Axum middleware that enforces bearer-token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    // Compare fixed-length digests so the token length does not leak.
    let provided_hash = Sha256::digest(bearer_token(req.headers()).as_bytes());
    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing API token");
    }

    next.run(req).await
}
