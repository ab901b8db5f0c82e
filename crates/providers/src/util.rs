//! Shared helpers for talking to the completion service.

use ss_domain::config::AuthConfig;
use ss_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeouts map to [`Error::Timeout`], responses that carried a status map
/// to `Client`/`Server`, everything else is a transport failure.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::Timeout(e.to_string());
    }
    match e.status() {
        Some(status) if status.is_client_error() => Error::Client {
            status: status.as_u16(),
            message: e.to_string(),
        },
        Some(status) if status.is_server_error() => Error::Server {
            status: status.as_u16(),
            message: e.to_string(),
        },
        _ => Error::Http(e.to_string()),
    }
}

/// Resolve the completion API key from an [`AuthConfig`].
///
/// Precedence:
/// 1. `key` field (plaintext, warned about)
/// 2. `service` + `account` → OS keychain via `keyring`
/// 3. `env` field
/// 4. Keychain headless fallback: env var `{SERVICE}_{ACCOUNT}` uppercased
/// 5. Error
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    if let Some(ref key) = auth.key {
        tracing::warn!(
            "completion API key loaded from plaintext config field 'key'; \
             prefer 'env' or keychain 'service'+'account'"
        );
        return Ok(key.clone());
    }

    if let (Some(ref service), Some(ref account)) = (&auth.service, &auth.account) {
        match resolve_from_keychain(service, account) {
            Ok(secret) => return Ok(secret),
            Err(e) => {
                tracing::warn!(
                    service = %service,
                    account = %account,
                    error = %e,
                    "keychain lookup failed, falling through to env"
                );
            }
        }
    }

    if let Some(ref env_var) = auth.env {
        return std::env::var(env_var).map_err(|_| {
            Error::Auth(format!(
                "environment variable '{env_var}' not set or not valid UTF-8"
            ))
        });
    }

    if let (Some(ref service), Some(ref account)) = (&auth.service, &auth.account) {
        let fallback_var = keychain_fallback_env_name(service, account);
        if let Ok(val) = std::env::var(&fallback_var) {
            tracing::info!(env_var = %fallback_var, "API key resolved from fallback env var");
            return Ok(val);
        }
    }

    Err(Error::Auth(
        "no API key configured: set 'key', 'env', or keychain 'service'+'account'".into(),
    ))
}

/// Read a secret from the OS keychain. Fails on headless systems without a
/// keychain daemon.
pub fn resolve_from_keychain(service: &str, account: &str) -> Result<String> {
    let entry = keyring::Entry::new(service, account)
        .map_err(|e| Error::Auth(format!("keyring entry creation failed: {e}")))?;
    entry
        .get_password()
        .map_err(|e| Error::Auth(format!("keyring get_password failed: {e}")))
}

/// `("studysync", "completion-key")` → `"STUDYSYNC_COMPLETION_KEY"`.
pub fn keychain_fallback_env_name(service: &str, account: &str) -> String {
    format!(
        "{}_{}",
        service.to_uppercase().replace('-', "_"),
        account.to_uppercase().replace('-', "_"),
    )
}
