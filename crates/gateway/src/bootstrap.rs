//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use ss_domain::clock::system_clock;
use ss_domain::config::{Config, ConfigSeverity};
use ss_providers::HttpTransport;
use ss_sessions::{FeedbackStore, MemoryStore};

use crate::api::auth::hash_token;
use crate::state::AppState;

/// Validate config, open the persisted store and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    check_config(&config)?;

    let clock = system_clock();

    // ── Storage ──────────────────────────────────────────────────────
    let store = Arc::new(
        MemoryStore::open(
            &config.store.state_path,
            clock.clone(),
            config.store.max_batch_ops,
        )
        .context("opening conversation store")?,
    );
    let feedback = Arc::new(FeedbackStore::new(&config.store.state_path, clock.clone()));
    tracing::info!(path = %config.store.state_path.display(), "conversation store ready");

    // ── Completion transport ─────────────────────────────────────────
    let transport = Arc::new(
        HttpTransport::from_config(&config.completion)
            .context("initializing completion transport")?,
    );
    tracing::info!(endpoint = %transport.endpoint(), "completion transport ready");

    let mut state = AppState::assemble(config.clone(), store, transport, feedback, clock);

    // ── API token (read once, hashed) ────────────────────────────────
    state.api_token_hash = match std::env::var(&config.server.api_token_env) {
        Ok(token) if !token.is_empty() => Some(hash_token(&token)),
        _ => {
            tracing::warn!(
                env = %config.server.api_token_env,
                "no API token configured; protected endpoints accept unauthenticated requests"
            );
            None
        }
    };

    Ok(state)
}

/// Log every config issue; fail when any is an error.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

/// Spawn the long-running maintenance loops: snapshot flush, cache and
/// limiter expiry, and the archival sweep.
///
/// Call this **after** [`build_app_state`] when running the HTTP server.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Periodic store snapshot ──────────────────────────────────────
    if let Some(every) = maintenance_period(state.config.store.flush_interval_secs) {
        let store = state.memory_store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match store.flush().await {
                    Ok(true) => tracing::debug!("store snapshot written"),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "store snapshot failed"),
                }
            }
        });
    }

    // ── Cache + rate-limit expiry ────────────────────────────────────
    if let Some(every) = maintenance_period(state.config.rate_limit.sweep_interval_secs) {
        let client = state.client.clone();
        let limiters = [state.api_limiter.clone(), state.message_limiter.clone()];
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let cache_entries = client.cache().prune_expired();
                let limiter_keys: usize = limiters.iter().map(|l| l.prune_expired()).sum();
                if cache_entries + limiter_keys > 0 {
                    tracing::debug!(cache_entries, limiter_keys, "expired entries pruned");
                }
            }
        });
    }

    // ── Archival sweep ───────────────────────────────────────────────
    if let Some(every) = maintenance_period(state.config.retention.sweep_interval_secs) {
        let retention = state.retention.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match retention.sweep().await {
                    Ok(report) if report.archived > 0 || report.failures > 0 => tracing::info!(
                        conversations = report.conversations,
                        archived = report.archived,
                        failures = report.failures,
                        "archival sweep finished"
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "archival sweep failed"),
                }
            }
        });
    }

    tracing::info!("background tasks spawned");
}

/// A maintenance interval of `0` seconds turns that loop off.
fn maintenance_period(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
