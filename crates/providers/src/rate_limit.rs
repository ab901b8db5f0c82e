//! Fixed-window request limiter.
//!
//! Each key gets `{count, reset_at}`. A request after `reset_at` opens a new
//! window with count 1; otherwise the count grows until `max_requests`,
//! after which requests are refused with [`Error::RateLimited`] until the
//! window resets. Counts are never decremented.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use ss_domain::clock::SharedClock;
use ss_domain::config::WindowLimit;
use ss_domain::error::{Error, Result};
use ss_domain::trace::TraceEvent;

struct WindowState {
    count: u32,
    reset_at: DateTime<Utc>,
}

pub struct SlidingWindowLimiter {
    name: String,
    max_requests: u32,
    window: Duration,
    clock: SharedClock,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl SlidingWindowLimiter {
    pub fn new(name: &str, limit: WindowLimit, clock: SharedClock) -> Self {
        Self {
            name: name.to_owned(),
            max_requests: limit.max_requests,
            window: Duration::seconds(
                i64::try_from(limit.window_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1_000),
            ),
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Count one request against `key`, or refuse it.
    pub fn check(&self, key: &str) -> Result<()> {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let state = windows.entry(key.to_owned()).or_insert(WindowState {
            count: 0,
            reset_at: now + self.window,
        });

        if now > state.reset_at {
            state.count = 1;
            state.reset_at = now + self.window;
            return Ok(());
        }
        if state.count >= self.max_requests {
            let retry_after_ms =
                u64::try_from((state.reset_at - now).num_milliseconds()).unwrap_or(0);
            TraceEvent::RateLimited {
                limiter: self.name.clone(),
                key: key.to_owned(),
                retry_after_ms,
            }
            .emit();
            return Err(Error::RateLimited { retry_after_ms });
        }
        state.count += 1;
        Ok(())
    }

    /// Forget windows that have already reset; returns how many went.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, state| now <= state.reset_at);
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}
