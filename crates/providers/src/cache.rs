//! Short-lived response cache.
//!
//! Entries are keyed by a digest of the normalized question and clamped
//! history and expire after a fixed TTL. Expired entries are dropped lazily
//! on lookup and in bulk by [`ResponseCache::prune_expired`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use ss_domain::clock::SharedClock;

use crate::traits::{Completion, HistoryTurn};

/// Deterministic cache key: SHA-256 over the trimmed question and each
/// turn's role and trimmed message, with separators that cannot occur in
/// ordinary text.
pub fn cache_key(question: &str, history: &[HistoryTurn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(question.trim().as_bytes());
    for turn in history {
        hasher.update([0x1e]);
        hasher.update(turn.role.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(turn.message.trim().as_bytes());
    }
    hex::encode(hasher.finalize())
}

struct CacheEntry {
    completion: Completion,
    expires_at: DateTime<Utc>,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: SharedClock,
}

impl ResponseCache {
    pub fn new(ttl: std::time::Duration, clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::zero()),
            clock,
        }
    }

    /// A live entry, marked `cached`. Never serves one past `expires_at`.
    pub fn get(&self, key: &str) -> Option<Completion> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if now > entry.expires_at => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(Completion {
                cached: true,
                ..entry.completion.clone()
            }),
            None => None,
        }
    }

    /// Store a completion. A zero TTL disables caching.
    pub fn insert(&self, key: String, completion: Completion) {
        if self.ttl <= Duration::zero() {
            return;
        }
        let expires_at = self.clock.now() + self.ttl;
        self.entries.lock().insert(
            key,
            CacheEntry {
                completion: Completion {
                    cached: false,
                    ..completion
                },
                expires_at,
            },
        );
    }

    /// Drop every expired entry; returns how many went.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ss_domain::clock::ManualClock;
    use ss_domain::model::Role;

    use super::*;

    fn completion(text: &str) -> Completion {
        Completion {
            text: text.into(),
            source_documents: Vec::new(),
            cached: false,
        }
    }

    #[test]
    fn key_ignores_surrounding_whitespace_but_not_history() {
        let history = vec![HistoryTurn::new(Role::User, "hi")];
        assert_eq!(cache_key(" what? ", &history), cache_key("what?", &history));
        assert_ne!(cache_key("what?", &history), cache_key("what?", &[]));
        assert_eq!(cache_key("q", &[]).len(), 64);
    }

    #[test]
    fn entry_is_served_until_expiry_and_never_after() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = ResponseCache::new(std::time::Duration::from_secs(30), clock.clone());
        cache.insert("k".into(), completion("answer"));

        clock.advance(Duration::seconds(30));
        let hit = cache.get("k").unwrap();
        assert_eq!(hit.text, "answer");
        assert!(hit.cached);

        clock.advance(Duration::milliseconds(1));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn prune_removes_only_expired_entries() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = ResponseCache::new(std::time::Duration::from_secs(30), clock.clone());
        cache.insert("old".into(), completion("a"));
        clock.advance(Duration::seconds(20));
        cache.insert("new".into(), completion("b"));
        clock.advance(Duration::seconds(15));

        assert_eq!(cache.prune_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new").is_some());
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = ResponseCache::new(
            std::time::Duration::ZERO,
            Arc::new(ManualClock::starting_now()),
        );
        cache.insert("k".into(), completion("a"));
        assert!(cache.is_empty());
    }
}
