//! Cancellation tokens for in-flight streaming requests.
//!
//! Every streaming ask registers a token under its request id so that a
//! separate `POST .../cancel` call can abort it. All tokens are children of
//! one root token, which is cancelled on shutdown.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub struct CancelMap {
    root: CancellationToken,
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a token for a request. Re-registering an id
    /// replaces the previous token without cancelling it.
    pub fn register(&self, request_id: &str) -> CancellationToken {
        let token = self.root.child_token();
        self.tokens
            .lock()
            .insert(request_id.to_owned(), token.clone());
        token
    }

    /// Cancel a running request. Returns true if one was registered.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.tokens.lock().get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget a request (called when its stream ends).
    pub fn remove(&self, request_id: &str) {
        self.tokens.lock().remove(request_id);
    }

    pub fn is_running(&self, request_id: &str) -> bool {
        self.tokens.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel everything, including requests registered afterwards.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("r1");
        assert!(!token.is_cancelled());
        assert!(map.is_running("r1"));

        assert!(map.cancel("r1"));
        assert!(token.is_cancelled());

        map.remove("r1");
        assert!(!map.is_running("r1"));
        assert!(!map.cancel("r1"));
    }

    #[test]
    fn cancel_unknown_request_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
        assert!(map.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        map.register("r1");
        map.remove("r1");
        map.remove("r1");
        assert!(!map.is_running("r1"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old = map.register("r1");
        let new = map.register("r1");
        assert_eq!(map.len(), 1);

        map.cancel("r1");
        assert!(new.is_cancelled());
        assert!(!old.is_cancelled());
    }

    #[test]
    fn cancel_all_reaches_every_token() {
        let map = CancelMap::new();
        let a = map.register("a");
        let b = map.register("b");
        map.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());

        // Tokens created after shutdown start cancelled.
        assert!(map.register("c").is_cancelled());
    }
}
