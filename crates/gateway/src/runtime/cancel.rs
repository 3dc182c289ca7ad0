//! Per-user cancellation tokens (§4.D, "Cancellation and timeouts"): a
//! client disconnect from `/agent-stream` cancels that user's in-flight
//! agent loop task. Checked at every suspension point of the loop; no
//! in-flight tool submit is interrupted, since the Driver cannot be
//! interrupted mid-snippet (its result is simply dropped).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellation flag shared between the SSE handler and the agent loop
/// task it drives.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the active cancel token per user id. Registering replaces any
/// prior token for that user — only one agent loop runs per user at a
/// time (enforced by `SessionLockMap`), so a stale entry can only be an
/// orphan from a turn that already finished.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, user_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(user_id.to_owned(), token.clone());
        token
    }

    pub fn cancel(&self, user_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(user_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn remove(&self, user_id: &str) {
        self.tokens.lock().remove(user_id);
    }

    pub fn is_running(&self, user_id: &str) -> bool {
        self.tokens.lock().contains_key(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_map_register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("u1");
        assert!(!token.is_cancelled());
        assert!(map.is_running("u1"));

        assert!(map.cancel("u1"));
        assert!(token.is_cancelled());

        map.remove("u1");
        assert!(!map.is_running("u1"));
        assert!(!map.cancel("u1"));
    }

    #[test]
    fn cancel_nonexistent_user_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("ghost"));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        map.register("u1");
        map.remove("u1");
        map.remove("u1");
        assert!(!map.is_running("u1"));
    }

    #[test]
    fn register_replaces_previous_token() {
        let map = CancelMap::new();
        let old_token = map.register("u1");
        let new_token = map.register("u1");

        map.cancel("u1");
        assert!(new_token.is_cancelled());
        assert!(!old_token.is_cancelled());
    }

    #[test]
    fn cancel_token_clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
