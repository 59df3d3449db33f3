//! Connection Liveness Timers
//!
//! Per disconnected player, a pair of scheduled callbacks: the
//! opponent-notify task (short delay) and the forced-forfeit task (grace
//! period). Keyed by `(room_code, identity)` with at most one live pair
//! per key: a second disconnect while one is pending must not create
//! duplicates, and a reconnect cancels both before any new disconnect can
//! schedule new ones.
//!
//! These are the only explicitly cancelable timers in the engine. Attack
//! and shield timers are never canceled; they are guarded by existence
//! checks at fire time instead.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// The two scheduled callbacks for one disconnected player.
pub struct TimerPair {
    /// Tells the opponent "reconnecting..." after a short delay.
    pub notify: JoinHandle<()>,
    /// Forfeits the match after the grace period.
    pub forfeit: JoinHandle<()>,
}

impl TimerPair {
    fn abort(self) {
        self.notify.abort();
        self.forfeit.abort();
    }
}

/// Registry of outstanding grace-period timer pairs.
#[derive(Default)]
pub struct LivenessTimers {
    inner: Mutex<HashMap<(String, Uuid), TimerPair>>,
}

impl LivenessTimers {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pair for `(room_code, identity)`. If a pair is already
    /// outstanding the new one is aborted and `false` is returned,
    /// preserving the one-pair-per-key invariant.
    pub async fn insert(&self, room_code: &str, identity: Uuid, pair: TimerPair) -> bool {
        let mut inner = self.inner.lock().await;
        let key = (room_code.to_string(), identity);
        if inner.contains_key(&key) {
            pair.abort();
            return false;
        }
        inner.insert(key, pair);
        true
    }

    /// Cancel both callbacks for a key. Returns true if a pair existed.
    /// Called on reconnect, and by the timers themselves once they fire.
    pub async fn cancel(&self, room_code: &str, identity: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.remove(&(room_code.to_string(), identity)) {
            Some(pair) => {
                pair.abort();
                true
            }
            None => false,
        }
    }

    /// Remove a pair without aborting its tasks. Used by the forfeit
    /// callback to retire its own entry once it fires; aborting there
    /// would cancel the callback mid-flight.
    pub async fn forget(&self, room_code: &str, identity: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        inner
            .remove(&(room_code.to_string(), identity))
            .is_some()
    }

    /// Cancel every pair belonging to a room. Part of room teardown.
    pub async fn cancel_room(&self, room_code: &str) {
        let mut inner = self.inner.lock().await;
        let keys: Vec<_> = inner
            .keys()
            .filter(|(room, _)| room == room_code)
            .cloned()
            .collect();
        for key in keys {
            if let Some(pair) = inner.remove(&key) {
                pair.abort();
            }
        }
    }

    /// Outstanding pair count.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Whether no pairs are outstanding.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
