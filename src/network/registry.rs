//! Session Registry
//!
//! Process-wide mapping from room code to duel session. The registry is
//! the sole owner of session lifetime: insertion and deletion happen under
//! one write lock, so a lookup can never succeed on a code mid-deletion.
//! Removal invalidates every pending attack and liveness timer for the
//! room, because timers re-validate through this table at fire time.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::game::duel::DuelSession;
use crate::network::protocol::ServerMessage;

/// Room-code alphabet: uppercase letters and digits minus the lookalikes
/// (I, O, 0, 1).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Room-code length.
const CODE_LEN: usize = 6;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No session holds this room code.
    #[error("Room not found")]
    RoomNotFound,
}

/// Shared handle to one session.
pub type SessionHandle = Arc<RwLock<DuelSession>>;

/// Process-wide room table.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session in `Lobby` phase with the host in `slot_a`.
    /// The room code is generated once, collision-checked against the
    /// live table, and immutable afterwards.
    pub async fn create(
        &self,
        topic: String,
        identity: Uuid,
        registered: bool,
        username: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> (String, SessionHandle) {
        let mut sessions = self.sessions.write().await;

        let code = {
            let mut rng = rand::thread_rng();
            loop {
                let candidate: String = (0..CODE_LEN)
                    .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                    .collect();
                if !sessions.contains_key(&candidate) {
                    break candidate;
                }
            }
        };

        let session = Arc::new(RwLock::new(DuelSession::new(
            code.clone(),
            topic,
            identity,
            registered,
            username,
            sender,
        )));
        sessions.insert(code.clone(), session.clone());
        (code, session)
    }

    /// Look up a session by room code.
    pub async fn get(&self, room_code: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(room_code).cloned()
    }

    /// Look up a session, erroring when absent.
    pub async fn get_or_err(&self, room_code: &str) -> Result<SessionHandle, RegistryError> {
        self.get(room_code).await.ok_or(RegistryError::RoomNotFound)
    }

    /// Remove a session. Outstanding timers for the room become no-ops
    /// once the handle is gone from the table.
    pub async fn remove(&self, room_code: &str) -> Option<SessionHandle> {
        self.sessions.write().await.remove(room_code)
    }

    /// Snapshot of all sessions, for the win-condition sweep.
    pub async fn snapshot(&self) -> Vec<(String, SessionHandle)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(code, handle)| (code.clone(), handle.clone()))
            .collect()
    }

    /// Active session count.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
