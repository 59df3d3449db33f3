//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Every
//! message is a closed, internally-tagged JSON union; there are no
//! loosely-shaped payloads. Tags match the documented event names
//! (`create_room`, `send_attack`, `match_result`, ...).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::duel::{EndReason, Phase, SlotRole};
use crate::game::tier::{AmmoEntry, Tier};
use crate::game::words::PoolMetadata;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a room and occupy `slot_a`.
    CreateRoom {
        /// Display name.
        username: String,
        /// Stable identity; omitted for guest play.
        identity: Option<Uuid>,
        /// Word-pool topic; server default when omitted.
        topic: Option<String>,
    },

    /// Join an existing room by code.
    JoinRoom {
        /// Target room.
        room_code: String,
        /// Display name.
        username: String,
        /// Stable identity; omitted for guest play.
        identity: Option<Uuid>,
    },

    /// Flag this player ready. The match starts when both slots are ready.
    PlayerReady {
        /// Target room.
        room_code: String,
    },

    /// Launch an attack of the given tier.
    SendAttack {
        /// Target room.
        room_code: String,
        /// Attack tier (defensive is rejected).
        tier: Tier,
    },

    /// Raise a shield, consuming a defensive word.
    ActivateShield {
        /// Target room.
        room_code: String,
    },

    /// Request a full state snapshot.
    RequestState {
        /// Target room.
        room_code: String,
    },

    /// Intentionally leave the room.
    LeaveRoom {
        /// Target room.
        room_code: String,
    },

    /// Reconnect to a room after a dropped connection (page refresh).
    /// Requires the stable identity issued at create/join.
    RejoinRoom {
        /// Target room.
        room_code: String,
        /// Display name.
        username: String,
        /// Stable identity to match against the occupied slot.
        identity: Uuid,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client(s).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Room created; the creator holds `slot_a`.
    RoomCreated {
        /// Shareable room code.
        room_code: String,
        /// Identity bound to the slot (server-assigned for guests).
        identity: Uuid,
        /// Current roster.
        roster: Vec<RosterEntry>,
        /// Current phase.
        phase: Phase,
    },

    /// Roster or phase changed.
    RoomUpdate {
        /// Current roster.
        roster: Vec<RosterEntry>,
        /// Current phase.
        phase: Phase,
    },

    /// Match started; carries this player's full ammunition list.
    GameStart(GameStartInfo),

    /// An attack was launched (broadcast to the room).
    AttackLaunched {
        /// The attack in flight.
        attack: AttackInfo,
        /// Launcher's remaining ammunition.
        ammo_remaining: usize,
    },

    /// An attack landed on you.
    ReceiveAttack {
        /// Attack identifier.
        attack_id: u64,
        /// Attack tier.
        tier: Tier,
        /// Whether your shield absorbed it.
        blocked: bool,
        /// Damage applied.
        damage: u32,
        /// Your hp after resolution.
        target_hp: u32,
    },

    /// An attack resolved (broadcast to the room).
    AttackImpact {
        /// Attack identifier.
        attack_id: u64,
        /// Slot that was hit.
        target: SlotRole,
        /// Whether a shield absorbed it.
        blocked: bool,
        /// Damage applied.
        damage: u32,
        /// Target hp after resolution.
        target_hp: u32,
    },

    /// Your shield is up.
    ShieldActivated {
        /// Slot that raised the shield.
        role: SlotRole,
        /// Shield state.
        shield: ShieldInfo,
        /// Remaining ammunition after the defense word was consumed.
        ammo_remaining: usize,
    },

    /// The opponent raised a shield.
    EnemyShieldActive {
        /// Slot that raised the shield.
        role: SlotRole,
        /// Shield state.
        shield: ShieldInfo,
    },

    /// Full state snapshot (reply to `request_state`).
    StateUpdate(StateSnapshot),

    /// Terminal result, emitted exactly once per match.
    MatchResult(MatchResultInfo),

    /// Opponent left for good (grace period expired or intentional leave).
    PlayerDisconnected {
        /// Slot that dropped.
        role: SlotRole,
        /// Human-readable reason.
        message: String,
    },

    /// Opponent dropped but may still reconnect.
    PlayerTemporarilyDisconnected {
        /// Slot that dropped.
        role: SlotRole,
        /// Display name.
        username: String,
        /// Human-readable notice.
        message: String,
    },

    /// Opponent reconnected within the grace period.
    PlayerReconnected {
        /// Slot that returned.
        role: SlotRole,
        /// Display name.
        username: String,
    },

    /// Rejoin accepted; full state for convergence.
    RejoinSuccess {
        /// Per-viewer snapshot.
        snapshot: StateSnapshot,
    },

    /// Rejoin rejected (room gone, or identity holds no slot).
    RejoinFailed {
        /// Human-readable reason.
        message: String,
    },

    /// Request-scoped error; the session is unchanged.
    Error {
        /// Human-readable message.
        message: String,
    },
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// One roster line in `room_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Occupied slot.
    pub role: SlotRole,
    /// Display name.
    pub username: String,
    /// Ready flag.
    pub ready: bool,
}

/// `game_start` payload, also resent on rejoin mid-match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStartInfo {
    /// The receiving player's slot.
    pub role: SlotRole,
    /// Full ammunition list including used flags.
    pub ammo: Vec<AmmoEntry>,
    /// Word-pool provenance.
    pub metadata: PoolMetadata,
    /// Opponent display name.
    pub opponent: String,
}

/// An attack in flight, as seen on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackInfo {
    /// Unique per session.
    pub id: u64,
    /// Launching slot.
    pub from: SlotRole,
    /// Targeted slot.
    pub target: SlotRole,
    /// Word tier.
    pub tier: Tier,
    /// Damage on impact.
    pub damage: u32,
    /// Travel time in milliseconds.
    pub travel_ms: u64,
    /// The typed word.
    pub word: String,
}

/// Shield state on the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ShieldInfo {
    /// Whether the shield is up.
    pub active: bool,
    /// Blocks left.
    pub remaining_blocks: u32,
}

/// The viewer's own state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfState {
    /// The viewer's slot.
    pub role: SlotRole,
    /// Health.
    pub hp: u32,
    /// Unused ammunition count.
    pub ammo_remaining: usize,
    /// Shield state.
    pub shield: ShieldInfo,
}

/// The opponent's public state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpponentState {
    /// Display name.
    pub username: String,
    /// Health.
    pub hp: u32,
    /// Unused ammunition count.
    pub ammo_remaining: usize,
    /// Shield state.
    pub shield: ShieldInfo,
}

/// Full per-viewer snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Room code.
    pub room_code: String,
    /// Lifecycle phase.
    pub phase: Phase,
    /// Own state.
    pub you: SelfState,
    /// Opponent state, absent while alone in the lobby.
    pub opponent: Option<OpponentState>,
}

/// Final per-slot summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotFinal {
    /// Display name.
    pub username: String,
    /// Final health.
    pub hp: u32,
    /// Unused ammunition left.
    pub ammo_remaining: usize,
}

/// Final session state carried by `match_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalState {
    /// Host slot summary.
    pub slot_a: SlotFinal,
    /// Challenger slot summary.
    pub slot_b: Option<SlotFinal>,
}

/// `match_result` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResultInfo {
    /// Winning slot, `None` for a draw.
    pub winner: Option<SlotRole>,
    /// Why the match ended.
    pub reason: EndReason,
    /// Final session state.
    pub final_state: FinalState,
    /// Recorder-assigned id, absent for guest matches or recorder failure.
    pub match_id: Option<Uuid>,
    /// RFC 3339 end timestamp.
    pub timestamp: String,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::SendAttack {
            room_code: "ABC123".into(),
            tier: Tier::High,
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("send_attack"));
        assert!(json.contains("\"high\""));

        let parsed = ClientMessage::from_json(&json).unwrap();
        if let ClientMessage::SendAttack { room_code, tier } = parsed {
            assert_eq!(room_code, "ABC123");
            assert_eq!(tier, Tier::High);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_create_room_without_identity() {
        let json = r#"{"type":"create_room","username":"alice","identity":null,"topic":null}"#;
        let parsed = ClientMessage::from_json(json).unwrap();
        if let ClientMessage::CreateRoom {
            username, identity, ..
        } = parsed
        {
            assert_eq!(username, "alice");
            assert!(identity.is_none());
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_server_message_json_roundtrip() {
        let msg = ServerMessage::AttackImpact {
            attack_id: 7,
            target: SlotRole::SlotB,
            blocked: true,
            damage: 0,
            target_hp: 100,
        };

        let json = msg.to_json().unwrap();
        assert!(json.contains("attack_impact"));
        assert!(json.contains("slot_b"));

        let parsed = ServerMessage::from_json(&json).unwrap();
        if let ServerMessage::AttackImpact {
            attack_id, blocked, ..
        } = parsed
        {
            assert_eq!(attack_id, 7);
            assert!(blocked);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_match_result_serialization() {
        let msg = ServerMessage::MatchResult(MatchResultInfo {
            winner: Some(SlotRole::SlotA),
            reason: EndReason::OutOfAmmo,
            final_state: FinalState {
                slot_a: SlotFinal {
                    username: "alice".into(),
                    hp: 60,
                    ammo_remaining: 0,
                },
                slot_b: Some(SlotFinal {
                    username: "bob".into(),
                    hp: 40,
                    ammo_remaining: 0,
                }),
            },
            match_id: None,
            timestamp: "2024-01-01T00:00:00Z".into(),
        });

        let json = msg.to_json().unwrap();
        assert!(json.contains("match_result"));
        assert!(json.contains("out_of_ammo"));
        let _ = ServerMessage::from_json(&json).unwrap();
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"launch_nukes"}"#).is_err());
    }

    #[test]
    fn test_phase_tags() {
        assert_eq!(
            serde_json::to_string(&Phase::AwaitingReady).unwrap(),
            "\"awaiting_ready\""
        );
        assert_eq!(
            serde_json::to_string(&EndReason::OpponentDisconnected).unwrap(),
            "\"opponent_disconnected\""
        );
    }
}
