//! Duel Session
//!
//! One match's full state: both player slots, ammunition, pending attacks,
//! shields and lifecycle phase. Every operation here is synchronous and is
//! invoked under the session's lock; the network layer owns all timing
//! (attack travel, shield expiry, grace periods, the win sweep) and calls
//! back in with plain ids, so each mutation is serialized and each pending
//! item is re-validated at fire time.

use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::game::tier::{AmmoEntry, Tier, SHIELD_BLOCKS};
use crate::game::words::{PoolMetadata, WordPool};
use crate::network::protocol::{
    FinalState, GameStartInfo, OpponentState, RosterEntry, SelfState, ServerMessage, ShieldInfo,
    SlotFinal, StateSnapshot,
};
use crate::INITIAL_HP;

/// Which of the two slots a duelist occupies.
///
/// Attacks reference slots by role, never by pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotRole {
    /// The host slot, filled at room creation.
    SlotA,
    /// The challenger slot, filled on join.
    SlotB,
}

impl SlotRole {
    /// The other slot.
    #[inline]
    pub fn opponent(self) -> SlotRole {
        match self {
            SlotRole::SlotA => SlotRole::SlotB,
            SlotRole::SlotB => SlotRole::SlotA,
        }
    }
}

/// Session lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// One slot filled, waiting for a challenger.
    Lobby,
    /// Both slots filled, waiting for ready flags.
    AwaitingReady,
    /// Match running.
    InProgress,
    /// Terminal outcome reached; room lingers briefly for result display.
    Finished,
}

/// Why a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A duelist's hp reached zero.
    Knockout,
    /// Both duelists exhausted their ammunition; higher hp won.
    OutOfAmmo,
    /// Draw: equal hp at exhaustion, or simultaneous knockout.
    Tie,
    /// Grace period expired without a reconnect.
    OpponentDisconnected,
    /// Intentional mid-match leave.
    OpponentLeft,
}

/// Terminal outcome of a duel. `winner` is `None` for a draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Winning slot, if any.
    pub winner: Option<SlotRole>,
    /// Why the match ended.
    pub reason: EndReason,
}

/// Duel engine errors. All are client errors: reported to the originating
/// connection only, session state unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DuelError {
    /// Both slots are occupied by other identities.
    #[error("Room is full")]
    RoomFull,

    /// Action requires an in-progress match.
    #[error("Game not started")]
    GameNotStarted,

    /// The acting identity holds no slot in this room.
    #[error("Player not in room")]
    UnknownPlayer,

    /// The tier cannot be used for this action.
    #[error("Invalid tier")]
    InvalidTier,

    /// No unused ammunition entry of the requested tier.
    #[error("No ammo of tier {0:?} available")]
    NoAmmoOfTier(Tier),

    /// Both ready flags are required before start.
    #[error("Players not ready")]
    PlayersNotReady,

    /// Operation not valid in the current phase.
    #[error("Invalid session phase")]
    InvalidPhase,
}

/// One-hit block state.
///
/// `seq` increments on every activation; the auto-expiry timer carries the
/// sequence it was scheduled for and is ignored if a newer shield has been
/// raised since, so expiry never tears down a fresh shield.
#[derive(Clone, Debug)]
pub struct ShieldState {
    /// Whether the shield is currently up.
    pub active: bool,
    /// Blocks left before the shield drops.
    pub remaining_blocks: u32,
    /// When the current shield was raised.
    pub activated_at: Option<Instant>,
    /// Activation sequence number.
    pub seq: u64,
}

impl ShieldState {
    fn new() -> Self {
        Self {
            active: false,
            remaining_blocks: 0,
            activated_at: None,
            seq: 0,
        }
    }

    /// Wire representation.
    pub fn info(&self) -> ShieldInfo {
        ShieldInfo {
            active: self.active,
            remaining_blocks: self.remaining_blocks,
        }
    }
}

/// One duelist's slot.
#[derive(Debug)]
pub struct PlayerSlot {
    /// Stable identity. Server-assigned for guests.
    pub identity: Uuid,
    /// Whether the identity was supplied by the client (false = guest).
    pub registered: bool,
    /// Display name.
    pub username: String,
    /// Volatile connection handle, replaced on reconnect.
    pub sender: Option<mpsc::Sender<ServerMessage>>,
    /// Health, 0..=100.
    pub hp: u32,
    /// Ammunition list, dealt at match start.
    pub ammo: Vec<AmmoEntry>,
    /// Shield state.
    pub shield: ShieldState,
    /// Ready flag.
    pub ready: bool,
    /// Liveness flag.
    pub connected: bool,
    /// When the player dropped, if currently disconnected.
    pub disconnected_at: Option<Instant>,
}

impl PlayerSlot {
    fn new(
        identity: Uuid,
        registered: bool,
        username: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            identity,
            registered,
            username,
            sender: Some(sender),
            hp: INITIAL_HP,
            ammo: Vec::new(),
            shield: ShieldState::new(),
            ready: false,
            connected: true,
            disconnected_at: None,
        }
    }

    /// Count of unused ammunition entries.
    pub fn ammo_remaining(&self) -> usize {
        self.ammo.iter().filter(|e| !e.used).count()
    }

    fn take_unused(&mut self, tier: Tier) -> Option<String> {
        let entry = self.ammo.iter_mut().find(|e| e.tier == tier && !e.used)?;
        entry.used = true;
        Some(entry.word.clone())
    }
}

/// An attack in flight.
#[derive(Clone, Debug)]
pub struct PendingAttack {
    /// Unique per session.
    pub id: u64,
    /// Launching slot.
    pub origin: SlotRole,
    /// Targeted slot.
    pub target: SlotRole,
    /// Word tier.
    pub tier: Tier,
    /// Damage on impact, fixed by tier at launch.
    pub damage: u32,
    /// The word that was typed.
    pub word: String,
    /// Launch instant.
    pub launched_at: Instant,
}

/// Result of a successful launch.
#[derive(Clone, Debug)]
pub struct AttackLaunch {
    /// The attack now in flight.
    pub attack: PendingAttack,
    /// Origin's remaining ammunition after the launch.
    pub ammo_remaining: usize,
}

/// Result of resolving one attack.
#[derive(Clone, Debug)]
pub struct AttackImpact {
    /// The resolved attack.
    pub attack: PendingAttack,
    /// Whether a shield absorbed it.
    pub blocked: bool,
    /// Damage actually applied (0 when blocked).
    pub damage: u32,
    /// Target hp after resolution.
    pub target_hp: u32,
}

/// Result of a successful shield activation.
#[derive(Clone, Debug)]
pub struct ShieldActivation {
    /// Activation sequence, for the expiry timer.
    pub seq: u64,
    /// Wire shield state.
    pub shield: ShieldInfo,
    /// Remaining ammunition after consuming the defense word.
    pub ammo_remaining: usize,
}

/// Outcome of a join request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Slot the player occupies.
    pub role: SlotRole,
    /// True when an existing slot was rebound (same identity returning).
    pub reconnected: bool,
}

/// One match's full state. Owned exclusively by the [`SessionRegistry`]
/// behind an `Arc<RwLock<..>>`.
///
/// [`SessionRegistry`]: crate::network::registry::SessionRegistry
#[derive(Debug)]
pub struct DuelSession {
    /// Immutable, human-shareable room code.
    pub room_code: String,
    /// Lifecycle phase.
    pub phase: Phase,
    /// Topic the word pool is generated for.
    pub topic: String,
    /// Word-pool provenance, set at match start.
    pub pool_metadata: Option<PoolMetadata>,
    /// Terminal outcome, set by `finish`.
    pub outcome: Option<MatchOutcome>,
    /// Creation instant.
    pub created_at: Instant,
    /// Match start instant.
    pub started_at: Option<Instant>,
    slot_a: PlayerSlot,
    slot_b: Option<PlayerSlot>,
    pending_attacks: Vec<PendingAttack>,
    next_attack_id: u64,
}

impl DuelSession {
    /// Create a session in `Lobby` phase with `slot_a` populated.
    pub fn new(
        room_code: String,
        topic: String,
        identity: Uuid,
        registered: bool,
        username: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self {
            room_code,
            phase: Phase::Lobby,
            topic,
            pool_metadata: None,
            outcome: None,
            created_at: Instant::now(),
            started_at: None,
            slot_a: PlayerSlot::new(identity, registered, username, sender),
            slot_b: None,
            pending_attacks: Vec::new(),
            next_attack_id: 0,
        }
    }

    /// Borrow a slot by role.
    pub fn slot(&self, role: SlotRole) -> Option<&PlayerSlot> {
        match role {
            SlotRole::SlotA => Some(&self.slot_a),
            SlotRole::SlotB => self.slot_b.as_ref(),
        }
    }

    fn slot_mut(&mut self, role: SlotRole) -> Option<&mut PlayerSlot> {
        match role {
            SlotRole::SlotA => Some(&mut self.slot_a),
            SlotRole::SlotB => self.slot_b.as_mut(),
        }
    }

    /// Find the slot held by an identity.
    pub fn slot_of(&self, identity: Uuid) -> Option<SlotRole> {
        if self.slot_a.identity == identity {
            return Some(SlotRole::SlotA);
        }
        if self.slot_b.as_ref().map(|s| s.identity) == Some(identity) {
            return Some(SlotRole::SlotB);
        }
        None
    }

    /// Attacks currently in flight.
    pub fn pending_attack_count(&self) -> usize {
        self.pending_attacks.len()
    }

    /// Join the room: rebind an existing slot when the identity matches
    /// (a returning player), otherwise fill `slot_b`.
    pub fn join(
        &mut self,
        identity: Uuid,
        registered: bool,
        username: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<JoinOutcome, DuelError> {
        if let Some(role) = self.slot_of(identity) {
            self.rebind(role, sender);
            return Ok(JoinOutcome {
                role,
                reconnected: true,
            });
        }

        if self.slot_b.is_some() {
            return Err(DuelError::RoomFull);
        }

        self.slot_b = Some(PlayerSlot::new(identity, registered, username, sender));
        if self.phase == Phase::Lobby {
            self.phase = Phase::AwaitingReady;
        }
        Ok(JoinOutcome {
            role: SlotRole::SlotB,
            reconnected: false,
        })
    }

    /// Replace a slot's connection handle and mark it live.
    pub fn rebind(&mut self, role: SlotRole, sender: mpsc::Sender<ServerMessage>) {
        if let Some(slot) = self.slot_mut(role) {
            slot.sender = Some(sender);
            slot.connected = true;
            slot.disconnected_at = None;
        }
    }

    /// Mark a slot disconnected, recording the timestamp.
    pub fn mark_disconnected(&mut self, role: SlotRole) {
        if let Some(slot) = self.slot_mut(role) {
            slot.connected = false;
            slot.disconnected_at = Some(Instant::now());
            slot.sender = None;
        }
    }

    /// Set a slot's ready flag. Returns true when both slots are filled
    /// and ready, i.e. the match may start.
    pub fn mark_ready(&mut self, role: SlotRole) -> Result<bool, DuelError> {
        if !matches!(self.phase, Phase::Lobby | Phase::AwaitingReady) {
            return Err(DuelError::InvalidPhase);
        }
        let slot = self.slot_mut(role).ok_or(DuelError::UnknownPlayer)?;
        slot.ready = true;
        Ok(self.both_ready())
    }

    /// Both slots filled and flagged ready.
    pub fn both_ready(&self) -> bool {
        self.slot_a.ready && self.slot_b.as_ref().is_some_and(|s| s.ready)
    }

    /// Start the match: deal each slot an independently shuffled 50-entry
    /// ammunition list from the pool and transition to `InProgress`.
    pub fn begin<R: Rng>(&mut self, pool: &WordPool, rng: &mut R) -> Result<(), DuelError> {
        if !matches!(self.phase, Phase::Lobby | Phase::AwaitingReady) {
            return Err(DuelError::InvalidPhase);
        }
        if !self.both_ready() {
            return Err(DuelError::PlayersNotReady);
        }

        self.slot_a.ammo = pool.deal_ammo(rng);
        if let Some(slot_b) = self.slot_b.as_mut() {
            slot_b.ammo = pool.deal_ammo(rng);
        }
        self.pool_metadata = Some(pool.metadata.clone());
        self.phase = Phase::InProgress;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    /// Launch an attack: consume one unused entry of `tier` and put the
    /// attack in flight. The caller schedules resolution after the tier's
    /// travel time.
    pub fn launch_attack(&mut self, role: SlotRole, tier: Tier) -> Result<AttackLaunch, DuelError> {
        if self.phase != Phase::InProgress {
            return Err(DuelError::GameNotStarted);
        }
        if !tier.is_attack() {
            return Err(DuelError::InvalidTier);
        }
        let slot = self.slot_mut(role).ok_or(DuelError::UnknownPlayer)?;
        let word = slot.take_unused(tier).ok_or(DuelError::NoAmmoOfTier(tier))?;
        let ammo_remaining = slot.ammo_remaining();

        let id = self.next_attack_id;
        self.next_attack_id += 1;

        let attack = PendingAttack {
            id,
            origin: role,
            target: role.opponent(),
            tier,
            damage: tier.damage(),
            word,
            launched_at: Instant::now(),
        };
        self.pending_attacks.push(attack.clone());

        Ok(AttackLaunch {
            attack,
            ammo_remaining,
        })
    }

    /// Resolve an attack by id. Idempotent: an unknown id (already
    /// resolved, or invalidated by teardown) is a no-op returning `None`.
    ///
    /// Shield availability is evaluated at this instant, not at launch:
    /// an active shield with blocks left absorbs the hit and loses one
    /// block; otherwise full damage lands, floored at 0 hp.
    pub fn resolve_attack(&mut self, attack_id: u64) -> Option<AttackImpact> {
        if self.phase != Phase::InProgress {
            return None;
        }
        let index = self.pending_attacks.iter().position(|a| a.id == attack_id)?;
        let attack = self.pending_attacks.remove(index);

        let target = self.slot_mut(attack.target)?;
        let blocked = target.shield.active && target.shield.remaining_blocks > 0;
        let damage = if blocked {
            target.shield.remaining_blocks -= 1;
            if target.shield.remaining_blocks == 0 {
                target.shield.active = false;
            }
            0
        } else {
            target.hp = target.hp.saturating_sub(attack.damage);
            attack.damage
        };
        let target_hp = target.hp;

        Some(AttackImpact {
            attack,
            blocked,
            damage,
            target_hp,
        })
    }

    /// Raise a shield: consume one unused defensive entry, grant one
    /// block, bump the activation sequence. The caller schedules
    /// auto-expiry after [`crate::game::tier::SHIELD_DURATION`].
    pub fn activate_shield(&mut self, role: SlotRole) -> Result<ShieldActivation, DuelError> {
        if self.phase != Phase::InProgress {
            return Err(DuelError::GameNotStarted);
        }
        let slot = self.slot_mut(role).ok_or(DuelError::UnknownPlayer)?;
        slot.take_unused(Tier::Defensive)
            .ok_or(DuelError::NoAmmoOfTier(Tier::Defensive))?;

        slot.shield.active = true;
        slot.shield.remaining_blocks = SHIELD_BLOCKS;
        slot.shield.activated_at = Some(Instant::now());
        slot.shield.seq += 1;

        Ok(ShieldActivation {
            seq: slot.shield.seq,
            shield: slot.shield.info(),
            ammo_remaining: slot.ammo_remaining(),
        })
    }

    /// Auto-expire a shield. Only drops the shield whose activation
    /// sequence matches `seq`; a shield that already blocked its hit, or
    /// a fresh shield raised after this expiry was scheduled, is left
    /// alone. Returns true if the shield was dropped.
    pub fn expire_shield(&mut self, role: SlotRole, seq: u64) -> bool {
        let Some(slot) = self.slot_mut(role) else {
            return false;
        };
        if slot.shield.active && slot.shield.seq == seq {
            slot.shield.active = false;
            slot.shield.remaining_blocks = 0;
            true
        } else {
            false
        }
    }

    /// Evaluate terminal conditions, in order: knockout, simultaneous
    /// knockout (draw), ammunition exhaustion. `None` while the duel
    /// continues.
    pub fn evaluate_win(&self) -> Option<MatchOutcome> {
        if self.phase != Phase::InProgress {
            return None;
        }
        let a = &self.slot_a;
        let b = self.slot_b.as_ref()?;

        match (a.hp == 0, b.hp == 0) {
            (true, true) => {
                // Unreachable under serialized resolution, kept as a draw.
                return Some(MatchOutcome {
                    winner: None,
                    reason: EndReason::Tie,
                });
            }
            (true, false) => {
                return Some(MatchOutcome {
                    winner: Some(SlotRole::SlotB),
                    reason: EndReason::Knockout,
                });
            }
            (false, true) => {
                return Some(MatchOutcome {
                    winner: Some(SlotRole::SlotA),
                    reason: EndReason::Knockout,
                });
            }
            (false, false) => {}
        }

        if a.ammo_remaining() == 0 && b.ammo_remaining() == 0 {
            let outcome = match a.hp.cmp(&b.hp) {
                std::cmp::Ordering::Greater => MatchOutcome {
                    winner: Some(SlotRole::SlotA),
                    reason: EndReason::OutOfAmmo,
                },
                std::cmp::Ordering::Less => MatchOutcome {
                    winner: Some(SlotRole::SlotB),
                    reason: EndReason::OutOfAmmo,
                },
                std::cmp::Ordering::Equal => MatchOutcome {
                    winner: None,
                    reason: EndReason::Tie,
                },
            };
            return Some(outcome);
        }

        None
    }

    /// Transition to `Finished`, abandoning any attacks still in flight.
    /// Their timers become no-ops via the resolve-by-id guard.
    pub fn finish(&mut self, outcome: MatchOutcome) -> FinalState {
        self.phase = Phase::Finished;
        self.outcome = Some(outcome);
        self.pending_attacks.clear();
        self.final_state()
    }

    /// Final per-slot summary for `match_result` and the recorder.
    pub fn final_state(&self) -> FinalState {
        let summarize = |slot: &PlayerSlot| SlotFinal {
            username: slot.username.clone(),
            hp: slot.hp,
            ammo_remaining: slot.ammo_remaining(),
        };
        FinalState {
            slot_a: summarize(&self.slot_a),
            slot_b: self.slot_b.as_ref().map(summarize),
        }
    }

    /// Roster for `room_update`.
    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut roster = vec![RosterEntry {
            role: SlotRole::SlotA,
            username: self.slot_a.username.clone(),
            ready: self.slot_a.ready,
        }];
        if let Some(slot_b) = &self.slot_b {
            roster.push(RosterEntry {
                role: SlotRole::SlotB,
                username: slot_b.username.clone(),
                ready: slot_b.ready,
            });
        }
        roster
    }

    /// Full per-viewer snapshot: own hp/ammo/shield plus the opponent's
    /// public state. Used for `request_state` and reconnection resync.
    pub fn snapshot_for(&self, viewer: SlotRole) -> Option<StateSnapshot> {
        let you = self.slot(viewer)?;
        let opponent = self.slot(viewer.opponent());
        Some(StateSnapshot {
            room_code: self.room_code.clone(),
            phase: self.phase,
            you: SelfState {
                role: viewer,
                hp: you.hp,
                ammo_remaining: you.ammo_remaining(),
                shield: you.shield.info(),
            },
            opponent: opponent.map(|o| OpponentState {
                username: o.username.clone(),
                hp: o.hp,
                ammo_remaining: o.ammo_remaining(),
                shield: o.shield.info(),
            }),
        })
    }

    /// Per-viewer `game_start` payload: the full ammunition list (with
    /// used flags, so a rejoining client converges exactly) plus pool
    /// metadata.
    pub fn game_start_for(&self, viewer: SlotRole) -> Option<GameStartInfo> {
        if !matches!(self.phase, Phase::InProgress | Phase::Finished) {
            return None;
        }
        let you = self.slot(viewer)?;
        Some(GameStartInfo {
            role: viewer,
            ammo: you.ammo.clone(),
            metadata: self.pool_metadata.clone()?,
            opponent: self
                .slot(viewer.opponent())
                .map(|o| o.username.clone())
                .unwrap_or_default(),
        })
    }

    /// Send to one slot, if connected. Non-blocking: callers hold the
    /// session lock, so a client that stops draining its channel loses
    /// messages rather than wedging the room. A dropped client catches up
    /// through `request_state` / rejoin resync.
    pub fn send_to(&self, role: SlotRole, message: ServerMessage) {
        let Some(sender) = self.slot(role).and_then(|s| s.sender.as_ref()) else {
            return;
        };
        match sender.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(
                    room = %self.room_code,
                    ?role,
                    "client channel full, dropping message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Broadcast to both connected slots.
    pub fn broadcast(&self, message: ServerMessage) {
        self.send_to(SlotRole::SlotA, message.clone());
        self.send_to(SlotRole::SlotB, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::words::FallbackWordSource;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sender() -> mpsc::Sender<ServerMessage> {
        mpsc::channel(16).0
    }

    fn lobby_session() -> (DuelSession, Uuid, Uuid) {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut session = DuelSession::new(
            "ABC123".into(),
            "arcane".into(),
            a,
            true,
            "alice".into(),
            sender(),
        );
        session.join(b, true, "bob".into(), sender()).unwrap();
        (session, a, b)
    }

    fn started_session() -> DuelSession {
        let (mut session, _, _) = lobby_session();
        session.mark_ready(SlotRole::SlotA).unwrap();
        assert!(session.mark_ready(SlotRole::SlotB).unwrap());
        let pool = FallbackWordSource::pool("arcane");
        let mut rng = StdRng::seed_from_u64(42);
        session.begin(&pool, &mut rng).unwrap();
        session
    }

    /// Launch while guaranteeing ammo of the tier exists, bypassing the
    /// dealt list's randomness.
    fn force_launch(session: &mut DuelSession, role: SlotRole, tier: Tier) -> AttackLaunch {
        match session.launch_attack(role, tier) {
            Ok(launch) => launch,
            Err(DuelError::NoAmmoOfTier(_)) => panic!("test pool exhausted"),
            Err(e) => panic!("launch failed: {e}"),
        }
    }

    #[test]
    fn test_join_fills_slot_b_and_phase_advances() {
        let (session, _, b) = lobby_session();
        assert_eq!(session.phase, Phase::AwaitingReady);
        assert_eq!(session.slot_of(b), Some(SlotRole::SlotB));
    }

    #[test]
    fn test_join_full_room_rejected() {
        let (mut session, _, _) = lobby_session();
        let result = session.join(Uuid::new_v4(), true, "mallory".into(), sender());
        assert_eq!(result.unwrap_err(), DuelError::RoomFull);
    }

    #[test]
    fn test_same_identity_rejoins_as_reconnect() {
        let (mut session, a, _) = lobby_session();
        session.mark_disconnected(SlotRole::SlotA);
        assert!(!session.slot(SlotRole::SlotA).unwrap().connected);

        let outcome = session.join(a, true, "alice".into(), sender()).unwrap();
        assert_eq!(outcome.role, SlotRole::SlotA);
        assert!(outcome.reconnected);
        assert!(session.slot(SlotRole::SlotA).unwrap().connected);
    }

    #[test]
    fn test_begin_requires_both_ready() {
        let (mut session, _, _) = lobby_session();
        session.mark_ready(SlotRole::SlotA).unwrap();
        let pool = FallbackWordSource::pool("arcane");
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            session.begin(&pool, &mut rng).unwrap_err(),
            DuelError::PlayersNotReady
        );
    }

    #[test]
    fn test_begin_deals_fifty_each() {
        let session = started_session();
        assert_eq!(session.phase, Phase::InProgress);
        for role in [SlotRole::SlotA, SlotRole::SlotB] {
            let slot = session.slot(role).unwrap();
            assert_eq!(slot.ammo.len(), crate::AMMO_PER_PLAYER);
            assert_eq!(slot.ammo_remaining(), crate::AMMO_PER_PLAYER);
            assert_eq!(slot.hp, crate::INITIAL_HP);
        }
        assert!(session.pool_metadata.is_some());
    }

    #[test]
    fn test_launch_before_start_rejected() {
        let (mut session, _, _) = lobby_session();
        assert_eq!(
            session.launch_attack(SlotRole::SlotA, Tier::Low).unwrap_err(),
            DuelError::GameNotStarted
        );
    }

    #[test]
    fn test_launch_defensive_tier_rejected() {
        let mut session = started_session();
        assert_eq!(
            session
                .launch_attack(SlotRole::SlotA, Tier::Defensive)
                .unwrap_err(),
            DuelError::InvalidTier
        );
    }

    #[test]
    fn test_launch_consumes_exactly_one_entry() {
        let mut session = started_session();
        let launch = force_launch(&mut session, SlotRole::SlotA, Tier::Low);
        assert_eq!(launch.ammo_remaining, crate::AMMO_PER_PLAYER - 1);
        assert_eq!(launch.attack.damage, 10);
        assert_eq!(launch.attack.target, SlotRole::SlotB);

        let slot = session.slot(SlotRole::SlotA).unwrap();
        let used: Vec<_> = slot.ammo.iter().filter(|e| e.used).collect();
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].tier, Tier::Low);
    }

    #[test]
    fn test_tier_exhaustion() {
        let mut session = started_session();
        for _ in 0..Tier::Low.ammo_share() {
            force_launch(&mut session, SlotRole::SlotA, Tier::Low);
        }
        assert_eq!(
            session.launch_attack(SlotRole::SlotA, Tier::Low).unwrap_err(),
            DuelError::NoAmmoOfTier(Tier::Low)
        );
    }

    #[test]
    fn test_resolve_applies_damage() {
        let mut session = started_session();
        let launch = force_launch(&mut session, SlotRole::SlotA, Tier::Low);
        let impact = session.resolve_attack(launch.attack.id).unwrap();
        assert!(!impact.blocked);
        assert_eq!(impact.damage, 10);
        assert_eq!(impact.target_hp, 90);
        assert_eq!(session.slot(SlotRole::SlotB).unwrap().hp, 90);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut session = started_session();
        let launch = force_launch(&mut session, SlotRole::SlotA, Tier::Low);
        assert!(session.resolve_attack(launch.attack.id).is_some());
        assert!(session.resolve_attack(launch.attack.id).is_none());
        assert_eq!(session.slot(SlotRole::SlotB).unwrap().hp, 90);
    }

    #[test]
    fn test_shield_blocks_exactly_one_attack() {
        let mut session = started_session();
        let activation = session.activate_shield(SlotRole::SlotB).unwrap();
        assert!(activation.shield.active);
        assert_eq!(activation.shield.remaining_blocks, 1);
        assert_eq!(activation.ammo_remaining, crate::AMMO_PER_PLAYER - 1);

        let first = force_launch(&mut session, SlotRole::SlotA, Tier::Low);
        let impact = session.resolve_attack(first.attack.id).unwrap();
        assert!(impact.blocked);
        assert_eq!(impact.damage, 0);
        assert_eq!(impact.target_hp, 100);

        // Shield dropped after its one block.
        let shield = &session.slot(SlotRole::SlotB).unwrap().shield;
        assert!(!shield.active);
        assert_eq!(shield.remaining_blocks, 0);

        let second = force_launch(&mut session, SlotRole::SlotA, Tier::Low);
        let impact = session.resolve_attack(second.attack.id).unwrap();
        assert!(!impact.blocked);
        assert_eq!(impact.target_hp, 90);
    }

    #[test]
    fn test_shield_expiry_respects_sequence() {
        let mut session = started_session();
        let first = session.activate_shield(SlotRole::SlotB).unwrap();

        // Stale expiry for an earlier activation must not touch a newer
        // shield.
        let second = session.activate_shield(SlotRole::SlotB).unwrap();
        assert!(second.seq > first.seq);
        assert!(!session.expire_shield(SlotRole::SlotB, first.seq));
        assert!(session.slot(SlotRole::SlotB).unwrap().shield.active);

        // Matching expiry drops it.
        assert!(session.expire_shield(SlotRole::SlotB, second.seq));
        let shield = &session.slot(SlotRole::SlotB).unwrap().shield;
        assert!(!shield.active);
        assert_eq!(shield.remaining_blocks, 0);
    }

    #[test]
    fn test_expiry_after_block_is_noop() {
        let mut session = started_session();
        let activation = session.activate_shield(SlotRole::SlotB).unwrap();
        let launch = force_launch(&mut session, SlotRole::SlotA, Tier::Medium);
        session.resolve_attack(launch.attack.id).unwrap();
        assert!(!session.expire_shield(SlotRole::SlotB, activation.seq));
    }

    #[test]
    fn test_attack_landing_after_expiry_is_not_blocked() {
        let mut session = started_session();
        let activation = session.activate_shield(SlotRole::SlotB).unwrap();
        let launch = force_launch(&mut session, SlotRole::SlotA, Tier::High);

        // Shield duration elapses before the slow attack lands.
        assert!(session.expire_shield(SlotRole::SlotB, activation.seq));
        let impact = session.resolve_attack(launch.attack.id).unwrap();
        assert!(!impact.blocked);
        assert_eq!(impact.target_hp, 80);
    }

    #[test]
    fn test_hp_floors_at_zero() {
        let mut session = started_session();
        // 15 high attacks deal 300 raw damage into 100 hp.
        let ids: Vec<u64> = (0..Tier::High.ammo_share())
            .map(|_| force_launch(&mut session, SlotRole::SlotA, Tier::High).attack.id)
            .collect();
        for id in ids {
            session.resolve_attack(id);
        }
        assert_eq!(session.slot(SlotRole::SlotB).unwrap().hp, 0);
    }

    #[test]
    fn test_knockout_outcome() {
        let mut session = started_session();
        let ids: Vec<u64> = (0..5)
            .map(|_| force_launch(&mut session, SlotRole::SlotA, Tier::High).attack.id)
            .collect();
        for id in ids {
            session.resolve_attack(id);
        }
        assert_eq!(session.slot(SlotRole::SlotB).unwrap().hp, 0);

        let outcome = session.evaluate_win().unwrap();
        assert_eq!(outcome.winner, Some(SlotRole::SlotA));
        assert_eq!(outcome.reason, EndReason::Knockout);
    }

    #[test]
    fn test_out_of_ammo_higher_hp_wins() {
        let mut session = started_session();

        // B lands one low attack on A (A: 90), then both sides burn
        // everything else without resolving further impacts.
        let hit = force_launch(&mut session, SlotRole::SlotB, Tier::Low);
        session.resolve_attack(hit.attack.id).unwrap();

        for role in [SlotRole::SlotA, SlotRole::SlotB] {
            for tier in [Tier::Low, Tier::Medium, Tier::High] {
                while session.launch_attack(role, tier).is_ok() {}
            }
            while session.activate_shield(role).is_ok() {}
        }

        for role in [SlotRole::SlotA, SlotRole::SlotB] {
            assert_eq!(session.slot(role).unwrap().ammo_remaining(), 0);
        }

        // Unresolved attacks do not affect exhaustion; only hp decides.
        let outcome = session.evaluate_win().unwrap();
        assert_eq!(outcome.winner, Some(SlotRole::SlotB));
        assert_eq!(outcome.reason, EndReason::OutOfAmmo);
    }

    #[test]
    fn test_exhaustion_with_equal_hp_is_tie() {
        let mut session = started_session();
        for role in [SlotRole::SlotA, SlotRole::SlotB] {
            for tier in [Tier::Low, Tier::Medium, Tier::High] {
                while session.launch_attack(role, tier).is_ok() {}
            }
            while session.activate_shield(role).is_ok() {}
        }
        let outcome = session.evaluate_win().unwrap();
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.reason, EndReason::Tie);
    }

    #[test]
    fn test_finish_abandons_pending_attacks() {
        let mut session = started_session();
        force_launch(&mut session, SlotRole::SlotA, Tier::Low);
        force_launch(&mut session, SlotRole::SlotB, Tier::High);
        assert_eq!(session.pending_attack_count(), 2);

        let final_state = session.finish(MatchOutcome {
            winner: Some(SlotRole::SlotA),
            reason: EndReason::OpponentLeft,
        });
        assert_eq!(session.phase, Phase::Finished);
        assert_eq!(session.pending_attack_count(), 0);
        assert_eq!(final_state.slot_a.username, "alice");

        // Abandoned ids resolve as no-ops.
        assert!(session.resolve_attack(0).is_none());
    }

    #[test]
    fn test_ammo_count_matches_unused_entries() {
        let mut session = started_session();
        for _ in 0..4 {
            force_launch(&mut session, SlotRole::SlotA, Tier::Medium);
        }
        session.activate_shield(SlotRole::SlotA).unwrap();

        let slot = session.slot(SlotRole::SlotA).unwrap();
        let unused = slot.ammo.iter().filter(|e| !e.used).count();
        assert_eq!(slot.ammo_remaining(), unused);
        assert_eq!(unused, crate::AMMO_PER_PLAYER - 5);
    }

    #[test]
    fn test_snapshot_restores_full_state() {
        let mut session = started_session();
        let launch = force_launch(&mut session, SlotRole::SlotA, Tier::Low);
        session.resolve_attack(launch.attack.id).unwrap();
        session.activate_shield(SlotRole::SlotB).unwrap();

        let snapshot = session.snapshot_for(SlotRole::SlotB).unwrap();
        assert_eq!(snapshot.phase, Phase::InProgress);
        assert_eq!(snapshot.you.hp, 90);
        assert!(snapshot.you.shield.active);
        assert_eq!(snapshot.you.ammo_remaining, crate::AMMO_PER_PLAYER - 1);
        let opponent = snapshot.opponent.unwrap();
        assert_eq!(opponent.username, "alice");
        assert_eq!(opponent.ammo_remaining, crate::AMMO_PER_PLAYER - 1);

        let start = session.game_start_for(SlotRole::SlotB).unwrap();
        assert_eq!(start.role, SlotRole::SlotB);
        assert_eq!(start.ammo.len(), crate::AMMO_PER_PLAYER);
        assert_eq!(start.ammo.iter().filter(|e| e.used).count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_both_slots() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let mut session =
            DuelSession::new("ABC123".into(), "arcane".into(), a, true, "alice".into(), tx_a);
        session.join(b, true, "bob".into(), tx_b).unwrap();

        session.broadcast(ServerMessage::Error {
            message: "ping".into(),
        });

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_skips_stalled_slot() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(1);
        let mut session =
            DuelSession::new("ABC123".into(), "arcane".into(), a, true, "alice".into(), tx_a);
        session.join(b, true, "bob".into(), tx_b.clone()).unwrap();

        // B's channel is full; the broadcast must still return immediately
        // and reach A.
        tx_b.try_send(ServerMessage::Error {
            message: "fill".into(),
        })
        .unwrap();

        session.broadcast(ServerMessage::Error {
            message: "ping".into(),
        });

        assert!(rx_a.recv().await.is_some());
    }
}
