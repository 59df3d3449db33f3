//! Match Recorder
//!
//! Persistence seam for finished matches. Recording is best-effort: the
//! result broadcast never waits on or fails because of the recorder, and
//! matches involving a guest slot are skipped entirely (guests hold a
//! server-assigned identity that outlives nothing).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::duel::{EndReason, SlotRole};

/// Recorder backend failures. Surfaced as a warning, never to clients.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The backend rejected or could not store the summary.
    #[error("recorder backend failed: {0}")]
    Backend(String),
}

/// One duelist's line in a match summary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerSummary {
    /// Stable identity.
    pub identity: Uuid,
    /// False for guests; a guest slot makes the whole match unrecordable.
    pub registered: bool,
    /// Display name.
    pub username: String,
    /// Final health.
    pub hp: u32,
    /// Unused ammunition left.
    pub ammo_remaining: usize,
}

/// Everything a backend needs to persist one finished match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchSummary {
    /// Room the match ran in.
    pub room_code: String,
    /// Word-pool topic.
    pub topic: String,
    /// Winning slot, `None` for a draw.
    pub winner: Option<SlotRole>,
    /// Why the match ended.
    pub reason: EndReason,
    /// Host slot.
    pub slot_a: PlayerSummary,
    /// Challenger slot, absent if the match ended before one joined.
    pub slot_b: Option<PlayerSummary>,
    /// Wall-clock match duration in milliseconds, 0 if never started.
    pub duration_ms: u64,
    /// End timestamp.
    pub ended_at: DateTime<Utc>,
}

impl MatchSummary {
    /// A match is recordable only when both slots were filled by
    /// registered players.
    pub fn recordable(&self) -> bool {
        self.slot_a.registered && self.slot_b.as_ref().is_some_and(|b| b.registered)
    }
}

/// Persistence backend seam.
///
/// `Ok(None)` means the match was deliberately skipped (guest play);
/// `Ok(Some(id))` is the stored match id echoed in `match_result`.
pub trait MatchRecorder: Send + Sync {
    /// Record one finished match.
    fn record(&self, summary: &MatchSummary) -> Result<Option<Uuid>, RecorderError>;
}

/// Default backend: assigns an id and writes the summary to the log.
#[derive(Debug, Default)]
pub struct LogRecorder;

impl MatchRecorder for LogRecorder {
    fn record(&self, summary: &MatchSummary) -> Result<Option<Uuid>, RecorderError> {
        if !summary.recordable() {
            debug!(room = %summary.room_code, "skipping guest match");
            return Ok(None);
        }

        let match_id = Uuid::new_v4();
        info!(
            %match_id,
            room = %summary.room_code,
            winner = ?summary.winner,
            reason = ?summary.reason,
            duration_ms = summary.duration_ms,
            "match recorded"
        );
        Ok(Some(match_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(registered: bool) -> PlayerSummary {
        PlayerSummary {
            identity: Uuid::new_v4(),
            registered,
            username: "alice".into(),
            hp: 40,
            ammo_remaining: 3,
        }
    }

    fn summary(a_registered: bool, b_registered: bool) -> MatchSummary {
        MatchSummary {
            room_code: "ABC123".into(),
            topic: "arcane".into(),
            winner: Some(SlotRole::SlotA),
            reason: EndReason::Knockout,
            slot_a: player(a_registered),
            slot_b: Some(player(b_registered)),
            duration_ms: 84_000,
            ended_at: Utc::now(),
        }
    }

    #[test]
    fn test_registered_match_gets_an_id() {
        let id = LogRecorder.record(&summary(true, true)).unwrap();
        assert!(id.is_some());
    }

    #[test]
    fn test_guest_match_is_skipped() {
        assert!(LogRecorder.record(&summary(true, false)).unwrap().is_none());
        assert!(LogRecorder.record(&summary(false, true)).unwrap().is_none());
    }

    #[test]
    fn test_solo_match_is_skipped() {
        let mut s = summary(true, true);
        s.slot_b = None;
        assert!(!s.recordable());
        assert!(LogRecorder.record(&s).unwrap().is_none());
    }
}
