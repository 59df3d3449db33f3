//! Tier Configuration
//!
//! The four word tiers and their fixed combat numbers. Damage and travel
//! time are a static lookup per tier, never randomized: a low word always
//! hits for 10 after 1000 ms, a high word for 20 after 3500 ms. The
//! defensive tier powers the shield instead of an attack.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many attacks one shield activation absorbs.
pub const SHIELD_BLOCKS: u32 = 1;

/// How long an unused shield stays up before auto-expiring.
pub const SHIELD_DURATION: Duration = Duration::from_millis(3000);

/// Word tier.
///
/// Three attack tiers plus the defensive tier. Higher damage travels
/// slower, so a high attack launched before a low one may land after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Tier {
    /// Short word, 10 damage, fast travel.
    Low = 0,
    /// Medium word, 15 damage, normal travel.
    Medium = 1,
    /// Long word, 20 damage, slow travel.
    High = 2,
    /// Defense word, consumed by shield activation.
    Defensive = 3,
}

impl Tier {
    /// All tiers in dealing order.
    pub const ALL: [Tier; 4] = [Tier::Low, Tier::Medium, Tier::High, Tier::Defensive];

    /// Damage dealt on impact. Zero for the defensive tier.
    #[inline]
    pub fn damage(self) -> u32 {
        match self {
            Tier::Low => 10,
            Tier::Medium => 15,
            Tier::High => 20,
            Tier::Defensive => 0,
        }
    }

    /// Time between launch and impact.
    #[inline]
    pub fn travel_time(self) -> Duration {
        match self {
            Tier::Low => Duration::from_millis(1000),
            Tier::Medium => Duration::from_millis(2000),
            Tier::High => Duration::from_millis(3500),
            Tier::Defensive => Duration::ZERO,
        }
    }

    /// Whether this tier can be launched as an attack.
    #[inline]
    pub fn is_attack(self) -> bool {
        !matches!(self, Tier::Defensive)
    }

    /// How many entries of this tier each duelist is dealt.
    ///
    /// 15/15/15/5 across low/medium/high/defensive, totalling
    /// [`crate::AMMO_PER_PLAYER`].
    #[inline]
    pub fn ammo_share(self) -> usize {
        match self {
            Tier::Low | Tier::Medium | Tier::High => 15,
            Tier::Defensive => 5,
        }
    }
}

/// One word assigned to a duelist.
///
/// Entries transition `unused -> used` exactly once, when the word is
/// spent on an attack launch or a shield activation. They are never
/// un-used.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmmoEntry {
    /// The word the player must type.
    pub word: String,
    /// The tier this word belongs to.
    pub tier: Tier,
    /// Whether the entry has been spent.
    pub used: bool,
}

impl AmmoEntry {
    /// Create a fresh (unused) entry.
    pub fn new(word: impl Into<String>, tier: Tier) -> Self {
        Self {
            word: word.into(),
            tier,
            used: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_table() {
        assert_eq!(Tier::Low.damage(), 10);
        assert_eq!(Tier::Medium.damage(), 15);
        assert_eq!(Tier::High.damage(), 20);
        assert_eq!(Tier::Defensive.damage(), 0);
    }

    #[test]
    fn test_travel_times_ordered_by_damage() {
        assert!(Tier::Low.travel_time() < Tier::Medium.travel_time());
        assert!(Tier::Medium.travel_time() < Tier::High.travel_time());
    }

    #[test]
    fn test_ammo_shares_sum_to_full_list() {
        let total: usize = Tier::ALL.iter().map(|t| t.ammo_share()).sum();
        assert_eq!(total, crate::AMMO_PER_PLAYER);
    }

    #[test]
    fn test_only_defensive_is_not_an_attack() {
        assert!(Tier::Low.is_attack());
        assert!(Tier::Medium.is_attack());
        assert!(Tier::High.is_attack());
        assert!(!Tier::Defensive.is_attack());
    }

    #[test]
    fn test_tier_serde_snake_case() {
        assert_eq!(serde_json::to_string(&Tier::Low).unwrap(), "\"low\"");
        assert_eq!(
            serde_json::to_string(&Tier::Defensive).unwrap(),
            "\"defensive\""
        );
        let parsed: Tier = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(parsed, Tier::High);
    }
}
