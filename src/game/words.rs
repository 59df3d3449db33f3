//! Word Supply
//!
//! The word/ammo-pool content generator is an external collaborator: given
//! a topic it returns a partitioned pool of words tagged by tier. This
//! module owns the adapter seam ([`WordSource`]), the built-in fallback
//! pool, and the dealing of each duelist's 50-entry ammunition list.
//!
//! The engine never fails to start a ready match because word generation
//! failed; a source error or a non-viable pool falls back to
//! [`FallbackWordSource`].

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::tier::{AmmoEntry, Tier};

/// Word supply failures, recovered locally via the fallback pool.
#[derive(Debug, Clone, Error)]
pub enum WordSourceError {
    /// The generator was unreachable or returned garbage.
    #[error("word generation failed: {0}")]
    GenerationFailed(String),
    /// The generator returned a pool with an empty tier.
    #[error("generated pool is missing words for tier {0:?}")]
    EmptyTier(Tier),
}

/// Where a word pool came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSource {
    /// Produced by the external generator.
    Generated,
    /// Built-in fallback pool.
    Fallback,
}

/// Metadata describing one match's word pool, echoed in `game_start`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolMetadata {
    /// Topic the pool was generated for.
    pub topic: String,
    /// Generator or fallback.
    pub source: PoolSource,
    /// RFC 3339 generation timestamp.
    pub generated_at: String,
    /// Ammunition split per tier: low/medium/high/defensive.
    pub distribution: [usize; 4],
}

/// A partitioned pool of words, one list per tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WordPool {
    /// Short attack words.
    pub low: Vec<String>,
    /// Medium attack words.
    pub medium: Vec<String>,
    /// Long attack words.
    pub high: Vec<String>,
    /// Defense words.
    pub defensive: Vec<String>,
    /// Pool provenance.
    pub metadata: PoolMetadata,
}

impl WordPool {
    /// Words for one tier.
    pub fn tier_words(&self, tier: Tier) -> &[String] {
        match tier {
            Tier::Low => &self.low,
            Tier::Medium => &self.medium,
            Tier::High => &self.high,
            Tier::Defensive => &self.defensive,
        }
    }

    /// A pool is viable when every tier has at least one word.
    pub fn validate(&self) -> Result<(), WordSourceError> {
        for tier in Tier::ALL {
            if self.tier_words(tier).is_empty() {
                return Err(WordSourceError::EmptyTier(tier));
            }
        }
        Ok(())
    }

    /// Deal one duelist's ammunition list: 15/15/15/5 entries across the
    /// tiers, independently shuffled so the two players see different
    /// orders. Words repeat when a tier list is shorter than its share.
    pub fn deal_ammo<R: Rng>(&self, rng: &mut R) -> Vec<AmmoEntry> {
        let mut ammo = Vec::with_capacity(crate::AMMO_PER_PLAYER);
        for tier in Tier::ALL {
            let words = self.tier_words(tier);
            for _ in 0..tier.ammo_share() {
                // validate() guarantees non-empty tiers
                if let Some(word) = words.choose(rng) {
                    ammo.push(AmmoEntry::new(word.clone(), tier));
                }
            }
        }
        ammo.shuffle(rng);
        ammo
    }
}

/// External word generator seam.
///
/// Consumed once per match start; implementations may block briefly but
/// must not panic. On `Err` the engine substitutes the fallback pool.
pub trait WordSource: Send + Sync {
    /// Produce a pool for the given topic.
    fn word_pool(&self, topic: &str) -> Result<WordPool, WordSourceError>;
}

/// Built-in word pool used when generation fails or no generator is wired.
///
/// Words carry mixed case on purpose: typing them exactly is the challenge.
#[derive(Debug, Default)]
pub struct FallbackWordSource;

const FALLBACK_LOW: &[&str] = &[
    "Cat", "DOG", "Run", "JUMP", "Fire", "ICE", "Wind", "ROCK", "Bolt", "GLOW", "Mist", "LEAF",
    "Star", "MOON", "Sun", "WAVE", "Brew", "CAST", "Dust", "ECHO", "Fade", "GUST", "Haze", "JINX",
];

const FALLBACK_MEDIUM: &[&str] = &[
    "Magic", "SPELL", "WizarD", "ArcanE", "MyStic", "ENERGY", "Phoenix", "DRAGON", "CrystAL",
    "ThundeR", "BlizzarD", "InfernO", "TempesT", "EclipsE", "SparklE", "ShimmeR", "TornadO",
    "VolcanO", "NebulA", "CosmoS", "GravitY", "PrisM", "MiraclE", "EnchanT",
];

const FALLBACK_HIGH: &[&str] = &[
    "ExtravaganZA", "ExtraordinARY", "MagnificenT", "CatastrophE", "AnnihilatioN", "CombustioN",
    "MetamorphosiS", "SupernovA", "ApocalypsE", "DevastatioN", "IncantatioN", "ConjuratioN",
    "AbracadabrA", "MysteriouS", "SpectaculaR", "PhenomenoN", "IlluminatioN", "TranscendenT",
    "OverwhelminG",
];

const FALLBACK_DEFENSIVE: &[&str] = &[
    "Block", "GUARD", "ProtecT", "DEFEND", "BarrieR", "SHIELD", "Wall", "ARMOR", "FortresS",
    "AEGIS", "BulwarK", "RAMPART", "SanctuarY", "SAFEGUARD", "DeflecT", "PARRY", "CounteR",
    "RESIST",
];

impl FallbackWordSource {
    /// Build the fallback pool directly, bypassing the trait.
    pub fn pool(topic: &str) -> WordPool {
        let to_vec = |words: &[&str]| words.iter().map(|w| (*w).to_string()).collect();
        WordPool {
            low: to_vec(FALLBACK_LOW),
            medium: to_vec(FALLBACK_MEDIUM),
            high: to_vec(FALLBACK_HIGH),
            defensive: to_vec(FALLBACK_DEFENSIVE),
            metadata: PoolMetadata {
                topic: topic.to_string(),
                source: PoolSource::Fallback,
                generated_at: Utc::now().to_rfc3339(),
                distribution: [
                    Tier::Low.ammo_share(),
                    Tier::Medium.ammo_share(),
                    Tier::High.ammo_share(),
                    Tier::Defensive.ammo_share(),
                ],
            },
        }
    }
}

impl WordSource for FallbackWordSource {
    fn word_pool(&self, topic: &str) -> Result<WordPool, WordSourceError> {
        Ok(Self::pool(topic))
    }
}

/// Fetch a pool from `source`, falling back to the built-in pool on any
/// failure. Never errors: a ready match always gets words.
pub fn pool_or_fallback(source: &dyn WordSource, topic: &str) -> WordPool {
    match source.word_pool(topic) {
        Ok(pool) => match pool.validate() {
            Ok(()) => pool,
            Err(e) => {
                tracing::warn!("word source returned non-viable pool: {}, using fallback", e);
                FallbackWordSource::pool(topic)
            }
        },
        Err(e) => {
            tracing::warn!("word source failed: {}, using fallback", e);
            FallbackWordSource::pool(topic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct BrokenSource;

    impl WordSource for BrokenSource {
        fn word_pool(&self, _topic: &str) -> Result<WordPool, WordSourceError> {
            Err(WordSourceError::GenerationFailed("quota exceeded".into()))
        }
    }

    #[test]
    fn test_fallback_pool_is_viable() {
        let pool = FallbackWordSource::pool("arcane");
        assert!(pool.validate().is_ok());
        assert_eq!(pool.metadata.source, PoolSource::Fallback);
        assert_eq!(pool.metadata.distribution, [15, 15, 15, 5]);
    }

    #[test]
    fn test_deal_ammo_counts() {
        let pool = FallbackWordSource::pool("arcane");
        let mut rng = StdRng::seed_from_u64(7);
        let ammo = pool.deal_ammo(&mut rng);

        assert_eq!(ammo.len(), crate::AMMO_PER_PLAYER);
        for tier in Tier::ALL {
            let count = ammo.iter().filter(|e| e.tier == tier).count();
            assert_eq!(count, tier.ammo_share());
        }
        assert!(ammo.iter().all(|e| !e.used));
    }

    #[test]
    fn test_deal_ammo_independent_shuffles() {
        let pool = FallbackWordSource::pool("arcane");
        let mut rng = StdRng::seed_from_u64(7);
        let a = pool.deal_ammo(&mut rng);
        let b = pool.deal_ammo(&mut rng);
        // Same split, different order with overwhelming probability.
        assert_ne!(
            a.iter().map(|e| &e.word).collect::<Vec<_>>(),
            b.iter().map(|e| &e.word).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_broken_source_falls_back() {
        let pool = pool_or_fallback(&BrokenSource, "storms");
        assert!(pool.validate().is_ok());
        assert_eq!(pool.metadata.source, PoolSource::Fallback);
        assert_eq!(pool.metadata.topic, "storms");
    }

    #[test]
    fn test_empty_tier_is_rejected() {
        let mut pool = FallbackWordSource::pool("arcane");
        pool.defensive.clear();
        assert!(matches!(
            pool.validate(),
            Err(WordSourceError::EmptyTier(Tier::Defensive))
        ));
    }
}
