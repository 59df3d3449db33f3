//! Duel Engine Module
//!
//! The synchronous heart of the server. Nothing in here touches the
//! network; every operation is a plain method on [`duel::DuelSession`]
//! executed under the session lock.
//!
//! - `tier`: fixed damage / travel-time / shield configuration per tier
//! - `words`: word supply adapter, fallback pool, ammunition dealing
//! - `duel`: room state, attack pipeline, shield mechanic, win conditions

pub mod duel;
pub mod tier;
pub mod words;

// Re-export key types
pub use duel::{DuelError, DuelSession, Phase, SlotRole};
pub use tier::{AmmoEntry, Tier};
pub use words::{WordPool, WordSource};
