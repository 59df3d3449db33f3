//! # Typeduel Server
//!
//! Session engine for a real-time, two-player competitive typing duel.
//! Two spellcasters exchange timed attack and shield actions triggered by
//! correctly typing assigned words, racing to empty the opponent's health
//! or outlast their ammunition.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TYPEDUEL SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Duel engine (synchronous state machine)   │
//! │  ├── tier.rs     - Tier table: damage / travel time / shield │
//! │  ├── words.rs    - Word supply adapter + ammunition dealing  │
//! │  └── duel.rs     - DuelSession: slots, attacks, win checks   │
//! │                                                              │
//! │  network/        - Networking (async)                        │
//! │  ├── server.rs   - WebSocket server, timers, win sweep       │
//! │  ├── protocol.rs - Message schemas (tagged unions)           │
//! │  ├── registry.rs - Room-code -> session table                │
//! │  └── liveness.rs - Disconnect grace-period timer pairs       │
//! │                                                              │
//! │  recorder.rs     - Match recording adapter                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency discipline
//!
//! Each [`game::duel::DuelSession`] is mutated only under its own
//! `RwLock`: the task handling its room's client events, the delayed
//! attack/shield timers, and the periodic win-condition sweep all take the
//! write lock for the duration of a mutation. Timers never capture session
//! references; they carry the room code and re-validate that the session
//! and the specific pending item still exist at fire time.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;
pub mod recorder;

// Re-export commonly used types
pub use game::duel::{DuelSession, Phase, SlotRole};
pub use game::tier::Tier;
pub use network::registry::SessionRegistry;

use std::time::Duration;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Starting health for every duelist.
pub const INITIAL_HP: u32 = 100;

/// Ammunition entries dealt to each duelist at match start.
pub const AMMO_PER_PLAYER: usize = 50;

/// Win-condition sweep interval.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// How long a finished room stays in the registry so clients can render
/// the result.
pub const RESULT_DISPLAY_DELAY: Duration = Duration::from_secs(10);

/// Delay before the opponent is told "reconnecting..." after a disconnect.
pub const DISCONNECT_NOTIFY_DELAY: Duration = Duration::from_secs(2);

/// Grace period before a disconnected player forfeits the match.
pub const DISCONNECT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Removal delay after an intentional leave ends a room.
pub const LEAVE_CLEANUP_DELAY: Duration = Duration::from_secs(5);
