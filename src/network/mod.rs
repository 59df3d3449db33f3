//! Network Layer
//!
//! WebSocket server for duel rooms. This layer owns **all timing** -
//! attack travel, shield expiry, disconnect grace periods and the win
//! sweep - while every state mutation runs synchronously through `game/`
//! under the session lock.

pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod server;

pub use liveness::{LivenessTimers, TimerPair};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{RegistryError, SessionHandle, SessionRegistry};
pub use server::{GameServer, GameServerError, ServerConfig};
