//! Bridge: client socket protocol, session-listener routing, turn-buffer
//! accumulation, outbound event translation (spec.md §4.7).

mod bridge;
mod connection;
mod errors;
mod protocol;
mod turn_buffer;

pub use bridge::{Bridge, BridgeConfig};
pub use connection::{ClientConnection, ConnectionRegistry};
pub use errors::{BridgeError, Result};
pub use protocol::{ClientPermissionDecision, Intent, OutboundMessage};
pub use turn_buffer::{FlushedTurn, TurnBuffer};
