/// [`UnitState`](state::UnitState) machine shared by every connection unit.
pub mod state;

/// Supervised WebSocket connection unit with fixed backoff reconnection, cooperative stop and
/// an optional resubscribe signal.
pub mod unit;

pub use state::{UnitEvent, UnitState};
pub use unit::{ConnectionUnit, EventCallback, UnitConfig, UnitHandle};
