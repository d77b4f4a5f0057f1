use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a connection unit.
///
/// ```text
/// Idle -> Connecting -> Subscribed -> (error/close) -> Backoff -> Connecting
/// ```
///
/// `Idle` is the initial state, the state of a unit waiting for a non-empty symbol set, and
/// the terminal state after an explicit stop.
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    #[default]
    Idle,
    Connecting,
    Subscribed,
    Backoff,
}

/// Inputs driving [`UnitState`] transitions.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum UnitEvent {
    /// The symbol set computed for the next attempt is non-empty.
    SymbolsReady,
    /// The symbol set computed for the next attempt is empty.
    SymbolsEmpty,
    /// Connection established and subscription requests sent.
    Subscribed,
    /// Connection attempt failed, or an established connection errored or closed.
    Disconnected,
    /// Fixed backoff delay elapsed.
    BackoffElapsed,
    /// Resubscribe signal observed while subscribed.
    Resubscribe,
    /// Cooperative stop flag observed.
    Stop,
}

impl UnitState {
    /// Pure transition function. Events that are not valid in the current state leave it
    /// unchanged.
    pub fn next(self, event: UnitEvent) -> UnitState {
        use UnitEvent as E;
        use UnitState as S;

        match (self, event) {
            (_, E::Stop) => S::Idle,
            (S::Idle, E::SymbolsReady) => S::Connecting,
            (S::Idle, E::SymbolsEmpty) => S::Idle,
            (S::Connecting, E::SymbolsEmpty) => S::Idle,
            (S::Connecting, E::Subscribed) => S::Subscribed,
            (S::Connecting, E::Disconnected) => S::Backoff,
            (S::Subscribed, E::Disconnected) => S::Backoff,
            (S::Subscribed, E::Resubscribe) => S::Connecting,
            (S::Backoff, E::BackoffElapsed) => S::Connecting,
            (state, _) => state,
        }
    }
}
