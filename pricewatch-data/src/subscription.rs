use crate::exchange::ExchangeId;
use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// What a connection unit is subscribed for.
///
/// Price ticker and trade streams are separate subscriptions even on the same exchange, so
/// each [`Purpose`] gets its own connection unit.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Last traded price updates, normalised to [`PriceTick`](crate::event::PriceTick).
    #[display("ticker")]
    Ticker,
    /// Individual public trades, normalised to [`PublicTrade`](crate::event::PublicTrade).
    #[display("trades")]
    Trades,
}

/// Identifies a single connection unit: one per (exchange, purpose) pair.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Display,
    Deserialize,
    Serialize,
    Constructor,
)]
#[display("{exchange}|{purpose}")]
pub struct UnitId {
    pub exchange: ExchangeId,
    pub purpose: Purpose,
}

/// Source of the symbol set a connection unit subscribes to.
///
/// Called once per (re)connect attempt; the result is not refreshed mid-connection.
pub trait SymbolSource: Send + Sync {
    fn symbols(&self) -> Vec<SmolStr>;
}

/// Fixed symbol set, eg/ the whale detector's monitored assets.
#[derive(Clone, Debug, Default, Constructor)]
pub struct StaticSymbols(pub Vec<SmolStr>);

impl SymbolSource for StaticSymbols {
    fn symbols(&self) -> Vec<SmolStr> {
        self.0.clone()
    }
}

impl<F> SymbolSource for F
where
    F: Fn() -> Vec<SmolStr> + Send + Sync,
{
    fn symbols(&self) -> Vec<SmolStr> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_display() {
        let id = UnitId::new(ExchangeId::Okx, Purpose::Trades);
        assert_eq!(id.to_string(), "okx|trades");
    }

    #[test]
    fn test_closure_symbol_source() {
        let source = || vec![SmolStr::new("BTC"), SmolStr::new("ETH")];
        assert_eq!(source.symbols(), vec!["BTC", "ETH"]);
    }
}
