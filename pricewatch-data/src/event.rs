use crate::exchange::ExchangeId;
use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, StrExt};

/// Quote assets stripped when reducing a market to its base asset.
const QUOTE_ASSETS: [&str; 4] = ["USDT", "USDC", "USD", "KRW"];

/// Normalised market event produced by every exchange connector.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct MarketEvent<T = DataKind> {
    pub time_exchange: DateTime<Utc>,
    pub time_received: DateTime<Utc>,
    pub exchange: ExchangeId,
    /// Canonical symbol. Trades always carry the base asset (eg/ "BTC"), ticks carry the
    /// canonical market (eg/ "BTCUSDT", or "BTC" for KRW quoted venues).
    pub symbol: SmolStr,
    pub kind: T,
}

impl<T> MarketEvent<T> {
    pub fn map_kind<F, O>(self, op: F) -> MarketEvent<O>
    where
        F: FnOnce(T) -> O,
    {
        MarketEvent {
            time_exchange: self.time_exchange,
            time_received: self.time_received,
            exchange: self.exchange,
            symbol: self.symbol,
            kind: op(self.kind),
        }
    }
}

/// Available kinds of normalised market data.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize, From)]
pub enum DataKind {
    Tick(PriceTick),
    Trade(PublicTrade),
}

/// Latest traded price of a market.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct PriceTick {
    pub price: f64,
}

/// Normalised public trade.
#[derive(Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct PublicTrade {
    pub id: SmolStr,
    pub price: f64,
    pub quantity: f64,
    pub side: Side,
    /// Notional value in USD. Non USD quoted venues are converted with the venue rate.
    pub value_usd: f64,
}

/// Aggressor side of a trade.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[display("BUY")]
    #[serde(alias = "Buy", alias = "BUY")]
    Buy,
    #[display("SELL")]
    #[serde(alias = "Sell", alias = "SELL")]
    Sell,
}

impl Side {
    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

/// Canonical form of a user or exchange supplied symbol: uppercase with separators removed.
///
/// `"btc/usdt"` and `"BTC-USDT"` both become `"BTCUSDT"`.
pub fn canonical_symbol(raw: &str) -> SmolStr {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_' | ' '))
        .collect::<String>()
        .to_uppercase_smolstr()
}

/// Reduce a market identifier to its base asset.
///
/// Handles quote suffixes (`BTCUSDT`, `BTC/USDT`, `BTC-USDT`) and Upbit style quote prefixes
/// (`KRW-BTC`). A bare asset is returned unchanged.
pub fn base_asset(market: &str) -> SmolStr {
    let upper = market.trim().to_uppercase();

    if let Some((quote, base)) = upper.split_once('-') {
        if QUOTE_ASSETS.contains(&quote) {
            return SmolStr::new(base);
        }
    }

    let canonical = canonical_symbol(&upper);
    QUOTE_ASSETS
        .iter()
        .find_map(|quote| {
            canonical
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(SmolStr::new)
        })
        .unwrap_or(canonical)
}

/// Determine if a canonical symbol names a USDT quoted market (eg/ "BTCUSDT").
pub fn is_usdt_market(symbol: &str) -> bool {
    symbol.len() > 4 && symbol.ends_with("USDT")
}
