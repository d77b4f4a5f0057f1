use super::{Connector, ExchangeId, WsMessage, de_str, de_u64_epoch_ms_as_datetime_utc, from_json};
use crate::{
    error::DataError,
    event::{MarketEvent, PriceTick, PublicTrade, Side, base_asset, canonical_symbol},
    subscription::Purpose,
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Deserialize;
use smol_str::{SmolStr, ToSmolStr};
use url::Url;

/// [`Binance`] spot server base url.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams>
pub const BASE_URL_BINANCE: &str = "wss://stream.binance.com:9443";

/// [`Binance`] spot exchange.
///
/// Subscriptions are encoded in the combined stream url, so no subscription payloads are sent.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Binance {
    base_url: String,
}

impl Default for Binance {
    fn default() -> Self {
        Self {
            base_url: BASE_URL_BINANCE.to_string(),
        }
    }
}

impl Binance {
    /// Override the server base url (eg/ a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Binance stream market name for a canonical symbol (`BTC` or `BTCUSDT` -> `btcusdt`).
    pub fn market(symbol: &str) -> String {
        format!("{}usdt", base_asset(symbol).to_lowercase())
    }

    fn stream_name(purpose: Purpose) -> &'static str {
        match purpose {
            Purpose::Ticker => "ticker",
            Purpose::Trades => "aggTrade",
        }
    }
}

impl Connector for Binance {
    const ID: ExchangeId = ExchangeId::Binance;

    fn url(&self, purpose: Purpose, symbols: &[SmolStr]) -> Result<Url, DataError> {
        if symbols.is_empty() {
            return Err(DataError::SubscriptionsEmpty);
        }

        let streams = symbols
            .iter()
            .map(|symbol| format!("{}@{}", Self::market(symbol), Self::stream_name(purpose)))
            .unique()
            .join("/");

        Url::parse(&format!(
            "{}/stream?streams={}",
            self.base_url.trim_end_matches('/'),
            streams
        ))
        .map_err(DataError::from)
    }

    fn requests(&self, _: Purpose, _: &[SmolStr]) -> Vec<WsMessage> {
        vec![]
    }

    fn parse(&self, purpose: Purpose, payload: &str) -> Result<Vec<MarketEvent>, DataError> {
        let event = match purpose {
            Purpose::Ticker => {
                let message = from_json::<BinanceCombined<BinanceTicker>>(payload)?;
                MarketEvent::from(message.data)
            }
            Purpose::Trades => {
                let message = from_json::<BinanceCombined<BinanceAggTrade>>(payload)?;
                MarketEvent::from(message.data)
            }
        };

        Ok(vec![event])
    }
}

/// Combined stream envelope.
///
/// ```json
/// {"stream": "btcusdt@aggTrade", "data": {...}}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BinanceCombined<T> {
    pub stream: String,
    pub data: T,
}

/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#individual-symbol-ticker-streams>
/// ```json
/// {
///     "e": "24hrTicker",
///     "E": 1672515782136,
///     "s": "BTCUSDT",
///     "c": "50000.01",
///     "o": "49000.00"
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BinanceTicker {
    #[serde(alias = "E", deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
    pub time: DateTime<Utc>,

    #[serde(rename = "s")]
    pub market: String,

    #[serde(alias = "c", deserialize_with = "de_str")]
    pub last_price: f64,
}

impl From<BinanceTicker> for MarketEvent {
    fn from(ticker: BinanceTicker) -> Self {
        MarketEvent {
            time_exchange: ticker.time,
            time_received: Utc::now(),
            exchange: ExchangeId::Binance,
            symbol: canonical_symbol(&ticker.market),
            kind: PriceTick {
                price: ticker.last_price,
            }
            .into(),
        }
    }
}

/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#aggregate-trade-streams>
/// ```json
/// {
///     "e": "aggTrade",
///     "E": 1672515782136,
///     "s": "BTCUSDT",
///     "a": 12345,
///     "p": "0.001",
///     "q": "100",
///     "f": 100,
///     "l": 105,
///     "T": 1672515782136,
///     "m": true,
///     "M": true
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BinanceAggTrade {
    #[serde(alias = "T", deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
    pub time: DateTime<Utc>,

    #[serde(rename = "s")]
    pub market: String,

    #[serde(rename = "a")]
    pub id: u64,

    #[serde(alias = "p", deserialize_with = "de_str")]
    pub price: f64,

    #[serde(alias = "q", deserialize_with = "de_str")]
    pub quantity: f64,

    /// Buyer is the maker, so the aggressor sold.
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl From<BinanceAggTrade> for MarketEvent {
    fn from(trade: BinanceAggTrade) -> Self {
        let side = if trade.buyer_is_maker {
            Side::Sell
        } else {
            Side::Buy
        };

        MarketEvent {
            time_exchange: trade.time,
            time_received: Utc::now(),
            exchange: ExchangeId::Binance,
            symbol: base_asset(&trade.market),
            kind: PublicTrade {
                id: trade.id.to_smolstr(),
                price: trade.price,
                quantity: trade.quantity,
                side,
                value_usd: trade.price * trade.quantity,
            }
            .into(),
        }
    }
}
