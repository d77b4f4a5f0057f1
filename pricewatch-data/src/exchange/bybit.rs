use super::{
    Connector, ExchangeId, PingInterval, WsMessage, de_str, de_u64_epoch_ms_as_datetime_utc,
    from_json,
};
use crate::{
    error::DataError,
    event::{MarketEvent, PriceTick, PublicTrade, Side, base_asset, canonical_symbol},
    subscription::Purpose,
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use smol_str::{SmolStr, ToSmolStr};
use std::time::Duration;
use url::Url;

/// [`Bybit`] spot public server url.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/ws/connect>
pub const BASE_URL_BYBIT_SPOT: &str = "wss://stream.bybit.com/v5/public/spot";

/// [`Bybit`] server [`PingInterval`] duration.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/ws/connect#how-to-send-the-heartbeat-packet>
pub const PING_INTERVAL_BYBIT: Duration = Duration::from_secs(20);

/// Maximum number of topics per spot subscribe request.
const MAX_ARGS_PER_REQUEST: usize = 10;

/// Type that defines which [`Bybit`] topic a [`Purpose`] subscribes to.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/ws/connect>
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct BybitChannel(pub &'static str);

impl BybitChannel {
    /// [`Bybit`] real-time trades channel name.
    ///
    /// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/trade>
    pub const TRADES: Self = Self("publicTrade");

    /// [`Bybit`] tickers channel name.
    ///
    /// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/tickers>
    pub const TICKERS: Self = Self("tickers");
}

impl From<Purpose> for BybitChannel {
    fn from(purpose: Purpose) -> Self {
        match purpose {
            Purpose::Ticker => BybitChannel::TICKERS,
            Purpose::Trades => BybitChannel::TRADES,
        }
    }
}

impl AsRef<str> for BybitChannel {
    fn as_ref(&self) -> &str {
        self.0
    }
}

/// [`Bybit`] spot exchange.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Bybit {
    base_url: String,
}

impl Default for Bybit {
    fn default() -> Self {
        Self {
            base_url: BASE_URL_BYBIT_SPOT.to_string(),
        }
    }
}

impl Bybit {
    /// Override the server url (eg/ a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Bybit market for a canonical symbol (`BTC` or `BTCUSDT` -> `BTCUSDT`).
    pub fn market(symbol: &str) -> String {
        format!("{}USDT", base_asset(symbol))
    }
}

impl Connector for Bybit {
    const ID: ExchangeId = ExchangeId::Bybit;

    fn url(&self, _: Purpose, _: &[SmolStr]) -> Result<Url, DataError> {
        Url::parse(&self.base_url).map_err(DataError::from)
    }

    fn requests(&self, purpose: Purpose, symbols: &[SmolStr]) -> Vec<WsMessage> {
        let channel = BybitChannel::from(purpose);
        symbols
            .iter()
            .map(|symbol| format!("{}.{}", channel.as_ref(), Self::market(symbol)))
            .unique()
            .chunks(MAX_ARGS_PER_REQUEST)
            .into_iter()
            .map(|args| {
                WsMessage::text(
                    json!({
                        "op": "subscribe",
                        "args": args.collect::<Vec<_>>(),
                    })
                    .to_string(),
                )
            })
            .collect()
    }

    fn ping_interval(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_BYBIT,
            ping: || WsMessage::text(json!({ "op": "ping" }).to_string()),
        })
    }

    fn parse(&self, purpose: Purpose, payload: &str) -> Result<Vec<MarketEvent>, DataError> {
        match from_json::<BybitMessage>(payload)? {
            BybitMessage::Response(response) if !response.success => Err(DataError::Provider(
                format!("bybit request failed: {}", response.ret_msg),
            )),
            BybitMessage::Response(_) => Ok(vec![]),
            BybitMessage::Payload(payload) => payload.into_events(purpose),
        }
    }
}

/// Messages received on a [`Bybit`] public stream.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum BybitMessage {
    Response(BybitResponse),
    Payload(BybitPayload),
}

/// ### Raw Payload Examples
/// See docs: <https://bybit-exchange.github.io/docs/v5/ws/connect#how-to-subscribe-to-topics>
/// ```json
/// {"success": true, "ret_msg": "subscribe", "conn_id": "2324d924-aa4d-45b0", "op": "subscribe"}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BybitResponse {
    pub success: bool,
    #[serde(default)]
    pub ret_msg: String,
}

/// Topic push. `data` is an array for trades and an object for tickers.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BybitPayload {
    pub topic: String,
    pub data: Value,
}

impl BybitPayload {
    fn into_events(self, purpose: Purpose) -> Result<Vec<MarketEvent>, DataError> {
        let expected = BybitChannel::from(purpose);
        let Some((channel, _)) = self.topic.split_once('.') else {
            return Ok(vec![]);
        };
        if channel != expected.as_ref() {
            return Ok(vec![]);
        }

        let raw = self.data.to_string();
        match purpose {
            Purpose::Trades => Ok(from_json::<Vec<BybitTrade>>(&raw)?
                .into_iter()
                .map(MarketEvent::from)
                .collect()),
            Purpose::Ticker => Ok(vec![MarketEvent::from(from_json::<BybitTicker>(&raw)?)]),
        }
    }
}

/// ### Raw Payload Examples
/// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/trade>
/// Spot Side::Buy Trade
///```json
/// {
///     "T": 1672304486865,
///     "s": "BTCUSDT",
///     "S": "Buy",
///     "v": "0.001",
///     "p": "16578.50",
///     "L": "PlusTick",
///     "i": "20f43950-d8dd-5b31-9112-a178eb6023af",
///     "BT": false
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BybitTrade {
    #[serde(alias = "T", deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
    pub time: DateTime<Utc>,

    #[serde(rename = "s")]
    pub market: String,

    #[serde(rename = "S")]
    pub side: Side,

    #[serde(alias = "v", deserialize_with = "de_str")]
    pub amount: f64,

    #[serde(alias = "p", deserialize_with = "de_str")]
    pub price: f64,

    #[serde(rename = "i")]
    pub id: String,
}

impl From<BybitTrade> for MarketEvent {
    fn from(trade: BybitTrade) -> Self {
        MarketEvent {
            time_exchange: trade.time,
            time_received: Utc::now(),
            exchange: ExchangeId::Bybit,
            symbol: base_asset(&trade.market),
            kind: PublicTrade {
                id: trade.id.to_smolstr(),
                price: trade.price,
                quantity: trade.amount,
                side: trade.side,
                value_usd: trade.price * trade.amount,
            }
            .into(),
        }
    }
}

/// ### Raw Payload Examples
/// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/ticker>
/// ```json
/// {"symbol": "BTCUSDT", "lastPrice": "21109.77", "highPrice24h": "21426.99"}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct BybitTicker {
    pub symbol: String,
    #[serde(rename = "lastPrice", deserialize_with = "de_str")]
    pub last_price: f64,
}

impl From<BybitTicker> for MarketEvent {
    fn from(ticker: BybitTicker) -> Self {
        let now = Utc::now();
        MarketEvent {
            time_exchange: now,
            time_received: now,
            exchange: ExchangeId::Bybit,
            symbol: canonical_symbol(&ticker.symbol),
            kind: PriceTick {
                price: ticker.last_price,
            }
            .into(),
        }
    }
}
