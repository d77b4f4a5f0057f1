use super::{
    Connector, ExchangeId, PingInterval, WsMessage, de_str, de_str_u64_epoch_ms_as_datetime_utc,
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
use serde_json::json;
use smol_str::{SmolStr, ToSmolStr};
use std::time::Duration;
use url::Url;

/// [`Okx`] server base url.
///
/// See docs: <https://www.okx.com/docs-v5/en/#overview-api-resources-and-support>
pub const BASE_URL_OKX: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// [`Okx`] server [`PingInterval`] duration.
///
/// See docs: <https://www.okx.com/docs-v5/en/#websocket-api-connect>
pub const PING_INTERVAL_OKX: Duration = Duration::from_secs(29);

/// Type that defines which [`Okx`] channel a [`Purpose`] subscribes to.
///
/// See docs: <https://www.okx.com/docs-v5/en/#websocket-api-public-channel>
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct OkxChannel(pub &'static str);

impl OkxChannel {
    /// [`Okx`] real-time trades channel.
    ///
    /// See docs: <https://www.okx.com/docs-v5/en/#websocket-api-public-channel-trades-channel>
    pub const TRADES: Self = Self("trades");

    /// [`Okx`] tickers channel, last traded price pushed at most every 100ms.
    ///
    /// See docs: <https://www.okx.com/docs-v5/en/#public-data-websocket-tickers-channel>
    pub const TICKERS: Self = Self("tickers");
}

impl From<Purpose> for OkxChannel {
    fn from(purpose: Purpose) -> Self {
        match purpose {
            Purpose::Ticker => OkxChannel::TICKERS,
            Purpose::Trades => OkxChannel::TRADES,
        }
    }
}

impl AsRef<str> for OkxChannel {
    fn as_ref(&self) -> &str {
        self.0
    }
}

/// [`Okx`] exchange.
///
/// See docs: <https://www.okx.com/docs-v5/en/#websocket-api>
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Okx {
    base_url: String,
}

impl Default for Okx {
    fn default() -> Self {
        Self {
            base_url: BASE_URL_OKX.to_string(),
        }
    }
}

impl Okx {
    /// Override the server url (eg/ a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Okx instrument id for a canonical symbol (`BTC` or `BTCUSDT` -> `BTC-USDT`).
    pub fn market(symbol: &str) -> String {
        format!("{}-USDT", base_asset(symbol))
    }
}

impl Connector for Okx {
    const ID: ExchangeId = ExchangeId::Okx;

    fn url(&self, _: Purpose, _: &[SmolStr]) -> Result<Url, DataError> {
        Url::parse(&self.base_url).map_err(DataError::from)
    }

    fn requests(&self, purpose: Purpose, symbols: &[SmolStr]) -> Vec<WsMessage> {
        let channel = OkxChannel::from(purpose);
        let args = symbols
            .iter()
            .map(|symbol| Self::market(symbol))
            .unique()
            .map(|market| {
                json!({
                    "channel": channel.as_ref(),
                    "instId": market,
                })
            })
            .collect::<Vec<_>>();

        vec![WsMessage::text(
            json!({
                "op": "subscribe",
                "args": args,
            })
            .to_string(),
        )]
    }

    fn ping_interval(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_OKX,
            ping: || WsMessage::text("ping"),
        })
    }

    fn parse(&self, purpose: Purpose, payload: &str) -> Result<Vec<MarketEvent>, DataError> {
        if payload.trim() == "pong" {
            return Ok(vec![]);
        }

        match purpose {
            Purpose::Ticker => from_json::<OkxMessage<OkxTicker>>(payload)?
                .into_data()
                .map(|tickers| tickers.into_iter().map(MarketEvent::from).collect()),
            Purpose::Trades => from_json::<OkxMessage<OkxTrade>>(payload)?
                .into_data()
                .map(|trades| trades.into_iter().map(MarketEvent::from).collect()),
        }
    }
}

/// Every [`Okx`] public message: either an `event` (subscribe ack, error) or a `data` push.
///
/// ### Raw Payload Examples
/// See docs: <https://www.okx.com/docs-v5/en/#overview-websocket-subscribe>
/// ```json
/// {"event": "subscribe", "arg": {"channel": "trades", "instId": "BTC-USDT"}, "connId": "a4d3ae55"}
/// ```
/// ```json
/// {"event": "error", "code": "60012", "msg": "Invalid request", "connId": "a4d3ae55"}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct OkxMessage<T> {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> OkxMessage<T> {
    fn into_data(self) -> Result<Vec<T>, DataError> {
        match self.event.as_deref() {
            Some("error") => Err(DataError::Provider(format!(
                "okx subscription error: {}",
                self.msg.unwrap_or_default()
            ))),
            _ => Ok(self.data),
        }
    }
}

/// ### Raw Payload Examples
/// See docs: <https://www.okx.com/docs-v5/en/#websocket-api-public-channel-trades-channel>
/// ```json
/// {
///     "instId": "BTC-USDT",
///     "tradeId": "130639474",
///     "px": "42219.9",
///     "sz": "0.12060306",
///     "side": "buy",
///     "ts": "1630048897897"
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct OkxTrade {
    #[serde(rename = "instId")]
    pub market: String,

    #[serde(rename = "tradeId")]
    pub id: String,

    #[serde(rename = "px", deserialize_with = "de_str")]
    pub price: f64,

    #[serde(rename = "sz", deserialize_with = "de_str")]
    pub quantity: f64,

    pub side: OkxSide,

    #[serde(rename = "ts", deserialize_with = "de_str_u64_epoch_ms_as_datetime_utc")]
    pub time: DateTime<Utc>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OkxSide {
    Buy,
    Sell,
}

impl From<OkxTrade> for MarketEvent {
    fn from(trade: OkxTrade) -> Self {
        MarketEvent {
            time_exchange: trade.time,
            time_received: Utc::now(),
            exchange: ExchangeId::Okx,
            symbol: base_asset(&trade.market),
            kind: PublicTrade {
                id: trade.id.to_smolstr(),
                price: trade.price,
                quantity: trade.quantity,
                side: match trade.side {
                    OkxSide::Buy => Side::Buy,
                    OkxSide::Sell => Side::Sell,
                },
                value_usd: trade.price * trade.quantity,
            }
            .into(),
        }
    }
}

/// ### Raw Payload Examples
/// See docs: <https://www.okx.com/docs-v5/en/#public-data-websocket-tickers-channel>
/// ```json
/// {
///     "instType": "SPOT",
///     "instId": "BTC-USDT",
///     "last": "9999.99",
///     "ts": "1597026383085"
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct OkxTicker {
    #[serde(rename = "instId")]
    pub market: String,

    #[serde(rename = "last", deserialize_with = "de_str")]
    pub last_price: f64,

    #[serde(rename = "ts", deserialize_with = "de_str_u64_epoch_ms_as_datetime_utc")]
    pub time: DateTime<Utc>,
}

impl From<OkxTicker> for MarketEvent {
    fn from(ticker: OkxTicker) -> Self {
        MarketEvent {
            time_exchange: ticker.time,
            time_received: Utc::now(),
            exchange: ExchangeId::Okx,
            symbol: canonical_symbol(&ticker.market),
            kind: PriceTick {
                price: ticker.last_price,
            }
            .into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DataKind;

    #[test]
    fn test_okx_requests() {
        let requests = Okx::default().requests(
            Purpose::Trades,
            &[SmolStr::new("BTC"), SmolStr::new("ETHUSDT")],
        );

        let expected = json!({
            "op": "subscribe",
            "args": [
                {"channel": "trades", "instId": "BTC-USDT"},
                {"channel": "trades", "instId": "ETH-USDT"},
            ]
        });

        assert_eq!(requests.len(), 1);
        let actual: serde_json::Value =
            serde_json::from_str(requests[0].to_text().unwrap()).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_okx_parse_trades() {
        struct TestCase {
            input: &'static str,
            expected: Result<Vec<(SmolStr, Side, f64)>, ()>,
        }

        let tests = vec![
            // TC0: trades push w/ one trade
            TestCase {
                input: r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"130639474","px":"50000","sz":"10","side":"sell","ts":"1630048897897","count":"3"}]}"#,
                expected: Ok(vec![(SmolStr::new("BTC"), Side::Sell, 500_000.0)]),
            },
            // TC1: subscription ack produces no events
            TestCase {
                input: r#"{"event":"subscribe","arg":{"channel":"trades","instId":"BTC-USDT"},"connId":"a4d3ae55"}"#,
                expected: Ok(vec![]),
            },
            // TC2: pong produces no events
            TestCase {
                input: "pong",
                expected: Ok(vec![]),
            },
            // TC3: error event
            TestCase {
                input: r#"{"event":"error","code":"60012","msg":"Invalid request","connId":"a4d3ae55"}"#,
                expected: Err(()),
            },
            // TC4: malformed payload
            TestCase {
                input: r#"{"data":[{"instId":"BTC-USDT"}]}"#,
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = Okx::default()
                .parse(Purpose::Trades, test.input)
                .map(|events| {
                    events
                        .into_iter()
                        .map(|event| match event.kind {
                            DataKind::Trade(trade) => (event.symbol, trade.side, trade.value_usd),
                            other => panic!("TC{index} unexpected kind: {other:?}"),
                        })
                        .collect::<Vec<_>>()
                })
                .map_err(|_| ());
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_okx_parse_ticker() {
        let input = r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"instType":"SPOT","instId":"BTC-USDT","last":"9999.99","ts":"1597026383085"}]}"#;

        let events = Okx::default().parse(Purpose::Ticker, input).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].symbol, "BTCUSDT");
        assert_eq!(events[0].kind, DataKind::Tick(PriceTick { price: 9999.99 }));
    }
}
