use super::{Connector, ExchangeId, PingInterval, WsMessage, datetime_utc_from_epoch_ms, from_json};
use crate::{
    error::DataError,
    event::{MarketEvent, PriceTick, PublicTrade, Side, base_asset},
    subscription::Purpose,
};
use chrono::Utc;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use smol_str::{SmolStr, ToSmolStr};
use std::{sync::Arc, time::Duration};
use url::Url;

/// [`Upbit`] server url.
///
/// See docs: <https://global-docs.upbit.com/reference/websocket-guide>
pub const BASE_URL_UPBIT: &str = "wss://api.upbit.com/websocket/v1";

/// [`Upbit`] closes idle connections after 120s, so send a text "PING" well before.
pub const PING_INTERVAL_UPBIT: Duration = Duration::from_secs(60);

/// Default KRW per USD conversion rate.
pub const DEFAULT_KRW_PER_USD: f64 = 1350.0;

/// Shared, updatable KRW per USD rate used to express Upbit trade values in USD.
#[derive(Clone, Debug)]
pub struct KrwRate(Arc<RwLock<f64>>);

impl KrwRate {
    pub fn new(krw_per_usd: f64) -> Self {
        Self(Arc::new(RwLock::new(krw_per_usd)))
    }

    pub fn get(&self) -> f64 {
        *self.0.read()
    }

    /// Update the rate. Non-positive rates are ignored.
    pub fn set(&self, krw_per_usd: f64) {
        if krw_per_usd > 0.0 {
            *self.0.write() = krw_per_usd;
        }
    }

    pub fn to_usd(&self, krw: f64) -> f64 {
        krw / self.get()
    }
}

impl Default for KrwRate {
    fn default() -> Self {
        Self::new(DEFAULT_KRW_PER_USD)
    }
}

/// [`Upbit`] KRW market exchange.
///
/// Ticks are emitted in KRW under the bare asset symbol (eg/ "BTC"). Trades are converted to
/// USD with the shared [`KrwRate`].
#[derive(Clone, Debug)]
pub struct Upbit {
    base_url: String,
    rate: KrwRate,
}

impl Default for Upbit {
    fn default() -> Self {
        Self::new(KrwRate::default())
    }
}

impl Upbit {
    pub fn new(rate: KrwRate) -> Self {
        Self {
            base_url: BASE_URL_UPBIT.to_string(),
            rate,
        }
    }

    /// Override the server url (eg/ a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Upbit market code for a canonical symbol (`BTC` -> `KRW-BTC`).
    pub fn market(symbol: &str) -> String {
        format!("KRW-{}", base_asset(symbol))
    }
}

impl Connector for Upbit {
    const ID: ExchangeId = ExchangeId::Upbit;

    fn url(&self, _: Purpose, _: &[SmolStr]) -> Result<Url, DataError> {
        Url::parse(&self.base_url).map_err(DataError::from)
    }

    fn requests(&self, purpose: Purpose, symbols: &[SmolStr]) -> Vec<WsMessage> {
        let kind = match purpose {
            Purpose::Ticker => "ticker",
            Purpose::Trades => "trade",
        };
        let codes = symbols
            .iter()
            .map(|symbol| Self::market(symbol))
            .unique()
            .collect::<Vec<_>>();

        vec![WsMessage::text(
            json!([
                {"ticket": format!("pricewatch-{kind}")},
                {"type": kind, "codes": codes},
            ])
            .to_string(),
        )]
    }

    fn ping_interval(&self) -> Option<PingInterval> {
        Some(PingInterval {
            interval: PING_INTERVAL_UPBIT,
            ping: || WsMessage::text("PING"),
        })
    }

    fn parse(&self, purpose: Purpose, payload: &str) -> Result<Vec<MarketEvent>, DataError> {
        match (purpose, from_json::<UpbitMessage>(payload)?) {
            (Purpose::Ticker, UpbitMessage::Event(UpbitEvent::Ticker(ticker))) => Ok(vec![MarketEvent {
                time_exchange: datetime_utc_from_epoch_ms(ticker.timestamp)
                    .unwrap_or_else(Utc::now),
                time_received: Utc::now(),
                exchange: ExchangeId::Upbit,
                symbol: base_asset(&ticker.code),
                kind: PriceTick {
                    price: ticker.trade_price,
                }
                .into(),
            }]),
            (Purpose::Trades, UpbitMessage::Event(UpbitEvent::Trade(trade))) => {
                let price_usd = self.rate.to_usd(trade.trade_price);
                Ok(vec![MarketEvent {
                    time_exchange: datetime_utc_from_epoch_ms(trade.trade_timestamp)
                        .unwrap_or_else(Utc::now),
                    time_received: Utc::now(),
                    exchange: ExchangeId::Upbit,
                    symbol: base_asset(&trade.code),
                    kind: PublicTrade {
                        id: trade.sequential_id.to_smolstr(),
                        price: price_usd,
                        quantity: trade.trade_volume,
                        side: match trade.ask_bid {
                            UpbitAskBid::Bid => Side::Buy,
                            UpbitAskBid::Ask => Side::Sell,
                        },
                        value_usd: price_usd * trade.trade_volume,
                    }
                    .into(),
                }])
            }
            _ => Ok(vec![]),
        }
    }
}

/// Messages received from [`Upbit`], delivered as binary frames containing JSON.
///
/// ### Raw Payload Examples
/// See docs: <https://global-docs.upbit.com/reference/websocket-trade>
/// ```json
/// {"type": "trade", "code": "KRW-BTC", "trade_price": 135000000.0, "trade_volume": 0.01,
///  "ask_bid": "BID", "trade_timestamp": 1672515782136, "sequential_id": 1672515782136000}
/// ```
/// ```json
/// {"status": "UP"}
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(untagged)]
pub enum UpbitMessage {
    Event(UpbitEvent),
    Status { status: String },
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpbitEvent {
    Ticker(UpbitTicker),
    Trade(UpbitTrade),
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct UpbitTicker {
    pub code: String,
    pub trade_price: f64,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct UpbitTrade {
    pub code: String,
    pub trade_price: f64,
    pub trade_volume: f64,
    pub ask_bid: UpbitAskBid,
    #[serde(default)]
    pub trade_timestamp: u64,
    #[serde(default)]
    pub sequential_id: u64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpbitAskBid {
    Ask,
    Bid,
}
