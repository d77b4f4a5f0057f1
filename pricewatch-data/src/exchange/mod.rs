use crate::{error::DataError, event::MarketEvent, subscription::Purpose};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{str::FromStr, time::Duration};
use url::Url;

/// `Binance` spot [`Connector`] and message types.
pub mod binance;

/// `Bybit` spot [`Connector`] and message types.
pub mod bybit;

/// `Okx` [`Connector`] and message types.
pub mod okx;

/// `Upbit` KRW market [`Connector`] and message types.
pub mod upbit;

/// Convenient type alias for a tungstenite WebSocket message.
pub type WsMessage = tokio_tungstenite::tungstenite::Message;

/// Unique identifier of every supported exchange.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeId {
    #[display("binance")]
    #[serde(alias = "Binance")]
    Binance,
    #[display("okx")]
    #[serde(alias = "OKX")]
    Okx,
    #[display("bybit")]
    #[serde(alias = "Bybit")]
    Bybit,
    #[display("upbit")]
    #[serde(alias = "Upbit")]
    Upbit,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 4] = [
        ExchangeId::Binance,
        ExchangeId::Okx,
        ExchangeId::Bybit,
        ExchangeId::Upbit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Okx => "okx",
            ExchangeId::Bybit => "bybit",
            ExchangeId::Upbit => "upbit",
        }
    }
}

impl FromStr for ExchangeId {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExchangeId::ALL
            .into_iter()
            .find(|exchange| exchange.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DataError::Provider(format!("unknown exchange: {s}")))
    }
}

/// Defines the frequency and construction function for custom WebSocket pings, used for
/// exchanges that require additional application-level pings.
#[derive(Debug)]
pub struct PingInterval {
    pub interval: Duration,
    pub ping: fn() -> WsMessage,
}

/// Defines how to connect to an exchange, what to subscribe to, and how to normalise the
/// payloads it sends back.
pub trait Connector: Send + Sync + 'static {
    /// Unique identifier for the exchange this [`Connector`] targets.
    const ID: ExchangeId;

    /// WebSocket url to connect to for the provided purpose and symbol set.
    ///
    /// Binance encodes subscriptions in the url, every other venue uses a fixed url.
    fn url(&self, purpose: Purpose, symbols: &[SmolStr]) -> Result<Url, DataError>;

    /// Subscription payloads sent immediately after the connection is established.
    fn requests(&self, purpose: Purpose, symbols: &[SmolStr]) -> Vec<WsMessage>;

    /// Optional application-level ping sent on a fixed interval.
    fn ping_interval(&self) -> Option<PingInterval> {
        None
    }

    /// Normalise a single inbound payload.
    ///
    /// Subscription acknowledgements and heartbeats produce an empty `Vec`. Malformed payloads
    /// produce a [`DataError::Deserialise`].
    fn parse(&self, purpose: Purpose, payload: &str) -> Result<Vec<MarketEvent>, DataError>;
}

/// Parse a JSON payload, mapping failures into [`DataError::Deserialise`].
pub(crate) fn from_json<'a, T>(payload: &'a str) -> Result<T, DataError>
where
    T: Deserialize<'a>,
{
    serde_json::from_str(payload).map_err(|error| DataError::deserialise(error, payload))
}

/// Deserialize a `String` as the desired type.
pub(crate) fn de_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::de::Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let data: &str = Deserialize::deserialize(deserializer)?;
    data.parse::<T>().map_err(serde::de::Error::custom)
}

/// Deserialize a u64 milliseconds value as `DateTime<Utc>`.
pub(crate) fn de_u64_epoch_ms_as_datetime_utc<'de, D>(
    deserializer: D,
) -> Result<chrono::DateTime<chrono::Utc>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let epoch_ms: u64 = Deserialize::deserialize(deserializer)?;
    datetime_utc_from_epoch_ms(epoch_ms)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid epoch ms: {epoch_ms}")))
}

/// Deserialize a string encoded u64 milliseconds value as `DateTime<Utc>`.
pub(crate) fn de_str_u64_epoch_ms_as_datetime_utc<'de, D>(
    deserializer: D,
) -> Result<chrono::DateTime<chrono::Utc>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let epoch_ms: u64 = de_str(deserializer)?;
    datetime_utc_from_epoch_ms(epoch_ms)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid epoch ms: {epoch_ms}")))
}

pub(crate) fn datetime_utc_from_epoch_ms(epoch_ms: u64) -> Option<chrono::DateTime<chrono::Utc>> {
    i64::try_from(epoch_ms)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_id_from_str() {
        struct TestCase {
            input: &'static str,
            expected: Option<ExchangeId>,
        }

        let tests = vec![
            // TC0: lowercase
            TestCase {
                input: "binance",
                expected: Some(ExchangeId::Binance),
            },
            // TC1: mixed case w/ whitespace
            TestCase {
                input: " Upbit ",
                expected: Some(ExchangeId::Upbit),
            },
            // TC2: unknown exchange
            TestCase {
                input: "kraken",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.parse::<ExchangeId>().ok();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
