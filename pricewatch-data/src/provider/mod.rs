use crate::error::DataError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

/// Binance spot REST market data (crypto klines and last price).
pub mod binance;

/// Korea Investment & Securities domestic equities quotes.
pub mod kis;

/// Client-side OHLCV resampling for intervals a provider does not serve natively.
pub mod resample;

/// Yahoo Finance chart API (US equities and indices).
pub mod yahoo;

/// Default HTTP timeout for provider requests.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Canonical OHLCV candle. `time` is the bucket open time.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Candle interval.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    #[display("1m")]
    M1,
    #[serde(rename = "1h")]
    #[display("1h")]
    H1,
    #[serde(rename = "4h")]
    #[display("4h")]
    H4,
    #[serde(rename = "1d")]
    #[display("1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::M1, Timeframe::H1, Timeframe::H4, Timeframe::D1];

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::from_secs(60),
            Timeframe::H1 => Duration::from_secs(3_600),
            Timeframe::H4 => Duration::from_secs(14_400),
            Timeframe::D1 => Duration::from_secs(86_400),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl FromStr for Timeframe {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Timeframe::ALL
            .into_iter()
            .find(|timeframe| timeframe.as_str() == s)
            .ok_or_else(|| DataError::Provider(format!("unsupported timeframe: {s}")))
    }
}

/// Historical OHLCV provider.
#[async_trait]
pub trait CandleProvider: Send + Sync {
    /// Fetch up to `limit` of the most recent candles, oldest first.
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError>;
}

/// Latest price provider.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<f64, DataError>;
}

/// Bearer token provider for brokers that require OAuth. Acquisition and refresh are the
/// provider's concern.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, DataError>;
}

/// [`TokenProvider`] returning a pre-issued token.
#[derive(Clone, Debug)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, DataError> {
        if self.0.trim().is_empty() {
            Err(DataError::Token("no access token configured".to_string()))
        } else {
            Ok(self.0.clone())
        }
    }
}
