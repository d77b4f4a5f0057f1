use super::{Candle, CandleProvider, HTTP_TIMEOUT, QuoteProvider, Timeframe};
use crate::{error::DataError, event::base_asset};
use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, de::IgnoredAny};
use tracing::debug;

/// Binance spot REST base url.
///
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/rest-api>
pub const BASE_URL_BINANCE_REST: &str = "https://api.binance.com";

/// Binance kline response format
#[derive(Debug, Deserialize)]
struct BinanceKline(
    i64,        // 0: Open time
    String,     // 1: Open
    String,     // 2: High
    String,     // 3: Low
    String,     // 4: Close
    String,     // 5: Volume
    IgnoredAny, // 6: Close time
    IgnoredAny, // 7: Quote asset volume
    IgnoredAny, // 8: Number of trades
    IgnoredAny, // 9: Taker buy base asset volume
    IgnoredAny, // 10: Taker buy quote asset volume
    IgnoredAny, // 11: Ignore
);

impl BinanceKline {
    fn into_candle(self) -> Option<Candle> {
        Some(Candle {
            time: DateTime::from_timestamp_millis(self.0)?,
            open: self.1.parse().ok()?,
            high: self.2.parse().ok()?,
            low: self.3.parse().ok()?,
            close: self.4.parse().ok()?,
            volume: self.5.parse().ok()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BinancePrice {
    #[serde(deserialize_with = "crate::exchange::de_str")]
    price: f64,
}

/// Binance spot REST client for USDT quoted klines and last price.
#[derive(Debug, Clone)]
pub struct BinanceRest {
    client: reqwest::Client,
    base_url: String,
}

impl Default for BinanceRest {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl BinanceRest {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: BASE_URL_BINANCE_REST.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Binance REST symbol for a canonical symbol (`BTC` or `BTC/USDT` -> `BTCUSDT`).
    pub fn pair(symbol: &str) -> String {
        format!("{}USDT", base_asset(symbol))
    }
}

#[async_trait]
impl CandleProvider for BinanceRest {
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError> {
        let pair = Self::pair(symbol);
        let limit = limit.clamp(1, 1000).to_string();

        let klines = self
            .client
            .get(format!("{}/api/v3/klines", self.base_url))
            .query(&[
                ("symbol", pair.as_str()),
                ("interval", timeframe.as_str()),
                ("limit", limit.as_str()),
            ])
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<BinanceKline>>()
            .await?;

        let total = klines.len();
        let candles = klines
            .into_iter()
            .filter_map(BinanceKline::into_candle)
            .collect::<Vec<_>>();

        if candles.len() != total {
            debug!(%pair, dropped = total - candles.len(), "dropped malformed klines");
        }

        Ok(candles)
    }
}

#[async_trait]
impl QuoteProvider for BinanceRest {
    async fn quote(&self, symbol: &str) -> Result<f64, DataError> {
        let pair = Self::pair(symbol);
        let price = self
            .client
            .get(format!("{}/api/v3/ticker/price", self.base_url))
            .query(&[("symbol", pair.as_str())])
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<BinancePrice>()
            .await?;

        Ok(price.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binance_kline_into_candle() {
        let input = r#"[
            [1499040000000, "0.01634790", "0.80000000", "0.01575800", "0.01577100", "148976.11427815",
             1499644799999, "2434.19055334", 308, "1756.87402397", "28.46694368", "17928899.62484339"],
            [1499040000000, "bad", "0.8", "0.01", "0.01", "1", 1499644799999, "1", 1, "1", "1", "0"]
        ]"#;

        let candles = serde_json::from_str::<Vec<BinanceKline>>(input)
            .unwrap()
            .into_iter()
            .filter_map(BinanceKline::into_candle)
            .collect::<Vec<_>>();

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 0.015771);
        assert_eq!(candles[0].volume, 148976.11427815);
        assert_eq!(candles[0].time.timestamp_millis(), 1499040000000);
    }

    #[test]
    fn test_binance_kline_ignores_trailing_columns() {
        // Trailing columns are skipped whatever their type
        let input = r#"[1499040000000, "1.5", "2.0", "1.0", "1.75", "10", "1499644799999", 0, "308", null, 28.4, 0]"#;

        let candle = serde_json::from_str::<BinanceKline>(input)
            .unwrap()
            .into_candle()
            .unwrap();

        assert_eq!(candle.open, 1.5);
        assert_eq!(candle.close, 1.75);
        assert_eq!(candle.volume, 10.0);
    }

    #[test]
    fn test_binance_pair() {
        assert_eq!(BinanceRest::pair("btc"), "BTCUSDT");
        assert_eq!(BinanceRest::pair("ETH/USDT"), "ETHUSDT");
    }
}
