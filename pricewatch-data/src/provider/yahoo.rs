use super::{Candle, CandleProvider, HTTP_TIMEOUT, QuoteProvider, Timeframe, resample::resample};
use crate::error::DataError;
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tracing::debug;

/// Yahoo Finance chart API base url.
pub const BASE_URL_YAHOO_CHART: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// The chart API rejects requests without a browser-like user agent.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) pricewatch";

/// Map a user facing index name to its Yahoo ticker. Any other symbol is used verbatim.
pub fn ticker(symbol: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    match symbol.as_str() {
        "NASDAQ" | "IXIC" => "^IXIC".to_string(),
        "SPX" | "SP500" | "S&P500" => "^GSPC".to_string(),
        "DOW" | "DJI" => "^DJI".to_string(),
        _ => symbol,
    }
}

/// Chart `(range, interval)` request parameters for a [`Timeframe`].
///
/// Ranges are wide enough to yield more than 50 bars after resampling. `4h` is not served by
/// the chart API and is synthesised from `1h`.
pub fn chart_params(timeframe: Timeframe) -> (&'static str, &'static str) {
    match timeframe {
        Timeframe::M1 => ("1d", "1m"),
        Timeframe::H1 => ("1mo", "1h"),
        Timeframe::H4 => ("3mo", "1h"),
        Timeframe::D1 => ("6mo", "1d"),
    }
}

#[derive(Debug, Deserialize)]
struct YahooResponse {
    chart: YahooChartBody,
}

#[derive(Debug, Deserialize)]
struct YahooChartBody {
    #[serde(default)]
    result: Option<Vec<YahooResult>>,
    #[serde(default)]
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    meta: YahooMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooMeta {
    #[serde(default)]
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    #[serde(default)]
    quote: Vec<YahooQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct YahooQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl YahooResponse {
    fn into_result(self) -> Result<YahooResult, DataError> {
        if let Some(error) = self.chart.error {
            return Err(DataError::Provider(format!(
                "{}: {}",
                error.code, error.description
            )));
        }

        self.chart
            .result
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| DataError::Provider("chart response contained no result".to_string()))
    }
}

impl YahooResult {
    /// Zip the column oriented quote arrays into candles, dropping rows with missing prices.
    fn candles(&self) -> Vec<Candle> {
        let Some(quote) = self.indicators.quote.first() else {
            return Vec::new();
        };

        let column = |values: &[Option<f64>], index: usize| values.get(index).copied().flatten();

        self.timestamp
            .iter()
            .enumerate()
            .filter_map(|(index, &seconds)| {
                Some(Candle {
                    time: DateTime::from_timestamp(seconds, 0)?,
                    open: column(&quote.open, index)?,
                    high: column(&quote.high, index)?,
                    low: column(&quote.low, index)?,
                    close: column(&quote.close, index)?,
                    volume: column(&quote.volume, index).unwrap_or(0.0),
                })
            })
            .collect()
    }
}

/// Yahoo Finance chart client for US equities and indices.
#[derive(Debug, Clone)]
pub struct YahooChart {
    client: reqwest::Client,
    base_url: String,
}

impl Default for YahooChart {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl YahooChart {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: BASE_URL_YAHOO_CHART.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn chart(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<YahooResult, DataError> {
        self.client
            .get(format!("{}/{}", self.base_url, ticker(symbol)))
            .query(&[("range", range), ("interval", interval)])
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<YahooResponse>()
            .await?
            .into_result()
    }
}

#[async_trait]
impl CandleProvider for YahooChart {
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError> {
        let (range, interval) = chart_params(timeframe);
        let mut candles = self.chart(symbol, range, interval).await?.candles();

        if timeframe == Timeframe::H4 {
            candles = resample(&candles, timeframe.duration());
        }

        let skip = candles.len().saturating_sub(limit);
        debug!(symbol, %timeframe, count = candles.len() - skip, "fetched chart candles");
        Ok(candles.split_off(skip))
    }
}

#[async_trait]
impl QuoteProvider for YahooChart {
    async fn quote(&self, symbol: &str) -> Result<f64, DataError> {
        let result = self.chart(symbol, "1d", "1m").await?;

        result
            .meta
            .regular_market_price
            .or_else(|| result.candles().last().map(|candle| candle.close))
            .ok_or_else(|| DataError::Provider(format!("no price available for {symbol}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_aliases() {
        struct TestCase {
            input: &'static str,
            expected: &'static str,
        }

        let tests = vec![
            // TC0: NASDAQ composite alias
            TestCase {
                input: "nasdaq",
                expected: "^IXIC",
            },
            // TC1: S&P 500 alias
            TestCase {
                input: "SPX",
                expected: "^GSPC",
            },
            // TC2: plain equity passes through uppercased
            TestCase {
                input: "aapl",
                expected: "AAPL",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = ticker(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_yahoo_response_candles_drop_null_rows() {
        let input = r#"{
            "chart": {
                "result": [{
                    "meta": {"symbol": "AAPL", "regularMarketPrice": 190.5},
                    "timestamp": [1709560800, 1709564400, 1709568000],
                    "indicators": {"quote": [{
                        "open":   [189.0, null, 190.0],
                        "high":   [190.0, null, 191.0],
                        "low":    [188.5, null, 189.5],
                        "close":  [189.5, null, 190.5],
                        "volume": [1000, null, null]
                    }]}
                }],
                "error": null
            }
        }"#;

        let result = serde_json::from_str::<YahooResponse>(input)
            .unwrap()
            .into_result()
            .unwrap();
        let candles = result.candles();

        assert_eq!(result.meta.regular_market_price, Some(190.5));
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].volume, 1000.0);
        assert_eq!(candles[1].close, 190.5);
        assert_eq!(candles[1].volume, 0.0);
    }

    #[test]
    fn test_yahoo_response_error() {
        let input = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;

        let actual = serde_json::from_str::<YahooResponse>(input)
            .unwrap()
            .into_result();

        assert!(matches!(actual, Err(DataError::Provider(_))));
    }
}
