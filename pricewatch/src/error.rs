use crate::model::Market;
use pricewatch_data::error::DataError;
use smol_str::SmolStr;
use std::path::Path;
use thiserror::Error;

/// All errors generated in `pricewatch`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlertError {
    #[error("maximum alerts ({limit}) reached for {market} {symbol}")]
    Capacity {
        market: Market,
        symbol: SmolStr,
        limit: usize,
    },

    #[error("alert not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to persist {path}: {error}")]
    Persist { path: String, error: String },

    #[error("market data: {0}")]
    Data(#[from] DataError),

    #[error("insufficient data: required {required}, received {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("missing credential: {0}")]
    MissingCredential(String),
}

impl AlertError {
    pub fn persist(path: &Path, error: impl std::fmt::Display) -> Self {
        Self::Persist {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Insufficient candles, either detected locally or reported by a provider.
    ///
    /// Such cycles are skipped silently and the alert stays pending.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            AlertError::InsufficientData { .. }
                | AlertError::Data(DataError::InsufficientData { .. })
        )
    }

    /// Transient provider I/O, retried on the next poll cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, AlertError::Data(error) if error.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_error_is_insufficient_data() {
        struct TestCase {
            input: AlertError,
            expected: bool,
        }

        let tests = vec![
            // TC0: local insufficient data
            TestCase {
                input: AlertError::InsufficientData {
                    required: 50,
                    actual: 3,
                },
                expected: true,
            },
            // TC1: provider insufficient data
            TestCase {
                input: AlertError::Data(DataError::InsufficientData {
                    required: 20,
                    actual: 0,
                }),
                expected: true,
            },
            // TC2: transient provider error
            TestCase {
                input: AlertError::Data(DataError::Http("timed out".to_string())),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_insufficient_data();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_alert_error_is_transient() {
        struct TestCase {
            input: AlertError,
            expected: bool,
        }

        let tests = vec![
            // TC0: provider timeout
            TestCase {
                input: AlertError::Data(DataError::Http("timed out".to_string())),
                expected: true,
            },
            // TC1: provider rate limit
            TestCase {
                input: AlertError::Data(DataError::HttpStatus {
                    status: 429,
                    url: "https://api.binance.com/api/v3/klines".to_string(),
                }),
                expected: true,
            },
            // TC2: malformed provider payload
            TestCase {
                input: AlertError::Data(DataError::Deserialise {
                    error: "expected value".to_string(),
                    payload: "{".to_string(),
                }),
                expected: false,
            },
            // TC3: local insufficient data
            TestCase {
                input: AlertError::InsufficientData {
                    required: 50,
                    actual: 3,
                },
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_transient();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_capacity_display() {
        let error = AlertError::Capacity {
            market: Market::Crypto,
            symbol: SmolStr::new("BTC"),
            limit: 10,
        };
        assert_eq!(error.to_string(), "maximum alerts (10) reached for crypto BTC");
    }
}
