use crate::{exchange::ExchangeId, subscription::Purpose};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `pricewatch-data`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("SocketError: {0}")]
    Socket(String),

    #[error("failed to parse url: {0}")]
    UrlParse(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("failed to deserialise payload: {error}, payload: {payload}")]
    Deserialise { error: String, payload: String },

    #[error("failed to initialise connection unit due to empty symbol set")]
    SubscriptionsEmpty,

    #[error("unsupported purpose for exchange: {exchange}, purpose: {purpose}")]
    Unsupported {
        exchange: ExchangeId,
        purpose: Purpose,
    },

    #[error("provider rejected request: {0}")]
    Provider(String),

    #[error("credential provider failed: {0}")]
    Token(String),

    #[error("insufficient data: required {required}, received {actual}")]
    InsufficientData { required: usize, actual: usize },
}

impl DataError {
    /// Construct a [`DataError::Deserialise`] from a serde error and the offending payload.
    pub fn deserialise(error: serde_json::Error, payload: &str) -> Self {
        Self::Deserialise {
            error: error.to_string(),
            payload: payload.chars().take(256).collect(),
        }
    }

    /// Determine if an error is transient I/O that should be retried with backoff.
    ///
    /// Malformed payloads, unsupported requests and insufficient data are not transient:
    /// retrying the same input produces the same failure.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            DataError::Socket(_) | DataError::Http(_) => true,
            DataError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DataError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

impl From<reqwest::Error> for DataError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => Self::HttpStatus {
                status: status.as_u16(),
                url: value.url().map(|url| url.to_string()).unwrap_or_default(),
            },
            None => Self::Http(value.to_string()),
        }
    }
}

impl From<url::ParseError> for DataError {
    fn from(value: url::ParseError) -> Self {
        Self::UrlParse(value.to_string())
    }
}
