use super::{HTTP_TIMEOUT, QuoteProvider, TokenProvider};
use crate::error::DataError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Korea Investment & Securities OpenAPI base url.
pub const BASE_URL_KIS: &str = "https://openapi.koreainvestment.com:9443";

/// Transaction id for the domestic stock current price inquiry.
const TR_ID_INQUIRE_PRICE: &str = "FHKST01010100";

/// Application credentials sent alongside the bearer token on every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KisCredentials {
    pub app_key: String,
    pub app_secret: String,
}

impl KisCredentials {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        }
    }

    /// Both the app key and secret are present.
    pub fn is_configured(&self) -> bool {
        !self.app_key.trim().is_empty() && !self.app_secret.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct KisResponse {
    rt_cd: String,
    #[serde(default)]
    msg1: String,
    #[serde(default)]
    output: Option<KisPriceOutput>,
}

#[derive(Debug, Deserialize)]
struct KisPriceOutput {
    /// Current price, string encoded integer KRW.
    stck_prpr: String,
}

impl KisResponse {
    fn into_price(self, symbol: &str) -> Result<f64, DataError> {
        if self.rt_cd != "0" {
            return Err(DataError::Provider(format!(
                "{symbol}: {}",
                self.msg1.trim()
            )));
        }

        self.output
            .and_then(|output| output.stck_prpr.trim().parse::<f64>().ok())
            .filter(|price| *price > 0.0)
            .ok_or_else(|| DataError::Provider(format!("{symbol}: missing current price")))
    }
}

/// Domestic (KRX) equity quotes from the KIS OpenAPI.
///
/// The bearer token is fetched from the configured [`TokenProvider`] on every request.
#[derive(Clone)]
pub struct KisQuote {
    client: reqwest::Client,
    base_url: String,
    credentials: KisCredentials,
    token: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for KisQuote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KisQuote")
            .field("base_url", &self.base_url)
            .field("app_key", &self.credentials.app_key)
            .finish_non_exhaustive()
    }
}

impl KisQuote {
    pub fn new(
        client: reqwest::Client,
        credentials: KisCredentials,
        token: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            base_url: BASE_URL_KIS.to_string(),
            credentials,
            token,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl QuoteProvider for KisQuote {
    async fn quote(&self, symbol: &str) -> Result<f64, DataError> {
        let token = self.token.token().await?;

        self.client
            .get(format!(
                "{}/uapi/domestic-stock/v1/quotations/inquire-price",
                self.base_url
            ))
            .header("content-type", "application/json")
            .bearer_auth(token)
            .header("appkey", &self.credentials.app_key)
            .header("appsecret", &self.credentials.app_secret)
            .header("tr_id", TR_ID_INQUIRE_PRICE)
            .query(&[("fid_cond_mrkt_div_code", "J"), ("fid_input_iscd", symbol)])
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json::<KisResponse>()
            .await?
            .into_price(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kis_response_into_price() {
        struct TestCase {
            input: &'static str,
            expected: Result<f64, ()>,
        }

        let tests = vec![
            // TC0: success
            TestCase {
                input: r#"{"rt_cd":"0","msg_cd":"MCA00000","msg1":"OK","output":{"stck_prpr":"71200","prdy_vrss":"-300"}}"#,
                expected: Ok(71200.0),
            },
            // TC1: broker rejected request
            TestCase {
                input: r#"{"rt_cd":"1","msg_cd":"EGW00123","msg1":"token expired"}"#,
                expected: Err(()),
            },
            // TC2: success code w/ zero price
            TestCase {
                input: r#"{"rt_cd":"0","msg1":"OK","output":{"stck_prpr":"0"}}"#,
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = serde_json::from_str::<KisResponse>(test.input)
                .unwrap()
                .into_price("005930")
                .map_err(|_| ());
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_kis_credentials_is_configured() {
        assert!(KisCredentials::new("key", "secret").is_configured());
        assert!(!KisCredentials::new("key", "").is_configured());
    }
}
