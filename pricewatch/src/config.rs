use crate::notify::Channel;
use pricewatch_data::{
    exchange::upbit::DEFAULT_KRW_PER_USD,
    provider::kis::KisCredentials,
    streams::UnitConfig,
};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Read `key` from the environment, falling back to `default` if unset or unparseable.
pub fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Top level application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub registry: RegistryConfig,
    pub stream: StreamConfig,
    pub evaluator: EvaluatorConfig,
    pub whale: WhaleConfig,
    pub volume: VolumeConfig,
    pub equity: EquityConfig,
    pub webhooks: WebhookConfig,
    pub kis: KisConfig,
    /// KRW per USD used to convert Upbit trade values.
    pub krw_per_usd: f64,
}

impl Config {
    /// Build configuration from environment variables, using defaults for anything unset.
    ///
    /// `DATA_DIR` (default `.`) is the directory every snapshot file lives in.
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(env_or("DATA_DIR", ".".to_string()));
        let defaults = Self::default();

        Self {
            registry: RegistryConfig {
                path: Some(data_dir.join("alerts.json")),
                max_per_symbol: env_or("MAX_ALERTS_PER_SYMBOL", defaults.registry.max_per_symbol),
                cooldown: env_secs("ALERT_COOLDOWN_SECONDS", defaults.registry.cooldown),
            },
            stream: StreamConfig {
                reconnect_delay: env_secs("RECONNECT_DELAY_SECONDS", defaults.stream.reconnect_delay),
                idle_wait: env_secs("IDLE_WAIT_SECONDS", defaults.stream.idle_wait),
            },
            evaluator: EvaluatorConfig {
                path: Some(data_dir.join("indicator_alerts.json")),
                poll_interval: env_secs("INDICATOR_POLL_SECONDS", defaults.evaluator.poll_interval),
                ..defaults.evaluator
            },
            whale: WhaleConfig {
                path: Some(data_dir.join("whale_settings.json")),
                enabled: env_or("WHALE_ENABLED", defaults.whale.enabled),
            },
            volume: VolumeConfig {
                path: Some(data_dir.join("volume_settings.json")),
                poll_interval: env_secs("VOLUME_POLL_SECONDS", defaults.volume.poll_interval),
                enabled: env_or("VOLUME_ENABLED", defaults.volume.enabled),
                ..defaults.volume
            },
            equity: EquityConfig {
                us_poll_interval: env_secs("US_STOCK_CHECK_INTERVAL", defaults.equity.us_poll_interval),
                kr_poll_interval: env_secs("KR_STOCK_CHECK_INTERVAL", defaults.equity.kr_poll_interval),
            },
            webhooks: WebhookConfig {
                crypto: env_string("DISCORD_WEBHOOK_CRYPTO"),
                us_stock: env_string("DISCORD_WEBHOOK_US_STOCK"),
                kr_stock: env_string("DISCORD_WEBHOOK_KR_STOCK"),
                whale: env_string("DISCORD_WEBHOOK_WHALE"),
                volume: env_string("DISCORD_WEBHOOK_VOLUME"),
                system: env_string("DISCORD_WEBHOOK_SYSTEM"),
            },
            kis: KisConfig {
                app_key: env_string("KIS_APP_KEY"),
                app_secret: env_string("KIS_APP_SECRET"),
                access_token: env_string("KIS_ACCESS_TOKEN"),
            },
            krw_per_usd: env_or("KRW_PER_USD", defaults.krw_per_usd),
        }
    }
}

/// Alert registry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Snapshot file, `None` keeps alerts in memory only.
    pub path: Option<PathBuf>,
    /// Maximum alerts per (market, symbol).
    pub max_per_symbol: usize,
    /// Minimum time between two triggers of the same alert.
    pub cooldown: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_per_symbol: 10,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl RegistryConfig {
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_max_per_symbol(mut self, max_per_symbol: usize) -> Self {
        self.max_per_symbol = max_per_symbol;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Streaming connection unit configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub reconnect_delay: Duration,
    pub idle_wait: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let unit = UnitConfig::default();
        Self {
            reconnect_delay: unit.reconnect_delay,
            idle_wait: unit.idle_wait,
        }
    }
}

impl StreamConfig {
    pub fn unit_config(&self) -> UnitConfig {
        UnitConfig::default()
            .with_reconnect_delay(self.reconnect_delay)
            .with_idle_wait(self.idle_wait)
    }
}

/// Indicator alert evaluator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    /// Snapshot file, `None` keeps indicator alerts in memory only.
    pub path: Option<PathBuf>,
    pub poll_interval: Duration,
    pub cooldown: Duration,
    /// Minimum candles required before an alert is evaluated.
    pub min_bars: usize,
    /// Minimum candles required by a direct RSI query.
    pub min_query_bars: usize,
    /// Candles requested per fetch.
    pub fetch_limit: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval: Duration::from_secs(300),
            cooldown: Duration::from_secs(3_600),
            min_bars: 50,
            min_query_bars: 20,
            fetch_limit: 100,
        }
    }
}

impl EvaluatorConfig {
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Whale detector configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WhaleConfig {
    /// Settings file, `None` keeps settings in memory only.
    pub path: Option<PathBuf>,
    /// Enabled state used when no settings file exists.
    pub enabled: bool,
}

impl WhaleConfig {
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Volume spike detector configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeConfig {
    /// Settings file, `None` keeps settings in memory only.
    pub path: Option<PathBuf>,
    /// Enabled state used when no settings file exists.
    pub enabled: bool,
    pub poll_interval: Duration,
    pub baseline_refresh: Duration,
    pub cooldown: Duration,
    /// Number of baseline candles averaged.
    pub baseline_candles: usize,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            path: None,
            enabled: false,
            poll_interval: Duration::from_secs(30),
            baseline_refresh: Duration::from_secs(600),
            cooldown: Duration::from_secs(300),
            baseline_candles: 20,
        }
    }
}

impl VolumeConfig {
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Equity quote poller intervals.
#[derive(Debug, Clone, PartialEq)]
pub struct EquityConfig {
    pub us_poll_interval: Duration,
    pub kr_poll_interval: Duration,
}

impl Default for EquityConfig {
    fn default() -> Self {
        Self {
            us_poll_interval: Duration::from_secs(60),
            kr_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Notification webhook urls per [`Channel`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WebhookConfig {
    pub crypto: Option<String>,
    pub us_stock: Option<String>,
    pub kr_stock: Option<String>,
    pub whale: Option<String>,
    pub volume: Option<String>,
    pub system: Option<String>,
}

impl WebhookConfig {
    /// Webhook url for a channel.
    ///
    /// Whale and volume messages fall back to the crypto webhook, system messages to the first
    /// configured webhook.
    pub fn url(&self, channel: Channel) -> Option<&str> {
        let url = match channel {
            Channel::Crypto => self.crypto.as_ref(),
            Channel::UsStock => self.us_stock.as_ref(),
            Channel::KrStock => self.kr_stock.as_ref(),
            Channel::Whale => self.whale.as_ref().or(self.crypto.as_ref()),
            Channel::Volume => self.volume.as_ref().or(self.crypto.as_ref()),
            Channel::System => self
                .system
                .as_ref()
                .or(self.crypto.as_ref())
                .or(self.us_stock.as_ref())
                .or(self.kr_stock.as_ref()),
        };
        url.map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        Channel::ALL.iter().all(|channel| self.url(*channel).is_none())
    }
}

/// Korea Investment & Securities credentials.
#[derive(Clone, PartialEq, Default)]
pub struct KisConfig {
    pub app_key: Option<String>,
    pub app_secret: Option<String>,
    /// Pre-issued bearer token. Token issuance is handled outside this process.
    pub access_token: Option<String>,
}

impl std::fmt::Debug for KisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KisConfig")
            .field("app_key", &self.app_key.is_some())
            .field("app_secret", &self.app_secret.is_some())
            .field("access_token", &self.access_token.is_some())
            .finish()
    }
}

impl KisConfig {
    /// Credentials and token, if every part is present.
    pub fn credentials(&self) -> Option<(KisCredentials, String)> {
        let credentials = KisCredentials::new(self.app_key.clone()?, self.app_secret.clone()?);
        let token = self.access_token.clone()?;
        credentials.is_configured().then_some((credentials, token))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            stream: StreamConfig::default(),
            evaluator: EvaluatorConfig::default(),
            whale: WhaleConfig::default(),
            volume: VolumeConfig::default(),
            equity: EquityConfig::default(),
            webhooks: WebhookConfig::default(),
            kis: KisConfig::default(),
            krw_per_usd: DEFAULT_KRW_PER_USD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_url_fallback() {
        struct TestCase {
            channel: Channel,
            expected: Option<&'static str>,
        }

        let config = WebhookConfig {
            crypto: Some("https://hooks/crypto".to_string()),
            us_stock: Some("https://hooks/us".to_string()),
            ..Default::default()
        };

        let tests = vec![
            // TC0: direct channel
            TestCase {
                channel: Channel::UsStock,
                expected: Some("https://hooks/us"),
            },
            // TC1: whale falls back to crypto
            TestCase {
                channel: Channel::Whale,
                expected: Some("https://hooks/crypto"),
            },
            // TC2: system falls back to first configured
            TestCase {
                channel: Channel::System,
                expected: Some("https://hooks/crypto"),
            },
            // TC3: unconfigured channel w/o fallback
            TestCase {
                channel: Channel::KrStock,
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = config.url(test.channel);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_kis_credentials_require_every_part() {
        let mut config = KisConfig {
            app_key: Some("key".to_string()),
            app_secret: Some("secret".to_string()),
            access_token: None,
        };
        assert!(config.credentials().is_none());

        config.access_token = Some("token".to_string());
        assert!(config.credentials().is_some());
    }

    #[test]
    fn test_env_or_falls_back_on_missing_key() {
        let actual: u64 = env_or("PRICEWATCH_TEST_UNSET_KEY_9F2A", 42);
        assert_eq!(actual, 42);
    }
}
