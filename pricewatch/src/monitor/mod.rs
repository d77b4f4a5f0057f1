use crate::{
    model::{Condition, Market},
    notify::{Channel, Notification, Notifier, colour, format_price},
    registry::{AlertRegistry, PriceAlert},
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use pricewatch_data::event::canonical_symbol;
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Crypto price alerts driven by exchange ticker streams.
pub mod crypto;

/// US and KR equity price alerts driven by quote polling.
pub mod equity;

/// Evaluates observed prices against the [`AlertRegistry`] and delivers triggered alerts.
///
/// Shared by every price source. Keeps the latest observed price per (market, symbol).
pub struct PriceMonitor {
    registry: Arc<AlertRegistry>,
    notifier: Arc<dyn Notifier>,
    last_price: Mutex<FnvHashMap<(Market, SmolStr), f64>>,
}

impl std::fmt::Debug for PriceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceMonitor")
            .field("registry", &self.registry)
            .field("last_price", &*self.last_price.lock())
            .finish()
    }
}

impl PriceMonitor {
    pub fn new(registry: Arc<AlertRegistry>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            registry,
            notifier,
            last_price: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn registry(&self) -> &Arc<AlertRegistry> {
        &self.registry
    }

    /// Latest observed price for a symbol.
    pub fn last_price(&self, market: Market, symbol: &str) -> Option<f64> {
        self.last_price
            .lock()
            .get(&(market, canonical_symbol(symbol)))
            .copied()
    }

    pub async fn evaluate_price(&self, market: Market, symbol: &str, price: f64) -> usize {
        self.evaluate_price_at(market, symbol, price, Utc::now()).await
    }

    /// Record `price` and deliver every alert it triggers at `now`.
    ///
    /// Each due alert is claimed before delivery and rolled back if delivery fails. Returns the
    /// number of alerts delivered.
    pub async fn evaluate_price_at(
        &self,
        market: Market,
        symbol: &str,
        price: f64,
        now: DateTime<Utc>,
    ) -> usize {
        self.last_price
            .lock()
            .insert((market, canonical_symbol(symbol)), price);

        let mut delivered = 0;
        for alert in self.registry.match_triggers_at(market, symbol, price, now) {
            let Some(claim) = self.registry.claim(&alert.id, now) else {
                continue;
            };

            if self.notifier.send(price_notification(&alert, price, now)).await {
                info!(id = %alert.id, %market, symbol = %alert.symbol, price, "price alert delivered");
                delivered += 1;
            } else {
                warn!(id = %alert.id, %market, symbol = %alert.symbol, "price alert delivery failed");
                self.registry.rollback(claim);
            }
        }
        delivered
    }
}

fn market_colour(market: Market) -> u32 {
    match market {
        Market::Crypto => colour::CRYPTO,
        Market::UsEquity => colour::US_STOCK,
        Market::KrEquity => colour::KR_STOCK,
    }
}

/// Notification for a triggered [`PriceAlert`].
pub fn price_notification(alert: &PriceAlert, price: f64, now: DateTime<Utc>) -> Notification {
    let difference = price - alert.threshold;
    let percent = if alert.threshold == 0.0 {
        0.0
    } else {
        difference / alert.threshold * 100.0
    };
    let direction = match alert.condition {
        Condition::Above => "ABOVE",
        Condition::Below => "BELOW",
    };

    Notification::new(Channel::from(alert.market), "Price alert triggered")
        .with_colour(market_colour(alert.market))
        .with_time(now)
        .with_field("Symbol", alert.symbol.as_str())
        .with_field("Current Price", format_price(price))
        .with_field("Target Price", format_price(alert.threshold))
        .with_field("Condition", direction)
        .with_field(
            "Price Change",
            format!("{} ({percent:+.2}%)", format_price(difference)),
        )
        .with_field("Time", now.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RegistryConfig, notify::test_util::RecordingNotifier};
    use chrono::TimeZone;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
    }

    fn monitor(notifier: Arc<RecordingNotifier>) -> PriceMonitor {
        PriceMonitor::new(Arc::new(AlertRegistry::new(RegistryConfig::default())), notifier)
    }

    #[tokio::test]
    async fn test_price_alert_cooldown_scenario() {
        let notifier = Arc::new(RecordingNotifier::new(true));
        let monitor = monitor(Arc::clone(&notifier));
        let alert = monitor
            .registry()
            .add(Market::Crypto, "BTC", Condition::Above, 50_000.0)
            .unwrap();

        struct TestCase {
            seconds: i64,
            expected: usize,
        }

        let tests = vec![
            // TC0: first tick at the threshold fires
            TestCase {
                seconds: 0,
                expected: 1,
            },
            // TC1: within the 300s cooldown
            TestCase {
                seconds: 100,
                expected: 0,
            },
            // TC2: cooldown elapsed
            TestCase {
                seconds: 301,
                expected: 1,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = monitor
                .evaluate_price_at(Market::Crypto, "BTC", 50_000.0, t(test.seconds))
                .await;
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }

        assert_eq!(notifier.count(), 2);
        assert_eq!(
            monitor.registry().get(alert.id.as_str()).unwrap().last_triggered,
            Some(t(301))
        );
        assert_eq!(monitor.last_price(Market::Crypto, "btc"), Some(50_000.0));
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_alert_due() {
        let notifier = Arc::new(RecordingNotifier::new(false));
        let monitor = monitor(Arc::clone(&notifier));
        let alert = monitor
            .registry()
            .add(Market::UsEquity, "AAPL", Condition::Below, 150.0)
            .unwrap();

        assert_eq!(monitor.evaluate_price_at(Market::UsEquity, "AAPL", 149.0, t(0)).await, 0);
        assert_eq!(monitor.registry().get(alert.id.as_str()).unwrap().last_triggered, None);

        notifier.set_succeed(true);
        assert_eq!(monitor.evaluate_price_at(Market::UsEquity, "AAPL", 149.0, t(1)).await, 1);
        assert_eq!(notifier.count(), 2);
    }

    #[tokio::test]
    async fn test_other_market_is_ignored() {
        let notifier = Arc::new(RecordingNotifier::new(true));
        let monitor = monitor(Arc::clone(&notifier));
        monitor
            .registry()
            .add(Market::KrEquity, "005930", Condition::Above, 70_000.0)
            .unwrap();

        assert_eq!(monitor.evaluate_price_at(Market::Crypto, "005930", 80_000.0, t(0)).await, 0);
        assert_eq!(monitor.evaluate_price_at(Market::KrEquity, "005930", 80_000.0, t(0)).await, 1);
        assert_eq!(notifier.sent.lock()[0].channel, Channel::KrStock);
    }

    #[test]
    fn test_price_notification_fields() {
        let alert = PriceAlert {
            id: "abc".into(),
            market: Market::Crypto,
            symbol: SmolStr::new("BTCUSDT"),
            condition: Condition::Above,
            threshold: 50_000.0,
            enabled: true,
            created_at: t(0),
            last_triggered: None,
        };

        let notification = price_notification(&alert, 50_500.0, t(0));
        let field = |name: &str| {
            notification
                .fields
                .iter()
                .find(|field| field.name == name)
                .map(|field| field.value.clone())
        };

        assert_eq!(notification.channel, Channel::Crypto);
        assert_eq!(notification.colour, colour::CRYPTO);
        assert_eq!(field("Current Price").as_deref(), Some("$50,500.00"));
        assert_eq!(field("Condition").as_deref(), Some("ABOVE"));
        assert_eq!(field("Price Change").as_deref(), Some("$500.0000 (+1.00%)"));
        assert_eq!(field("Time").as_deref(), Some("2024-01-01 00:00:00"));
    }
}
