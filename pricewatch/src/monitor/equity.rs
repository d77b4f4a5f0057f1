use super::PriceMonitor;
use crate::{model::Market, signal::StopSignal};
use chrono::{DateTime, Utc};
use pricewatch_data::QuoteProvider;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// Polls a [`QuoteProvider`] for every symbol with an enabled alert in one equity market.
///
/// Used for US equities (Yahoo chart quotes, 60s) and KR equities (KIS quotes, 5s).
pub struct EquityPoller {
    market: Market,
    quotes: Arc<dyn QuoteProvider>,
    monitor: Arc<PriceMonitor>,
    poll_interval: Duration,
}

impl std::fmt::Debug for EquityPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquityPoller")
            .field("market", &self.market)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl EquityPoller {
    pub fn new(
        market: Market,
        quotes: Arc<dyn QuoteProvider>,
        monitor: Arc<PriceMonitor>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            market,
            quotes,
            monitor,
            poll_interval,
        }
    }

    pub fn market(&self) -> Market {
        self.market
    }

    /// Fetch and evaluate one quote per alert symbol. Returns the number of alerts delivered.
    ///
    /// A failed quote skips that symbol for this cycle.
    pub async fn poll_once_at(&self, now: DateTime<Utc>) -> usize {
        let symbols = self.monitor.registry().symbols(self.market);
        if symbols.is_empty() {
            return 0;
        }
        debug!(market = %self.market, count = symbols.len(), "polling equity quotes");

        let mut delivered = 0;
        for symbol in symbols {
            match self.quotes.quote(&symbol).await {
                Ok(price) => {
                    delivered += self
                        .monitor
                        .evaluate_price_at(self.market, &symbol, price, now)
                        .await;
                }
                Err(error) if error.is_transient() => {
                    warn!(market = %self.market, %symbol, %error, "failed to fetch quote")
                }
                Err(error) => error!(market = %self.market, %symbol, %error, "quote rejected"),
            }
        }
        delivered
    }

    /// Run poll cycles until `stop` fires.
    pub async fn run(self: Arc<Self>, stop: StopSignal) {
        info!(market = %self.market, poll_interval = ?self.poll_interval, "equity poller started");

        while !stop.triggered() {
            self.poll_once_at(Utc::now()).await;

            if !stop.sleep(self.poll_interval).await {
                break;
            }
        }

        info!(market = %self.market, "equity poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RegistryConfig, model::Condition, notify::test_util::RecordingNotifier,
        registry::AlertRegistry,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use fnv::FnvHashMap;
    use parking_lot::Mutex;
    use pricewatch_data::DataError;

    /// Quotes from a fixed table. Unknown symbols fail.
    #[derive(Default)]
    struct FixedQuotes {
        prices: FnvHashMap<&'static str, f64>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QuoteProvider for FixedQuotes {
        async fn quote(&self, symbol: &str) -> Result<f64, DataError> {
            self.requests.lock().push(symbol.to_string());
            self.prices
                .get(symbol)
                .copied()
                .ok_or_else(|| DataError::Provider(format!("{symbol}: no quote")))
        }
    }

    #[tokio::test]
    async fn test_poll_once_evaluates_market_symbols() {
        let notifier = Arc::new(RecordingNotifier::new(true));
        let registry = Arc::new(AlertRegistry::new(RegistryConfig::default()));
        registry.add(Market::UsEquity, "AAPL", Condition::Above, 200.0).unwrap();
        registry.add(Market::UsEquity, "MSFT", Condition::Below, 300.0).unwrap();
        registry.add(Market::KrEquity, "005930", Condition::Above, 1.0).unwrap();

        let quotes = Arc::new(FixedQuotes {
            prices: FnvHashMap::from_iter([("AAPL", 210.0)]),
            ..Default::default()
        });
        let poller = EquityPoller::new(
            Market::UsEquity,
            quotes.clone(),
            Arc::new(PriceMonitor::new(registry, notifier.clone())),
            Duration::from_secs(60),
        );

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 14, 30, 0).unwrap();
        assert_eq!(poller.poll_once_at(now).await, 1);

        // MSFT quote failed, KR symbols belong to another poller
        let mut requests = quotes.requests.lock().clone();
        requests.sort();
        assert_eq!(requests, vec!["AAPL", "MSFT"]);
        assert_eq!(notifier.sent.lock()[0].channel, crate::notify::Channel::UsStock);
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let registry = Arc::new(AlertRegistry::new(RegistryConfig::default()));
        let poller = Arc::new(EquityPoller::new(
            Market::KrEquity,
            Arc::new(FixedQuotes::default()),
            Arc::new(PriceMonitor::new(registry, Arc::new(RecordingNotifier::new(true)))),
            Duration::from_secs(3_600),
        ));

        let stop = StopSignal::new();
        let task = tokio::spawn(Arc::clone(&poller).run(stop.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.trigger();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
