use crate::{
    config::Config,
    error::AlertError,
    evaluator::IndicatorEvaluator,
    model::{Condition, Market},
    monitor::{PriceMonitor, crypto::CryptoMonitor, equity::EquityPoller},
    notify::Notifier,
    registry::{AlertRegistry, PriceAlert},
    signal::StopSignal,
    volume::VolumeDetector,
    whale::WhaleDetector,
};
use parking_lot::Mutex;
use pricewatch_data::{CandleProvider, QuoteProvider, exchange::upbit::KrwRate};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Market data collaborators used by the detectors.
#[derive(Clone)]
pub struct Providers {
    /// Crypto klines, used by the indicator evaluator and the volume detector.
    pub crypto_candles: Arc<dyn CandleProvider>,
    /// Crypto last price, used in volume spike notifications.
    pub crypto_quotes: Arc<dyn QuoteProvider>,
    /// Equity and index history for indicator alerts.
    pub index_candles: Arc<dyn CandleProvider>,
    pub us_quotes: Arc<dyn QuoteProvider>,
    /// `None` disables the KR equity poller, eg/ when broker credentials are missing.
    pub kr_quotes: Option<Arc<dyn QuoteProvider>>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("kr_quotes", &self.kr_quotes.is_some())
            .finish_non_exhaustive()
    }
}

/// Application context owning one instance of every monitor and detector.
///
/// Handed to the command layer, which operates on the components directly. [`AppContext::start`]
/// spawns every worker, [`AppContext::stop`] fires the shared [`StopSignal`], stops every
/// connection unit and waits for all workers to exit.
#[derive(Debug)]
pub struct AppContext {
    pub registry: Arc<AlertRegistry>,
    pub prices: Arc<PriceMonitor>,
    pub crypto: Arc<CryptoMonitor>,
    pub us_equity: Arc<EquityPoller>,
    pub kr_equity: Option<Arc<EquityPoller>>,
    pub evaluator: Arc<IndicatorEvaluator>,
    pub whale: Arc<WhaleDetector>,
    pub volume: Arc<VolumeDetector>,
    stop: StopSignal,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppContext {
    pub fn new(config: Config, providers: Providers, notifier: Arc<dyn Notifier>) -> Self {
        let rate = KrwRate::new(config.krw_per_usd);
        let registry = Arc::new(AlertRegistry::new(config.registry));
        let prices = Arc::new(PriceMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&notifier),
        ));

        let crypto = Arc::new(CryptoMonitor::new(
            Arc::clone(&prices),
            config.stream.clone(),
            rate.clone(),
        ));
        let us_equity = Arc::new(EquityPoller::new(
            Market::UsEquity,
            providers.us_quotes,
            Arc::clone(&prices),
            config.equity.us_poll_interval,
        ));
        let kr_equity = providers.kr_quotes.map(|quotes| {
            Arc::new(EquityPoller::new(
                Market::KrEquity,
                quotes,
                Arc::clone(&prices),
                config.equity.kr_poll_interval,
            ))
        });

        let evaluator = Arc::new(IndicatorEvaluator::new(
            config.evaluator,
            Arc::clone(&providers.crypto_candles),
            providers.index_candles,
            Arc::clone(&notifier),
        ));
        let whale = Arc::new(WhaleDetector::new(
            config.whale,
            config.stream,
            rate,
            Arc::clone(&notifier),
        ));
        let volume = Arc::new(VolumeDetector::new(
            config.volume,
            providers.crypto_candles,
            providers.crypto_quotes,
            notifier,
        ));

        Self {
            registry,
            prices,
            crypto,
            us_equity,
            kr_equity,
            evaluator,
            whale,
            volume,
            stop: StopSignal::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn every worker onto the tokio runtime. Does nothing if already started.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        self.crypto.start();
        tasks.push(tokio::spawn(
            Arc::clone(&self.crypto).run_worker(self.stop.clone()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.us_equity).run(self.stop.clone()),
        ));
        match &self.kr_equity {
            Some(poller) => tasks.push(tokio::spawn(Arc::clone(poller).run(self.stop.clone()))),
            None => warn!("KR equity monitor disabled: no KIS credentials configured"),
        }
        tasks.push(tokio::spawn(
            Arc::clone(&self.evaluator).run(self.stop.clone()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.whale).run_delivery(self.stop.clone()),
        ));
        if self.whale.is_enabled() {
            self.whale.start();
        }
        tasks.push(tokio::spawn(
            Arc::clone(&self.volume).run(self.stop.clone()),
        ));

        info!(workers = tasks.len(), "pricewatch started");
    }

    /// Register a price alert. New crypto symbols are subscribed immediately.
    pub fn add_price_alert(
        &self,
        market: Market,
        symbol: &str,
        condition: Condition,
        threshold: f64,
    ) -> Result<PriceAlert, AlertError> {
        let alert = self.registry.add(market, symbol, condition, threshold)?;
        if market == Market::Crypto {
            self.crypto.resubscribe();
        }
        Ok(alert)
    }

    pub fn remove_price_alert(&self, id: &str) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            self.crypto.resubscribe();
        }
        removed
    }

    /// Enable or disable whale detection, starting or stopping its trade stream units.
    pub async fn set_whale_enabled(&self, enabled: bool) {
        if enabled {
            self.whale.enable();
            if !self.stop.triggered() {
                self.whale.start();
            }
        } else {
            self.whale.disable();
            self.whale.stop().await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.triggered()
    }

    /// Stop every worker and connection unit, and wait for them to exit.
    pub async fn stop(&self) {
        info!("stopping pricewatch");
        self.stop.trigger();

        self.crypto.stop().await;
        self.whale.stop().await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(error) = result {
                error!(?error, "worker task failed");
            }
        }

        info!("pricewatch stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::test_util::RecordingNotifier;
    use async_trait::async_trait;
    use pricewatch_data::{Candle, DataError, Timeframe};
    use std::time::Duration;

    struct NoData;

    #[async_trait]
    impl CandleProvider for NoData {
        async fn candles(&self, _: &str, _: Timeframe, _: usize) -> Result<Vec<Candle>, DataError> {
            Ok(vec![])
        }
    }

    #[async_trait]
    impl QuoteProvider for NoData {
        async fn quote(&self, symbol: &str) -> Result<f64, DataError> {
            Err(DataError::Provider(format!("{symbol}: no quote")))
        }
    }

    fn context(kr_quotes: bool) -> AppContext {
        let data = Arc::new(NoData);
        let providers = Providers {
            crypto_candles: data.clone(),
            crypto_quotes: data.clone(),
            index_candles: data.clone(),
            us_quotes: data.clone(),
            kr_quotes: kr_quotes.then(|| data as Arc<dyn QuoteProvider>),
        };
        AppContext::new(
            Config::default(),
            providers,
            Arc::new(RecordingNotifier::new(true)),
        )
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        struct TestCase {
            kr_quotes: bool,
            expected_workers: usize,
        }

        let tests = vec![
            // TC0: every monitor
            TestCase {
                kr_quotes: true,
                expected_workers: 6,
            },
            // TC1: KR poller disabled without credentials
            TestCase {
                kr_quotes: false,
                expected_workers: 5,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let context = context(test.kr_quotes);
            context.start();
            context.start();
            assert_eq!(context.tasks.lock().len(), test.expected_workers, "TC{} failed", index);

            tokio::time::timeout(Duration::from_secs(5), context.stop())
                .await
                .unwrap();
            assert!(context.is_stopped());
            assert!(context.tasks.lock().is_empty());
        }
    }

    #[test]
    fn test_price_alerts_share_registry() {
        let context = context(false);
        let alert = context
            .add_price_alert(Market::UsEquity, "aapl", Condition::Above, 200.0)
            .unwrap();

        assert_eq!(context.prices.registry().get(alert.id.as_str()), Some(alert.clone()));
        assert!(context.remove_price_alert(alert.id.as_str()));
        assert_eq!(context.registry.stats().total, 0);
    }
}
