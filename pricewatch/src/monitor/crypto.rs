use super::PriceMonitor;
use crate::{config::StreamConfig, model::Market, signal::StopSignal};
use itertools::Itertools;
use parking_lot::Mutex;
use pricewatch_data::{
    ConnectionUnit, Connector, DataKind, EventCallback, ExchangeId, MarketEvent, Purpose,
    SymbolSource, UnitHandle,
    event::is_usdt_market,
    exchange::{
        binance::Binance,
        upbit::{KrwRate, Upbit},
    },
};
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of the tick queue between the ticker units and the evaluation worker.
pub const TICK_QUEUE_CAPACITY: usize = 1_024;

/// Ticker venue serving a crypto alert symbol.
///
/// USDT quoted alerts (`BTCUSDT`) stream from Binance, bare assets (`BTC`) from Upbit in KRW.
pub fn venue(symbol: &str) -> ExchangeId {
    if is_usdt_market(symbol) {
        ExchangeId::Binance
    } else {
        ExchangeId::Upbit
    }
}

#[derive(Clone, PartialEq, Debug)]
struct Tick {
    symbol: SmolStr,
    price: f64,
}

/// Streams crypto prices for every enabled crypto alert and feeds them to the [`PriceMonitor`].
///
/// One ticker unit per venue. The units read their symbol set from the registry on every
/// (re)connect; [`CryptoMonitor::resubscribe`] asks them to pick up changes immediately.
pub struct CryptoMonitor {
    monitor: Arc<PriceMonitor>,
    stream: StreamConfig,
    rate: KrwRate,
    units: Mutex<Vec<UnitHandle>>,
    tick_tx: mpsc::Sender<Tick>,
    tick_rx: Mutex<Option<mpsc::Receiver<Tick>>>,
}

impl std::fmt::Debug for CryptoMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoMonitor")
            .field("stream", &self.stream)
            .field("units", &*self.units.lock())
            .finish_non_exhaustive()
    }
}

impl CryptoMonitor {
    pub fn new(monitor: Arc<PriceMonitor>, stream: StreamConfig, rate: KrwRate) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel(TICK_QUEUE_CAPACITY);
        Self {
            monitor,
            stream,
            rate,
            units: Mutex::new(Vec::new()),
            tick_tx,
            tick_rx: Mutex::new(Some(tick_rx)),
        }
    }

    /// Enabled crypto alert symbols served by `exchange`.
    pub fn symbols(&self, exchange: ExchangeId) -> Vec<SmolStr> {
        self.monitor
            .registry()
            .symbols(Market::Crypto)
            .into_iter()
            .filter(|symbol| venue(symbol) == exchange)
            .collect()
    }

    /// Spawn the Binance and Upbit ticker units. Does nothing if already running.
    pub fn start(self: &Arc<Self>) {
        let mut units = self.units.lock();
        if !units.is_empty() {
            return;
        }

        units.push(self.spawn_unit(Binance::default()));
        units.push(self.spawn_unit(Upbit::new(self.rate.clone())));

        info!(
            units = %units.iter().map(UnitHandle::id).join(", "),
            "crypto monitor started"
        );
    }

    /// Ask every ticker unit to recompute its symbol set, eg/ after an alert was added.
    pub fn resubscribe(&self) {
        self.units.lock().iter().for_each(UnitHandle::resubscribe);
    }

    /// Stop every ticker unit and wait for it to exit.
    pub async fn stop(&self) {
        let units = std::mem::take(&mut *self.units.lock());
        futures::future::join_all(units.into_iter().map(UnitHandle::join)).await;
        info!("crypto monitor stopped");
    }

    /// Queue a ticker event for evaluation. Never blocks: a full queue drops the tick.
    pub fn enqueue(&self, event: MarketEvent) {
        let DataKind::Tick(tick) = event.kind else {
            return;
        };

        let tick = Tick {
            symbol: event.symbol,
            price: tick.price,
        };
        if let Err(error) = self.tick_tx.try_send(tick) {
            match error {
                mpsc::error::TrySendError::Full(tick) => {
                    debug!(symbol = %tick.symbol, "tick queue full, dropping tick")
                }
                mpsc::error::TrySendError::Closed(_) => debug!("tick worker gone, dropping tick"),
            }
        }
    }

    /// Evaluate queued ticks until `stop` fires.
    pub async fn run_worker(self: Arc<Self>, stop: StopSignal) {
        let Some(mut tick_rx) = self.tick_rx.lock().take() else {
            warn!("crypto tick worker already running");
            return;
        };

        loop {
            let tick = tokio::select! {
                tick = tick_rx.recv() => tick,
                _ = stop.wait() => None,
            };
            let Some(tick) = tick else {
                break;
            };

            self.monitor
                .evaluate_price(Market::Crypto, &tick.symbol, tick.price)
                .await;
        }

        debug!("crypto tick worker stopped");
    }

    fn spawn_unit<C>(self: &Arc<Self>, connector: C) -> UnitHandle
    where
        C: Connector,
    {
        let symbols: Arc<dyn SymbolSource> = Arc::new({
            let monitor = Arc::clone(self);
            move || monitor.symbols(C::ID)
        });

        let callback: EventCallback = Arc::new({
            let monitor = Arc::clone(self);
            move |event: MarketEvent| monitor.enqueue(event)
        });

        ConnectionUnit::new(
            connector,
            Purpose::Ticker,
            symbols,
            callback,
            self.stream.unit_config(),
        )
        .spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RegistryConfig, model::Condition, notify::test_util::RecordingNotifier,
        registry::AlertRegistry,
    };
    use chrono::Utc;
    use pricewatch_data::{PriceTick, PublicTrade, Side};
    use std::time::Duration;

    fn crypto_monitor(notifier: Arc<RecordingNotifier>) -> Arc<CryptoMonitor> {
        let registry = Arc::new(AlertRegistry::new(RegistryConfig::default()));
        Arc::new(CryptoMonitor::new(
            Arc::new(PriceMonitor::new(registry, notifier)),
            StreamConfig::default(),
            KrwRate::default(),
        ))
    }

    fn event(symbol: &str, kind: DataKind) -> MarketEvent {
        MarketEvent {
            time_exchange: Utc::now(),
            time_received: Utc::now(),
            exchange: ExchangeId::Binance,
            symbol: SmolStr::new(symbol),
            kind,
        }
    }

    #[test]
    fn test_venue() {
        struct TestCase {
            input: &'static str,
            expected: ExchangeId,
        }

        let tests = vec![
            // TC0: USDT quoted market
            TestCase {
                input: "BTCUSDT",
                expected: ExchangeId::Binance,
            },
            // TC1: bare asset is KRW quoted
            TestCase {
                input: "BTC",
                expected: ExchangeId::Upbit,
            },
            // TC2: the quote alone is not a market
            TestCase {
                input: "USDT",
                expected: ExchangeId::Upbit,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = venue(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_symbols_split_by_venue() {
        let monitor = crypto_monitor(Arc::new(RecordingNotifier::new(true)));
        let registry = monitor.monitor.registry();
        registry.add(Market::Crypto, "BTC/USDT", Condition::Above, 50_000.0).unwrap();
        registry.add(Market::Crypto, "ETH", Condition::Below, 3_000_000.0).unwrap();
        registry.add(Market::UsEquity, "AAPL", Condition::Above, 200.0).unwrap();

        assert_eq!(monitor.symbols(ExchangeId::Binance), vec!["BTCUSDT"]);
        assert_eq!(monitor.symbols(ExchangeId::Upbit), vec!["ETH"]);
    }

    #[test]
    fn test_full_queue_drops_ticks_without_blocking() {
        let monitor = crypto_monitor(Arc::new(RecordingNotifier::new(true)));

        // No worker draining the queue
        for price in 0..TICK_QUEUE_CAPACITY + 10 {
            monitor.enqueue(event(
                "BTCUSDT",
                DataKind::Tick(PriceTick {
                    price: price as f64,
                }),
            ));
        }
        assert_eq!(monitor.tick_tx.capacity(), 0);

        let mut tick_rx = monitor.tick_rx.lock().take().unwrap();
        let mut queued = Vec::new();
        while let Ok(tick) = tick_rx.try_recv() {
            queued.push(tick.price);
        }

        assert_eq!(queued.len(), TICK_QUEUE_CAPACITY);
        assert_eq!(queued.first(), Some(&0.0));
        assert_eq!(queued.last(), Some(&((TICK_QUEUE_CAPACITY - 1) as f64)));
    }

    #[tokio::test]
    async fn test_ticks_flow_through_worker() {
        let notifier = Arc::new(RecordingNotifier::new(true));
        let monitor = crypto_monitor(Arc::clone(&notifier));
        monitor
            .monitor
            .registry()
            .add(Market::Crypto, "BTCUSDT", Condition::Above, 50_000.0)
            .unwrap();

        let stop = StopSignal::new();
        let worker = tokio::spawn(Arc::clone(&monitor).run_worker(stop.clone()));

        // Trades are not price ticks
        monitor.enqueue(event(
            "BTC",
            DataKind::Trade(PublicTrade {
                id: SmolStr::new("1"),
                price: 60_000.0,
                quantity: 1.0,
                side: Side::Buy,
                value_usd: 60_000.0,
            }),
        ));
        monitor.enqueue(event("BTCUSDT", DataKind::Tick(PriceTick { price: 49_000.0 })));
        monitor.enqueue(event("BTCUSDT", DataKind::Tick(PriceTick { price: 50_100.0 })));

        for _ in 0..100 {
            if notifier.count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        stop.trigger();
        worker.await.unwrap();

        assert_eq!(notifier.count(), 1);
        assert_eq!(
            monitor.monitor.last_price(Market::Crypto, "BTCUSDT"),
            Some(50_100.0)
        );
    }
}
