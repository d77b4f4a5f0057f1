use crate::{
    config::{StreamConfig, WhaleConfig},
    error::AlertError,
    notify::{Channel, Notification, Notifier, colour, format_price, format_usd_compact},
    persist,
    signal::StopSignal,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use pricewatch_data::{
    ConnectionUnit, Connector, DataKind, EventCallback, ExchangeId, MarketEvent, Purpose,
    PublicTrade, SymbolSource, UnitHandle, UnitId,
    event::canonical_symbol,
    exchange::{
        binance::Binance,
        bybit::Bybit,
        okx::Okx,
        upbit::{KrwRate, Upbit},
    },
};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default BTC threshold, also used for any symbol without its own threshold.
pub const DEFAULT_THRESHOLD_BTC: f64 = 1_000_000.0;

pub const DEFAULT_THRESHOLD_ETH: f64 = 500_000.0;

/// Persisted whale detector settings.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct WhaleSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Monitored base assets.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<SmolStr>,
    /// USD threshold per base asset.
    #[serde(default = "default_thresholds")]
    pub thresholds: FnvHashMap<SmolStr, f64>,
    #[serde(default = "default_exchanges")]
    pub exchanges: FnvHashMap<ExchangeId, bool>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

fn default_symbols() -> Vec<SmolStr> {
    vec![SmolStr::new_static("BTC"), SmolStr::new_static("ETH")]
}

fn default_thresholds() -> FnvHashMap<SmolStr, f64> {
    FnvHashMap::from_iter([
        (SmolStr::new_static("BTC"), DEFAULT_THRESHOLD_BTC),
        (SmolStr::new_static("ETH"), DEFAULT_THRESHOLD_ETH),
    ])
}

fn default_exchanges() -> FnvHashMap<ExchangeId, bool> {
    ExchangeId::ALL.into_iter().map(|exchange| (exchange, true)).collect()
}

impl Default for WhaleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            symbols: default_symbols(),
            thresholds: default_thresholds(),
            exchanges: default_exchanges(),
            last_updated: Utc::now(),
        }
    }
}

impl WhaleSettings {
    pub fn threshold(&self, symbol: &str) -> f64 {
        self.thresholds
            .get(symbol)
            .copied()
            .unwrap_or(DEFAULT_THRESHOLD_BTC)
    }

    pub fn exchange_enabled(&self, exchange: ExchangeId) -> bool {
        self.exchanges.get(&exchange).copied().unwrap_or(true)
    }
}

/// Trade at or above its symbol's whale threshold.
#[derive(Clone, PartialEq, Debug)]
pub struct WhaleTrade {
    pub exchange: ExchangeId,
    pub symbol: SmolStr,
    pub time: DateTime<Utc>,
    pub trade: PublicTrade,
}

impl WhaleTrade {
    pub fn notification(&self) -> Notification {
        let (side, colour) = if self.trade.side.is_buy() {
            ("Buy", colour::SUCCESS)
        } else {
            ("Sell", colour::ERROR)
        };

        Notification::new(
            Channel::Whale,
            format!("Whale {} on {}", side.to_lowercase(), self.exchange),
        )
        .with_colour(colour)
        .with_time(self.time)
        .with_field("Market", format!("{}/USDT", self.symbol))
        .with_field("Side", side)
        .with_field("Value", format_usd_compact(self.trade.value_usd))
        .with_field("Quantity", format!("{:.4} {}", self.trade.quantity, self.symbol))
        .with_field("Price", format_price(self.trade.price))
        .with_field("Time", self.time.format("%H:%M:%S").to_string())
    }
}

/// Status snapshot for the command layer.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct WhaleStatus {
    pub enabled: bool,
    pub running: bool,
    pub symbols: Vec<SmolStr>,
    pub thresholds: Vec<(SmolStr, String)>,
    pub exchanges: Vec<(ExchangeId, bool)>,
    pub active_units: Vec<UnitId>,
}

/// Flags every public trade whose USD value meets its symbol's threshold.
///
/// No cooldown is applied: every qualifying trade notifies.
pub struct WhaleDetector {
    config: WhaleConfig,
    stream: StreamConfig,
    rate: KrwRate,
    settings: Mutex<WhaleSettings>,
    notifier: Arc<dyn Notifier>,
    /// `None` while stopped.
    units: Mutex<Option<Vec<UnitHandle>>>,
    trade_tx: mpsc::UnboundedSender<WhaleTrade>,
    trade_rx: Mutex<Option<mpsc::UnboundedReceiver<WhaleTrade>>>,
}

impl std::fmt::Debug for WhaleDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhaleDetector")
            .field("config", &self.config)
            .field("settings", &*self.settings.lock())
            .field("running", &self.is_running())
            .finish()
    }
}

impl WhaleDetector {
    pub fn new(
        config: WhaleConfig,
        stream: StreamConfig,
        rate: KrwRate,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let settings = match config.path.as_deref().map(persist::load::<WhaleSettings>) {
            Some(Ok(Some(settings))) => {
                info!(enabled = settings.enabled, "loaded whale settings");
                settings
            }
            Some(Err(error)) => {
                error!(%error, "failed to load whale settings, using defaults");
                WhaleSettings {
                    enabled: config.enabled,
                    ..Default::default()
                }
            }
            Some(Ok(None)) | None => WhaleSettings {
                enabled: config.enabled,
                ..Default::default()
            },
        };

        let (trade_tx, trade_rx) = mpsc::unbounded_channel();

        Self {
            config,
            stream,
            rate,
            settings: Mutex::new(settings),
            notifier,
            units: Mutex::new(None),
            trade_tx,
            trade_rx: Mutex::new(Some(trade_rx)),
        }
    }

    pub fn settings(&self) -> WhaleSettings {
        self.settings.lock().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.lock().enabled
    }

    pub fn threshold(&self, symbol: &str) -> f64 {
        self.settings.lock().threshold(&canonical_symbol(symbol))
    }

    pub fn set_threshold(&self, symbol: &str, threshold_usd: f64) -> Result<(), AlertError> {
        let symbol = canonical_symbol(symbol);
        if symbol.is_empty() {
            return Err(AlertError::InvalidInput("symbol must not be empty".to_string()));
        }
        if !threshold_usd.is_finite() || threshold_usd <= 0.0 {
            return Err(AlertError::InvalidInput(format!(
                "whale threshold must be positive, got {threshold_usd}"
            )));
        }

        self.update(|settings| {
            settings.thresholds.insert(symbol.clone(), threshold_usd);
        });
        info!(%symbol, threshold = %format_usd_compact(threshold_usd), "whale threshold updated");
        Ok(())
    }

    /// Enable or disable trades from one exchange.
    ///
    /// While the detector is running the exchange's trade unit is spawned or signalled to stop
    /// to match. Trades from a disabled exchange are discarded either way.
    pub fn toggle_exchange(self: &Arc<Self>, exchange: ExchangeId, enabled: bool) {
        self.update(|settings| {
            settings.exchanges.insert(exchange, enabled);
        });
        info!(%exchange, enabled, "whale exchange toggled");

        let mut guard = self.units.lock();
        let Some(units) = guard.as_mut() else {
            return;
        };

        let running = units.iter().any(|unit| unit.id().exchange == exchange);
        if enabled && !running {
            units.push(self.spawn_exchange(exchange));
        } else if !enabled && running {
            units.retain(|unit| {
                if unit.id().exchange != exchange {
                    return true;
                }
                // Exits on its own once the current read returns
                unit.stop();
                false
            });
        }
    }

    pub fn enable(&self) {
        self.update(|settings| settings.enabled = true);
        info!("whale detection enabled");
    }

    pub fn disable(&self) {
        self.update(|settings| settings.enabled = false);
        info!("whale detection disabled");
    }

    pub fn is_running(&self) -> bool {
        self.units.lock().is_some()
    }

    pub fn status(&self) -> WhaleStatus {
        let settings = self.settings.lock();

        WhaleStatus {
            enabled: settings.enabled,
            running: self.is_running(),
            symbols: settings.symbols.clone(),
            thresholds: settings
                .thresholds
                .iter()
                .map(|(symbol, threshold)| (symbol.clone(), format_usd_compact(*threshold)))
                .sorted()
                .collect(),
            exchanges: settings
                .exchanges
                .iter()
                .map(|(exchange, enabled)| (*exchange, *enabled))
                .sorted()
                .collect(),
            active_units: self
                .units
                .lock()
                .iter()
                .flatten()
                .map(UnitHandle::id)
                .collect(),
        }
    }

    /// Determine if a market event is a whale trade under the current settings.
    pub fn evaluate(&self, event: &MarketEvent) -> Option<WhaleTrade> {
        let DataKind::Trade(trade) = &event.kind else {
            return None;
        };

        let settings = self.settings.lock();
        if !settings.enabled
            || !settings.exchange_enabled(event.exchange)
            || !settings.symbols.contains(&event.symbol)
            || trade.value_usd < settings.threshold(&event.symbol)
        {
            return None;
        }

        Some(WhaleTrade {
            exchange: event.exchange,
            symbol: event.symbol.clone(),
            time: event.time_exchange,
            trade: trade.clone(),
        })
    }

    /// Spawn one trade stream unit per enabled exchange. Does nothing if already running.
    pub fn start(self: &Arc<Self>) {
        let settings = self.settings();
        let mut units = self.units.lock();
        if units.is_some() {
            return;
        }

        let started = ExchangeId::ALL
            .into_iter()
            .filter(|exchange| settings.exchange_enabled(*exchange))
            .map(|exchange| self.spawn_exchange(exchange))
            .collect::<Vec<_>>();

        info!(
            units = %started.iter().map(UnitHandle::id).join(", "),
            "whale detector started"
        );
        *units = Some(started);
    }

    /// Stop every trade stream unit and wait for it to exit.
    pub async fn stop(&self) {
        let units = self.units.lock().take().unwrap_or_default();
        futures::future::join_all(units.into_iter().map(UnitHandle::join)).await;
        info!("whale detector stopped");
    }

    /// Deliver queued whale trades until `stop` fires.
    pub async fn run_delivery(self: Arc<Self>, stop: StopSignal) {
        let Some(mut trade_rx) = self.trade_rx.lock().take() else {
            warn!("whale delivery worker already running");
            return;
        };

        loop {
            let trade = tokio::select! {
                trade = trade_rx.recv() => trade,
                _ = stop.wait() => None,
            };
            let Some(trade) = trade else {
                break;
            };

            if self.notifier.send(trade.notification()).await {
                info!(
                    exchange = %trade.exchange,
                    symbol = %trade.symbol,
                    value_usd = trade.trade.value_usd,
                    "whale alert delivered"
                );
            } else {
                warn!(exchange = %trade.exchange, symbol = %trade.symbol, "whale alert delivery failed");
            }
        }

        debug!("whale delivery worker stopped");
    }

    fn spawn_exchange(self: &Arc<Self>, exchange: ExchangeId) -> UnitHandle {
        match exchange {
            ExchangeId::Binance => self.spawn_unit(Binance::default()),
            ExchangeId::Okx => self.spawn_unit(Okx::default()),
            ExchangeId::Bybit => self.spawn_unit(Bybit::default()),
            ExchangeId::Upbit => self.spawn_unit(Upbit::new(self.rate.clone())),
        }
    }

    fn spawn_unit<C>(self: &Arc<Self>, connector: C) -> UnitHandle
    where
        C: Connector,
    {
        let symbols: Arc<dyn SymbolSource> = Arc::new({
            let detector = Arc::clone(self);
            move || detector.settings.lock().symbols.clone()
        });

        let callback: EventCallback = Arc::new({
            let detector = Arc::clone(self);
            move |event: MarketEvent| {
                if let Some(trade) = detector.evaluate(&event) {
                    if detector.trade_tx.send(trade).is_err() {
                        debug!("whale delivery worker gone, dropping trade");
                    }
                }
            }
        });

        ConnectionUnit::new(
            connector,
            Purpose::Trades,
            symbols,
            callback,
            self.stream.unit_config(),
        )
        .spawn()
    }

    fn update<F>(&self, op: F)
    where
        F: FnOnce(&mut WhaleSettings),
    {
        let mut settings = self.settings.lock();
        op(&mut settings);
        settings.last_updated = Utc::now();

        if let Some(path) = &self.config.path {
            if let Err(error) = persist::save(path, &*settings) {
                error!(%error, "failed to persist whale settings");
            }
        }
    }
}
