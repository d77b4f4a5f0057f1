use crate::{
    config::VolumeConfig,
    error::AlertError,
    model::Claim,
    notify::{Channel, Notification, Notifier, colour, format_price, format_volume},
    persist,
    signal::StopSignal,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use pricewatch_data::{CandleProvider, QuoteProvider, Timeframe, event::canonical_symbol};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Number of 1 minute candles in a 4 hour baseline candle.
pub const MINUTES_PER_BASELINE: f64 = 240.0;

pub const DEFAULT_THRESHOLD_PERCENT: f64 = 200.0;

/// Persisted volume detector settings.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct VolumeSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<SmolStr>,
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: f64,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

fn default_symbols() -> Vec<SmolStr> {
    vec![SmolStr::new_static("BTC"), SmolStr::new_static("ETH")]
}

fn default_threshold_percent() -> f64 {
    DEFAULT_THRESHOLD_PERCENT
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            symbols: default_symbols(),
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
            last_updated: Utc::now(),
        }
    }
}

/// Current volume as a percentage of the baseline. `None` for a non positive baseline.
pub fn spike_ratio(current: f64, baseline: f64) -> Option<f64> {
    (baseline > 0.0 && baseline.is_finite() && current.is_finite())
        .then(|| current / baseline * 100.0)
}

#[derive(Copy, Clone, PartialEq, Debug)]
struct Baseline {
    volume: f64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct VolumeState {
    baselines: FnvHashMap<SmolStr, Baseline>,
    last_alert: FnvHashMap<SmolStr, Option<DateTime<Utc>>>,
}

/// Detected volume spike.
#[derive(Clone, PartialEq, Debug)]
pub struct VolumeSpike {
    pub symbol: SmolStr,
    /// Mean volume of the baseline candles.
    pub baseline: f64,
    /// Latest 1 minute volume extrapolated to the baseline interval.
    pub current: f64,
    /// `current / baseline * 100`.
    pub ratio: f64,
    pub time: DateTime<Utc>,
}

impl VolumeSpike {
    pub fn notification(&self, price: Option<f64>) -> Notification {
        Notification::new(
            Channel::Volume,
            format!("Volume spike: {}/USDT", self.symbol),
        )
        .with_colour(colour::WARNING)
        .with_time(self.time)
        .with_field("Price", price.map(format_price).unwrap_or_else(|| "N/A".to_string()))
        .with_field(
            "4h Average",
            format!("{} {}", format_volume(self.baseline), self.symbol),
        )
        .with_field(
            "Current Estimate",
            format!("{} {}", format_volume(self.current), self.symbol),
        )
        .with_field("Increase", format!("{:.0}%", self.ratio))
        .with_field("Time", self.time.format("%H:%M:%S").to_string())
    }
}

/// Status snapshot for the command layer.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct VolumeStatus {
    pub enabled: bool,
    pub symbols: Vec<SmolStr>,
    pub threshold_percent: f64,
    pub baselines: Vec<(SmolStr, f64)>,
}

/// Compares the latest minute of volume against a rolling 4 hour baseline.
pub struct VolumeDetector {
    config: VolumeConfig,
    settings: Mutex<VolumeSettings>,
    state: Mutex<VolumeState>,
    candles: Arc<dyn CandleProvider>,
    quotes: Arc<dyn QuoteProvider>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for VolumeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDetector")
            .field("config", &self.config)
            .field("settings", &*self.settings.lock())
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl VolumeDetector {
    pub fn new(
        config: VolumeConfig,
        candles: Arc<dyn CandleProvider>,
        quotes: Arc<dyn QuoteProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let defaults = VolumeSettings {
            enabled: config.enabled,
            ..Default::default()
        };
        let settings = match config.path.as_deref().map(persist::load::<VolumeSettings>) {
            Some(Ok(Some(settings))) => {
                info!(enabled = settings.enabled, "loaded volume settings");
                settings
            }
            Some(Err(error)) => {
                error!(%error, "failed to load volume settings, using defaults");
                defaults
            }
            Some(Ok(None)) | None => defaults,
        };

        Self {
            config,
            settings: Mutex::new(settings),
            state: Mutex::new(VolumeState::default()),
            candles,
            quotes,
            notifier,
        }
    }

    pub fn settings(&self) -> VolumeSettings {
        self.settings.lock().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.lock().enabled
    }

    pub fn set_threshold(&self, percent: f64) -> Result<(), AlertError> {
        if !percent.is_finite() || percent <= 0.0 {
            return Err(AlertError::InvalidInput(format!(
                "volume threshold must be a positive percentage, got {percent}"
            )));
        }

        self.update(|settings| settings.threshold_percent = percent);
        info!(percent, "volume threshold updated");
        Ok(())
    }

    pub fn enable(&self) {
        self.update(|settings| settings.enabled = true);
        info!("volume alerts enabled");
    }

    pub fn disable(&self) {
        self.update(|settings| settings.enabled = false);
        info!("volume alerts disabled");
    }

    /// Start monitoring a base asset. Returns `false` if it is already monitored.
    pub fn add_symbol(&self, symbol: &str) -> Result<bool, AlertError> {
        let symbol = canonical_symbol(symbol);
        if symbol.is_empty() {
            return Err(AlertError::InvalidInput("symbol must not be empty".to_string()));
        }
        if self.settings.lock().symbols.contains(&symbol) {
            return Ok(false);
        }

        self.update(|settings| settings.symbols.push(symbol.clone()));
        info!(%symbol, "volume symbol added");
        Ok(true)
    }

    pub fn remove_symbol(&self, symbol: &str) -> bool {
        let symbol = canonical_symbol(symbol);
        if !self.settings.lock().symbols.contains(&symbol) {
            return false;
        }

        self.update(|settings| settings.symbols.retain(|existing| *existing != symbol));
        let mut state = self.state.lock();
        state.baselines.remove(&symbol);
        state.last_alert.remove(&symbol);

        info!(%symbol, "volume symbol removed");
        true
    }

    pub fn status(&self) -> VolumeStatus {
        let settings = self.settings();
        VolumeStatus {
            enabled: settings.enabled,
            symbols: settings.symbols,
            threshold_percent: settings.threshold_percent,
            baselines: self
                .state
                .lock()
                .baselines
                .iter()
                .map(|(symbol, baseline)| (symbol.clone(), baseline.volume))
                .sorted_by(|a, b| a.0.cmp(&b.0))
                .collect(),
        }
    }

    pub fn baseline(&self, symbol: &str) -> Option<f64> {
        self.state
            .lock()
            .baselines
            .get(symbol)
            .map(|baseline| baseline.volume)
    }

    pub fn update_baseline(&self, symbol: &str, volume: f64, now: DateTime<Utc>) {
        self.state.lock().baselines.insert(
            SmolStr::new(symbol),
            Baseline {
                volume,
                updated_at: now,
            },
        );
    }

    /// Compare `current` against the symbol's baseline and, if it is a spike outside the
    /// cooldown, claim the trigger at `now`.
    pub fn check_spike_at(
        &self,
        symbol: &str,
        current: f64,
        now: DateTime<Utc>,
    ) -> Option<(VolumeSpike, Claim<SmolStr>)> {
        let threshold = self.settings.lock().threshold_percent;
        let mut state = self.state.lock();

        let baseline = state.baselines.get(symbol)?.volume;
        let ratio = spike_ratio(current, baseline)?;
        if ratio < threshold {
            return None;
        }

        let symbol = SmolStr::new(symbol);
        let last_alert = state.last_alert.entry(symbol.clone()).or_default();
        let claim = Claim::acquire(symbol.clone(), last_alert, self.config.cooldown, now)?;

        Some((
            VolumeSpike {
                symbol,
                baseline,
                current,
                ratio,
                time: now,
            },
            claim,
        ))
    }

    /// Undo a spike claim after failed delivery.
    pub fn rollback(&self, claim: Claim<SmolStr>) -> bool {
        let mut state = self.state.lock();
        match state.last_alert.get_mut(&claim.key) {
            Some(last_alert) => claim.restore(last_alert),
            None => false,
        }
    }

    /// Recompute the baseline from the most recent 4 hour candles.
    pub async fn refresh_baseline(&self, symbol: &str, now: DateTime<Utc>) -> Result<f64, AlertError> {
        let candles = self
            .candles
            .candles(symbol, Timeframe::H4, self.config.baseline_candles)
            .await?;
        if candles.is_empty() {
            return Err(AlertError::InsufficientData {
                required: self.config.baseline_candles,
                actual: 0,
            });
        }

        let volume = candles.iter().map(|candle| candle.volume).sum::<f64>() / candles.len() as f64;
        self.update_baseline(symbol, volume, now);
        debug!(%symbol, volume, "volume baseline refreshed");
        Ok(volume)
    }

    /// Volume of the latest 1 minute candle extrapolated to 4 hours.
    pub async fn current_volume(&self, symbol: &str) -> Result<f64, AlertError> {
        let candles = self.candles.candles(symbol, Timeframe::M1, 1).await?;
        candles
            .last()
            .map(|candle| candle.volume * MINUTES_PER_BASELINE)
            .ok_or(AlertError::InsufficientData {
                required: 1,
                actual: 0,
            })
    }

    /// Check one symbol, delivering a notification on a spike. Returns `true` if delivered.
    pub async fn poll_symbol(&self, symbol: &str, now: DateTime<Utc>) -> Result<bool, AlertError> {
        if self.baseline_stale(symbol, now) {
            if let Err(error) = self.refresh_baseline(symbol, now).await {
                match self.baseline(symbol) {
                    Some(baseline) => {
                        warn!(%symbol, %error, baseline, "baseline refresh failed, keeping previous baseline");
                    }
                    None => return Err(error),
                }
            }
        }

        let current = self.current_volume(symbol).await?;
        let Some((spike, claim)) = self.check_spike_at(symbol, current, now) else {
            return Ok(false);
        };

        let price = match self.quotes.quote(symbol).await {
            Ok(price) => Some(price),
            Err(error) => {
                debug!(%symbol, %error, "failed to fetch price for volume alert");
                None
            }
        };

        info!(%symbol, ratio = spike.ratio, "volume spike detected");
        if self.notifier.send(spike.notification(price)).await {
            Ok(true)
        } else {
            warn!(%symbol, "volume alert delivery failed");
            self.rollback(claim);
            Ok(false)
        }
    }

    /// Poll every monitored symbol once. Returns the number of notifications delivered.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> usize {
        let settings = self.settings();
        if !settings.enabled {
            return 0;
        }

        let mut delivered = 0;
        for symbol in &settings.symbols {
            match self.poll_symbol(symbol, now).await {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(error) if error.is_insufficient_data() => {
                    debug!(%symbol, %error, "skipping volume check");
                }
                Err(error) if error.is_transient() => {
                    warn!(%symbol, %error, "volume check failed, retrying next cycle");
                }
                Err(error) => error!(%symbol, %error, "volume check failed"),
            }
        }
        delivered
    }

    /// Run poll cycles until `stop` fires.
    pub async fn run(self: Arc<Self>, stop: StopSignal) {
        info!(poll_interval = ?self.config.poll_interval, "volume detector started");

        while !stop.triggered() {
            self.run_cycle_at(Utc::now()).await;

            if !stop.sleep(self.config.poll_interval).await {
                break;
            }
        }

        info!("volume detector stopped");
    }

    /// Missing, or older than the baseline refresh interval.
    fn baseline_stale(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let refresh = chrono::Duration::from_std(self.config.baseline_refresh)
            .unwrap_or(chrono::Duration::MAX);

        self.state
            .lock()
            .baselines
            .get(symbol)
            .is_none_or(|baseline| now - baseline.updated_at >= refresh)
    }

    fn update<F>(&self, op: F)
    where
        F: FnOnce(&mut VolumeSettings),
    {
        let mut settings = self.settings.lock();
        op(&mut settings);
        settings.last_updated = Utc::now();

        if let Some(path) = &self.config.path {
            if let Err(error) = persist::save(path, &*settings) {
                error!(%error, "failed to persist volume settings");
            }
        }
    }
}
