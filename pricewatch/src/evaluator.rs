use crate::{
    cache::CandleCache,
    config::EvaluatorConfig,
    error::AlertError,
    indicator::{
        DEFAULT_RSI_PERIOD, DivergenceConfig, DivergenceResult, RsiStatus, compute_rsi,
        detect_divergence, rsi,
    },
    model::{AlertId, Claim, Condition, in_cooldown},
    notify::{Channel, Notification, Notifier, colour, format_price},
    persist,
    signal::StopSignal,
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use parking_lot::Mutex;
use pricewatch_data::{Candle, CandleProvider, Timeframe, event::canonical_symbol};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Market an indicator alert reads candles from.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorMarket {
    /// Crypto spot klines, quoted in USDT.
    #[display("crypto")]
    Crypto,
    /// Equity indices and ETFs.
    #[display("index")]
    Index,
}

/// Condition an indicator alert fires on.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(tag = "indicator", rename_all = "snake_case")]
pub enum IndicatorKind {
    /// Latest RSI compared against a level in `[0, 100]`.
    #[serde(rename = "rsi", alias = "rsi_level")]
    RsiLevel { condition: Condition, threshold: f64 },
    /// Any RSI/price divergence.
    Divergence,
}

/// User defined technical indicator alert.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct IndicatorAlert {
    pub id: AlertId,
    pub symbol: SmolStr,
    pub market: IndicatorMarket,
    #[serde(flatten)]
    pub kind: IndicatorKind,
    pub timeframe: Timeframe,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Result of a direct RSI query.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct RsiSnapshot {
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
    pub rsi: f64,
    pub status: RsiStatus,
    pub price: f64,
    pub divergence: Option<DivergenceResult>,
}

/// Periodically evaluates [`IndicatorAlert`]s against fresh candles.
pub struct IndicatorEvaluator {
    config: EvaluatorConfig,
    divergence: DivergenceConfig,
    alerts: Mutex<Vec<IndicatorAlert>>,
    cache: CandleCache<IndicatorMarket>,
    crypto: Arc<dyn CandleProvider>,
    index: Arc<dyn CandleProvider>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for IndicatorEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorEvaluator")
            .field("config", &self.config)
            .field("alerts", &self.alerts.lock().len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl IndicatorEvaluator {
    pub fn new(
        config: EvaluatorConfig,
        crypto: Arc<dyn CandleProvider>,
        index: Arc<dyn CandleProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let alerts = match config.path.as_deref().map(persist::load_snapshot) {
            Some(Ok(alerts)) => {
                info!(count = alerts.len(), "loaded indicator alerts");
                alerts
            }
            Some(Err(error)) => {
                error!(%error, "failed to load indicator alerts, starting empty");
                Vec::new()
            }
            None => Vec::new(),
        };

        Self {
            config,
            divergence: DivergenceConfig::default(),
            alerts: Mutex::new(alerts),
            cache: CandleCache::default(),
            crypto,
            index,
            notifier,
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn add(
        &self,
        symbol: &str,
        market: IndicatorMarket,
        kind: IndicatorKind,
        timeframe: Timeframe,
    ) -> Result<IndicatorAlert, AlertError> {
        let symbol = canonical_symbol(symbol);
        if symbol.is_empty() {
            return Err(AlertError::InvalidInput("symbol must not be empty".to_string()));
        }
        if let IndicatorKind::RsiLevel { threshold, .. } = kind {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(AlertError::InvalidInput(format!(
                    "RSI threshold must be within 0 and 100, got {threshold}"
                )));
            }
        }

        let alert = IndicatorAlert {
            id: AlertId::random(),
            symbol,
            market,
            kind,
            timeframe,
            enabled: true,
            created_at: Utc::now(),
            last_triggered: None,
        };

        let mut alerts = self.alerts.lock();
        alerts.push(alert.clone());
        self.persist(&alerts);

        info!(id = %alert.id, symbol = %alert.symbol, %market, %timeframe, ?kind, "added indicator alert");
        Ok(alert)
    }

    /// Remove an alert by full id or unique id prefix.
    pub fn remove(&self, id_or_prefix: &str) -> Result<IndicatorAlert, AlertError> {
        let id_or_prefix = id_or_prefix.trim();
        if id_or_prefix.is_empty() {
            return Err(AlertError::InvalidInput("alert id must not be empty".to_string()));
        }

        let mut alerts = self.alerts.lock();
        let position = match alerts
            .iter()
            .position(|alert| alert.id.as_str() == id_or_prefix)
        {
            Some(position) => position,
            None => {
                let mut matches = alerts
                    .iter()
                    .enumerate()
                    .filter(|(_, alert)| alert.id.as_str().starts_with(id_or_prefix));

                match (matches.next(), matches.next()) {
                    (Some((position, _)), None) => position,
                    (None, _) => return Err(AlertError::NotFound(id_or_prefix.to_string())),
                    (Some(_), Some(_)) => {
                        return Err(AlertError::InvalidInput(format!(
                            "alert id prefix {id_or_prefix} is ambiguous"
                        )));
                    }
                }
            }
        };

        let alert = alerts.remove(position);
        self.persist(&alerts);

        info!(id = %alert.id, "removed indicator alert");
        Ok(alert)
    }

    pub fn list(&self) -> Vec<IndicatorAlert> {
        self.alerts.lock().clone()
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut alerts = self.alerts.lock();
        let Some(alert) = alerts.iter_mut().find(|alert| alert.id.as_str() == id) else {
            return false;
        };

        alert.enabled = enabled;
        self.persist(&alerts);
        true
    }

    /// Latest RSI, its status, the last close and any divergence for a symbol.
    pub async fn current_rsi(
        &self,
        symbol: &str,
        market: IndicatorMarket,
        timeframe: Timeframe,
    ) -> Result<RsiSnapshot, AlertError> {
        let symbol = canonical_symbol(symbol);
        let candles = self.candles(&symbol, market, timeframe, Utc::now()).await?;
        require_bars(&candles, self.config.min_query_bars)?;

        let closes = closes(&candles);
        let rsi = compute_rsi(&closes, DEFAULT_RSI_PERIOD);
        let (Some(current), Some(price)) = (rsi::latest(&rsi), closes.last().copied()) else {
            return Err(AlertError::InsufficientData {
                required: DEFAULT_RSI_PERIOD + 1,
                actual: closes.len(),
            });
        };

        Ok(RsiSnapshot {
            symbol,
            timeframe,
            rsi: current,
            status: RsiStatus::from_value(current),
            price,
            divergence: detect_divergence(&closes, &rsi, &self.divergence),
        })
    }

    /// Evaluate every enabled alert outside its cooldown once. Returns the number of
    /// notifications delivered.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> usize {
        let due = self
            .alerts
            .lock()
            .iter()
            .filter(|alert| alert.enabled)
            .filter(|alert| !in_cooldown(alert.last_triggered, self.config.cooldown, now))
            .cloned()
            .collect::<Vec<_>>();

        let mut delivered = 0;
        for alert in due {
            let notification = match self.evaluate(&alert, now).await {
                Ok(Some(notification)) => notification,
                Ok(None) => continue,
                Err(error) if error.is_insufficient_data() => {
                    debug!(id = %alert.id, symbol = %alert.symbol, %error, "skipping indicator alert");
                    continue;
                }
                Err(error) if error.is_transient() => {
                    warn!(id = %alert.id, symbol = %alert.symbol, %error, "failed to evaluate indicator alert, retrying next cycle");
                    continue;
                }
                Err(error) => {
                    error!(id = %alert.id, symbol = %alert.symbol, %error, "failed to evaluate indicator alert");
                    continue;
                }
            };

            let Some(claim) = self.claim(&alert.id, now) else {
                continue;
            };

            if self.notifier.send(notification).await {
                info!(id = %alert.id, symbol = %alert.symbol, "indicator alert delivered");
                delivered += 1;
            } else {
                warn!(id = %alert.id, symbol = %alert.symbol, "indicator alert delivery failed");
                self.rollback(claim);
            }
        }

        delivered
    }

    /// Run evaluation cycles every poll interval until `stop` fires.
    pub async fn run(self: Arc<Self>, stop: StopSignal) {
        info!(poll_interval = ?self.config.poll_interval, "indicator evaluator started");

        while !stop.triggered() {
            let now = Utc::now();
            let delivered = self.run_cycle_at(now).await;
            self.cache.purge(now);
            debug!(delivered, "indicator evaluation cycle complete");

            if !stop.sleep(self.config.poll_interval).await {
                break;
            }
        }

        info!("indicator evaluator stopped");
    }

    /// Notification for `alert` if it fires on the current candles.
    async fn evaluate(
        &self,
        alert: &IndicatorAlert,
        now: DateTime<Utc>,
    ) -> Result<Option<Notification>, AlertError> {
        let candles = self
            .candles(&alert.symbol, alert.market, alert.timeframe, now)
            .await?;
        require_bars(&candles, self.config.min_bars)?;

        let closes = closes(&candles);
        let rsi = compute_rsi(&closes, DEFAULT_RSI_PERIOD);
        let (Some(current), Some(price)) = (rsi::latest(&rsi), closes.last().copied()) else {
            return Ok(None);
        };

        let notification = match alert.kind {
            IndicatorKind::RsiLevel {
                condition,
                threshold,
            } => condition
                .is_met(current, threshold)
                .then(|| rsi_level_notification(alert, condition, threshold, current, price)),
            IndicatorKind::Divergence => detect_divergence(&closes, &rsi, &self.divergence)
                .map(|divergence| divergence_notification(alert, &divergence, current, price)),
        };

        Ok(notification.map(|notification| notification.with_time(now)))
    }

    async fn candles(
        &self,
        symbol: &str,
        market: IndicatorMarket,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<Arc<Vec<Candle>>, AlertError> {
        if let Some(candles) = self.cache.get(symbol, market, timeframe, now) {
            return Ok(candles);
        }

        let provider = match market {
            IndicatorMarket::Crypto => &self.crypto,
            IndicatorMarket::Index => &self.index,
        };
        let candles = provider
            .candles(symbol, timeframe, self.config.fetch_limit)
            .await?;

        if candles.is_empty() {
            return Ok(Arc::new(candles));
        }
        Ok(self.cache.insert(symbol, market, timeframe, candles, now))
    }

    fn claim(&self, id: &AlertId, now: DateTime<Utc>) -> Option<Claim> {
        let mut alerts = self.alerts.lock();
        let alert = alerts
            .iter_mut()
            .find(|alert| alert.id == *id)
            .filter(|alert| alert.enabled)?;

        let claim = Claim::acquire(id.clone(), &mut alert.last_triggered, self.config.cooldown, now)?;
        self.persist(&alerts);
        Some(claim)
    }

    fn rollback(&self, claim: Claim) {
        let mut alerts = self.alerts.lock();
        if let Some(alert) = alerts.iter_mut().find(|alert| alert.id == claim.key) {
            if claim.restore(&mut alert.last_triggered) {
                self.persist(&alerts);
            }
        }
    }

    fn persist(&self, alerts: &[IndicatorAlert]) {
        if let Some(path) = &self.config.path {
            if let Err(error) = persist::save_snapshot(path, alerts) {
                error!(%error, "failed to persist indicator alerts");
            }
        }
    }
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|candle| candle.close).collect()
}

fn require_bars(candles: &[Candle], required: usize) -> Result<(), AlertError> {
    if candles.len() < required {
        return Err(AlertError::InsufficientData {
            required,
            actual: candles.len(),
        });
    }
    Ok(())
}

fn rsi_level_notification(
    alert: &IndicatorAlert,
    condition: Condition,
    threshold: f64,
    rsi: f64,
    price: f64,
) -> Notification {
    Notification::new(
        Channel::System,
        format!("RSI alert: {} ({})", alert.symbol, alert.timeframe),
    )
    .with_colour(colour::WARNING)
    .with_field("Symbol", alert.symbol.as_str())
    .with_field("Timeframe", alert.timeframe.as_str())
    .with_field("RSI", format!("{rsi:.1} ({})", RsiStatus::from_value(rsi)))
    .with_field("Condition", format!("RSI {condition} {threshold}"))
    .with_field("Price", format_price(price))
}

fn divergence_notification(
    alert: &IndicatorAlert,
    divergence: &DivergenceResult,
    rsi: f64,
    price: f64,
) -> Notification {
    Notification::new(
        Channel::System,
        format!("Divergence detected: {} ({})", alert.symbol, alert.timeframe),
    )
    .with_description("Divergence can signal a trend change. Confirm with other indicators.")
    .with_colour(colour::WARNING)
    .with_field("Symbol", alert.symbol.as_str())
    .with_field("Timeframe", alert.timeframe.as_str())
    .with_field("Type", divergence.kind.to_string())
    .with_field("Strength", format!("{:.0}%", divergence.strength * 100.0))
    .with_field("RSI", format!("{rsi:.1}"))
    .with_field("Price", format_price(price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::test_util::RecordingNotifier;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pricewatch_data::DataError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a fixed close series and counts fetches.
    struct FixedCandles {
        closes: Vec<f64>,
        fetches: AtomicUsize,
    }

    impl FixedCandles {
        fn new(closes: Vec<f64>) -> Arc<Self> {
            Arc::new(Self {
                closes,
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CandleProvider for FixedCandles {
        async fn candles(
            &self,
            _: &str,
            timeframe: Timeframe,
            limit: usize,
        ) -> Result<Vec<Candle>, DataError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let step = chrono::Duration::from_std(timeframe.duration()).unwrap();

            let skip = self.closes.len().saturating_sub(limit);
            Ok(self
                .closes
                .iter()
                .skip(skip)
                .enumerate()
                .map(|(i, close)| Candle {
                    time: start + step * i as i32,
                    open: *close,
                    high: *close,
                    low: *close,
                    close: *close,
                    volume: 1.0,
                })
                .collect())
        }
    }

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds)
    }

    fn rising(len: usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 + i as f64).collect()
    }

    fn evaluator(
        crypto: Arc<FixedCandles>,
        notifier: Arc<RecordingNotifier>,
    ) -> IndicatorEvaluator {
        IndicatorEvaluator::new(
            EvaluatorConfig::default(),
            crypto,
            FixedCandles::new(Vec::new()),
            notifier,
        )
    }

    fn rsi_above(threshold: f64) -> IndicatorKind {
        IndicatorKind::RsiLevel {
            condition: Condition::Above,
            threshold,
        }
    }

    #[tokio::test]
    async fn test_rsi_level_alert_fires_once_per_cooldown() {
        let notifier = Arc::new(RecordingNotifier::new(true));
        let evaluator = evaluator(FixedCandles::new(rising(100)), Arc::clone(&notifier));
        let alert = evaluator
            .add("btc", IndicatorMarket::Crypto, rsi_above(70.0), Timeframe::H1)
            .unwrap();

        assert_eq!(evaluator.run_cycle_at(t(0)).await, 1);
        assert_eq!(evaluator.run_cycle_at(t(60)).await, 0);
        assert_eq!(evaluator.run_cycle_at(t(3_600)).await, 1);

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].channel, Channel::System);
        assert_eq!(sent[0].colour, colour::WARNING);
        assert_eq!(sent[0].title, "RSI alert: BTC (1h)");
        drop(sent);

        assert_eq!(
            evaluator.list()[0].last_triggered,
            Some(t(3_600)),
            "alert {} cooldown not recorded",
            alert.id
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_rolls_back_claim() {
        let notifier = Arc::new(RecordingNotifier::new(false));
        let evaluator = evaluator(FixedCandles::new(rising(100)), Arc::clone(&notifier));
        evaluator
            .add("ETH", IndicatorMarket::Crypto, rsi_above(70.0), Timeframe::H4)
            .unwrap();

        assert_eq!(evaluator.run_cycle_at(t(0)).await, 0);
        assert_eq!(evaluator.list()[0].last_triggered, None);

        notifier.set_succeed(true);
        assert_eq!(evaluator.run_cycle_at(t(1)).await, 1);
        assert_eq!(notifier.count(), 2);
    }

    #[tokio::test]
    async fn test_insufficient_bars_skips_alert() {
        let notifier = Arc::new(RecordingNotifier::new(true));
        let evaluator = evaluator(FixedCandles::new(rising(49)), Arc::clone(&notifier));
        evaluator
            .add("SOL", IndicatorMarket::Crypto, rsi_above(0.0), Timeframe::H1)
            .unwrap();

        assert_eq!(evaluator.run_cycle_at(t(0)).await, 0);
        assert_eq!(notifier.count(), 0);
        assert_eq!(evaluator.list()[0].last_triggered, None);
    }

    #[tokio::test]
    async fn test_candles_are_cached_for_half_timeframe() {
        let notifier = Arc::new(RecordingNotifier::new(true));
        let crypto = FixedCandles::new(rising(100));
        let evaluator = evaluator(Arc::clone(&crypto), notifier);
        evaluator
            .add("BTC", IndicatorMarket::Crypto, IndicatorKind::Divergence, Timeframe::H1)
            .unwrap();

        evaluator.run_cycle_at(t(0)).await;
        evaluator.run_cycle_at(t(1_799)).await;
        assert_eq!(crypto.fetches.load(Ordering::SeqCst), 1);

        evaluator.run_cycle_at(t(1_800)).await;
        assert_eq!(crypto.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_current_rsi() {
        let notifier = Arc::new(RecordingNotifier::new(true));
        let evaluator = evaluator(FixedCandles::new(rising(30)), notifier);

        let actual = evaluator
            .current_rsi("btc", IndicatorMarket::Crypto, Timeframe::D1)
            .await
            .unwrap();
        assert_eq!(actual.symbol, "BTC");
        assert_eq!(actual.rsi, 100.0);
        assert_eq!(actual.status, RsiStatus::Overbought);
        assert_eq!(actual.price, 129.0);

        let short = IndicatorEvaluator::new(
            EvaluatorConfig::default(),
            FixedCandles::new(rising(19)),
            FixedCandles::new(Vec::new()),
            Arc::new(RecordingNotifier::new(true)),
        );
        let actual = short
            .current_rsi("btc", IndicatorMarket::Crypto, Timeframe::D1)
            .await;
        assert_eq!(
            actual,
            Err(AlertError::InsufficientData {
                required: 20,
                actual: 19
            })
        );
    }

    #[test]
    fn test_add_rejects_out_of_range_threshold() {
        let evaluator = evaluator(
            FixedCandles::new(Vec::new()),
            Arc::new(RecordingNotifier::new(true)),
        );
        assert!(matches!(
            evaluator.add("BTC", IndicatorMarket::Crypto, rsi_above(101.0), Timeframe::H1),
            Err(AlertError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_remove_by_prefix() {
        let evaluator = evaluator(
            FixedCandles::new(Vec::new()),
            Arc::new(RecordingNotifier::new(true)),
        );
        let first = evaluator
            .add("BTC", IndicatorMarket::Crypto, IndicatorKind::Divergence, Timeframe::H4)
            .unwrap();
        evaluator
            .add("SPX", IndicatorMarket::Index, IndicatorKind::Divergence, Timeframe::D1)
            .unwrap();

        assert!(matches!(evaluator.remove("zzz"), Err(AlertError::NotFound(_))));
        assert!(matches!(evaluator.remove(""), Err(AlertError::InvalidInput(_))));

        let removed = evaluator.remove(&first.id.as_str()[..8]).unwrap();
        assert_eq!(removed.id, first.id);
        assert_eq!(evaluator.list().len(), 1);
    }

    #[test]
    fn test_indicator_alert_serde() {
        let json = r#"{
            "id": "abc",
            "symbol": "BTC",
            "market": "crypto",
            "indicator": "rsi",
            "condition": "below",
            "threshold": 30.0,
            "timeframe": "4h",
            "enabled": true,
            "created_at": "2024-01-01T00:00:00Z",
            "last_triggered": null
        }"#;

        let alert = serde_json::from_str::<IndicatorAlert>(json).unwrap();
        assert_eq!(
            alert.kind,
            IndicatorKind::RsiLevel {
                condition: Condition::Below,
                threshold: 30.0
            }
        );
        assert_eq!(alert.timeframe, Timeframe::H4);

        let divergence = serde_json::to_value(IndicatorAlert {
            kind: IndicatorKind::Divergence,
            ..alert
        })
        .unwrap();
        assert_eq!(divergence["indicator"], "divergence");
    }

    #[tokio::test]
    async fn test_indicator_alerts_persist() {
        let path = persist::temp_path("indicator");
        let config = EvaluatorConfig::default().with_path(&path);

        let added = {
            let evaluator = IndicatorEvaluator::new(
                config.clone(),
                FixedCandles::new(Vec::new()),
                FixedCandles::new(Vec::new()),
                Arc::new(RecordingNotifier::new(true)),
            );
            evaluator
                .add("NASDAQ", IndicatorMarket::Index, rsi_above(65.0), Timeframe::D1)
                .unwrap()
        };

        let reloaded = IndicatorEvaluator::new(
            config,
            FixedCandles::new(Vec::new()),
            FixedCandles::new(Vec::new()),
            Arc::new(RecordingNotifier::new(true)),
        );
        assert_eq!(reloaded.list(), vec![added]);

        let _ = std::fs::remove_file(path);
    }
}
