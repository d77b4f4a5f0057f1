use crate::{
    config::RegistryConfig,
    error::AlertError,
    model::{AlertId, Claim, Condition, Market, in_cooldown},
    persist,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use pricewatch_data::event::canonical_symbol;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::{error, info, warn};

/// User defined price threshold alert.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct PriceAlert {
    pub id: AlertId,
    pub market: Market,
    /// Canonical uppercase symbol.
    pub symbol: SmolStr,
    pub condition: Condition,
    #[serde(alias = "price")]
    pub threshold: f64,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
}

fn enabled_default() -> bool {
    true
}

impl PriceAlert {
    /// Enabled, condition met at `price`, and outside `cooldown` of its last trigger.
    pub fn should_trigger(
        &self,
        price: f64,
        cooldown: std::time::Duration,
        now: DateTime<Utc>,
    ) -> bool {
        self.enabled
            && !in_cooldown(self.last_triggered, cooldown, now)
            && self.condition.is_met(price, self.threshold)
    }
}

/// Optional filters applied by [`AlertRegistry::list`].
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct AlertFilter {
    pub market: Option<Market>,
    pub symbol: Option<SmolStr>,
    pub enabled: Option<bool>,
}

impl AlertFilter {
    pub fn market(market: Market) -> Self {
        Self {
            market: Some(market),
            ..Default::default()
        }
    }

    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(canonical_symbol(symbol));
        self
    }

    pub fn enabled_only(mut self) -> Self {
        self.enabled = Some(true);
        self
    }

    fn matches(&self, alert: &PriceAlert) -> bool {
        self.market.is_none_or(|market| market == alert.market)
            && self
                .symbol
                .as_ref()
                .is_none_or(|symbol| *symbol == alert.symbol)
            && self.enabled.is_none_or(|enabled| enabled == alert.enabled)
    }
}

/// Aggregate counts over every registered alert.
#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub by_market: FnvHashMap<Market, usize>,
}

/// Owns the [`PriceAlert`] collection and its persisted snapshot.
///
/// Every operation runs as a single critical section, including the snapshot write that
/// follows a mutation. Nothing is held across calls, so two evaluations racing between
/// [`AlertRegistry::match_triggers`] and [`AlertRegistry::mark_triggered`] may both observe an
/// alert as due. [`AlertRegistry::claim`] re-checks the cooldown atomically and is the
/// preferred trigger path.
#[derive(Debug)]
pub struct AlertRegistry {
    config: RegistryConfig,
    alerts: Mutex<Vec<PriceAlert>>,
}

impl AlertRegistry {
    /// Construct a registry, loading the existing snapshot if one is configured.
    ///
    /// An unreadable snapshot is logged and the registry starts empty.
    pub fn new(config: RegistryConfig) -> Self {
        let alerts = match config.path.as_deref().map(persist::load_snapshot) {
            Some(Ok(alerts)) => {
                info!(count = alerts.len(), "loaded price alerts");
                alerts
            }
            Some(Err(error)) => {
                error!(%error, "failed to load price alerts, starting empty");
                Vec::new()
            }
            None => Vec::new(),
        };

        Self {
            config,
            alerts: Mutex::new(alerts),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a new enabled alert.
    pub fn add(
        &self,
        market: Market,
        symbol: &str,
        condition: Condition,
        threshold: f64,
    ) -> Result<PriceAlert, AlertError> {
        let symbol = canonical_symbol(symbol);
        if symbol.is_empty() {
            return Err(AlertError::InvalidInput("symbol must not be empty".to_string()));
        }
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(AlertError::InvalidInput(format!(
                "threshold must be a non-negative number, got {threshold}"
            )));
        }

        let mut alerts = self.alerts.lock();

        let existing = alerts
            .iter()
            .filter(|alert| alert.market == market && alert.symbol == symbol)
            .count();
        if existing >= self.config.max_per_symbol {
            warn!(%market, %symbol, limit = self.config.max_per_symbol, "alert capacity reached");
            return Err(AlertError::Capacity {
                market,
                symbol,
                limit: self.config.max_per_symbol,
            });
        }

        let alert = PriceAlert {
            id: AlertId::random(),
            market,
            symbol,
            condition,
            threshold,
            enabled: true,
            created_at: Utc::now(),
            last_triggered: None,
        };
        alerts.push(alert.clone());
        self.persist(&alerts);

        info!(id = %alert.id, %market, symbol = %alert.symbol, %condition, threshold, "added price alert");
        Ok(alert)
    }

    /// Remove an alert by id.
    pub fn remove(&self, id: &str) -> bool {
        let mut alerts = self.alerts.lock();
        let before = alerts.len();
        alerts.retain(|alert| alert.id.as_str() != id);

        if alerts.len() == before {
            warn!(id, "price alert not found");
            return false;
        }

        self.persist(&alerts);
        info!(id, "removed price alert");
        true
    }

    pub fn get(&self, id: &str) -> Option<PriceAlert> {
        self.alerts
            .lock()
            .iter()
            .find(|alert| alert.id.as_str() == id)
            .cloned()
    }

    pub fn list(&self, filter: &AlertFilter) -> Vec<PriceAlert> {
        self.alerts
            .lock()
            .iter()
            .filter(|alert| filter.matches(alert))
            .cloned()
            .collect()
    }

    /// Distinct symbols of enabled alerts for a market.
    pub fn symbols(&self, market: Market) -> Vec<SmolStr> {
        self.alerts
            .lock()
            .iter()
            .filter(|alert| alert.enabled && alert.market == market)
            .map(|alert| alert.symbol.clone())
            .unique()
            .collect()
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        self.update(id, |alert| alert.enabled = enabled)
    }

    /// Start the cooldown of an alert at the current time.
    pub fn mark_triggered(&self, id: &str) -> bool {
        self.mark_triggered_at(id, Utc::now())
    }

    pub fn mark_triggered_at(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.update(id, |alert| alert.last_triggered = Some(now))
    }

    /// Alerts for `market` and `symbol` that fire at `price` now. Does not mark them.
    pub fn match_triggers(&self, market: Market, symbol: &str, price: f64) -> Vec<PriceAlert> {
        self.match_triggers_at(market, symbol, price, Utc::now())
    }

    pub fn match_triggers_at(
        &self,
        market: Market,
        symbol: &str,
        price: f64,
        now: DateTime<Utc>,
    ) -> Vec<PriceAlert> {
        let symbol = canonical_symbol(symbol);
        self.alerts
            .lock()
            .iter()
            .filter(|alert| alert.market == market && alert.symbol == symbol)
            .filter(|alert| alert.should_trigger(price, self.config.cooldown, now))
            .cloned()
            .collect()
    }

    /// Atomically re-check the cooldown of an alert and, if it is due, start a new cooldown at
    /// `now`. Returns `None` if the alert is missing, disabled or still cooling down.
    pub fn claim(&self, id: &AlertId, now: DateTime<Utc>) -> Option<Claim> {
        let mut alerts = self.alerts.lock();
        let alert = alerts
            .iter_mut()
            .find(|alert| alert.id == *id)
            .filter(|alert| alert.enabled)?;

        let claim = Claim::acquire(id.clone(), &mut alert.last_triggered, self.config.cooldown, now)?;
        self.persist(&alerts);
        Some(claim)
    }

    /// Undo a [`Claim`] after failed delivery, unless the alert was triggered again since.
    pub fn rollback(&self, claim: Claim) -> bool {
        let mut alerts = self.alerts.lock();
        let Some(alert) = alerts.iter_mut().find(|alert| alert.id == claim.key) else {
            return false;
        };
        if !claim.restore(&mut alert.last_triggered) {
            return false;
        }

        self.persist(&alerts);
        true
    }

    pub fn stats(&self) -> RegistryStats {
        let alerts = self.alerts.lock();
        let enabled = alerts.iter().filter(|alert| alert.enabled).count();

        RegistryStats {
            total: alerts.len(),
            enabled,
            disabled: alerts.len() - enabled,
            by_market: alerts.iter().map(|alert| alert.market).counts().into_iter().collect(),
        }
    }

    fn update<F>(&self, id: &str, op: F) -> bool
    where
        F: FnOnce(&mut PriceAlert),
    {
        let mut alerts = self.alerts.lock();
        let Some(alert) = alerts.iter_mut().find(|alert| alert.id.as_str() == id) else {
            warn!(id, "price alert not found");
            return false;
        };

        op(alert);
        self.persist(&alerts);
        true
    }

    /// Overwrite the snapshot. Failures are logged; memory stays authoritative.
    fn persist(&self, alerts: &[PriceAlert]) {
        if let Some(path) = &self.config.path {
            if let Err(error) = persist::save_snapshot(path, alerts) {
                error!(%error, "failed to persist price alerts");
            }
        }
    }
}
