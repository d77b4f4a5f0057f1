use crate::error::AlertError;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{str::FromStr, time::Duration};

/// Market a price alert is evaluated against.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    #[display("crypto")]
    Crypto,
    #[display("us_equity")]
    #[serde(alias = "us_stock")]
    UsEquity,
    #[display("kr_equity")]
    #[serde(alias = "kr_stock")]
    KrEquity,
}

impl Market {
    pub const ALL: [Market; 3] = [Market::Crypto, Market::UsEquity, Market::KrEquity];
}

impl FromStr for Market {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "crypto" => Ok(Market::Crypto),
            "us_equity" | "us_stock" | "us" => Ok(Market::UsEquity),
            "kr_equity" | "kr_stock" | "kr" => Ok(Market::KrEquity),
            other => Err(AlertError::InvalidInput(format!("unknown market: {other}"))),
        }
    }
}

/// Threshold comparison. Both directions are inclusive.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[display("above")]
    Above,
    #[display("below")]
    Below,
}

impl Condition {
    /// `Above` is met when `value >= threshold`, `Below` when `value <= threshold`.
    pub fn is_met(&self, value: f64, threshold: f64) -> bool {
        match self {
            Condition::Above => value >= threshold,
            Condition::Below => value <= threshold,
        }
    }
}

impl FromStr for Condition {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "above" | ">" | ">=" => Ok(Condition::Above),
            "below" | "<" | "<=" => Ok(Condition::Below),
            other => Err(AlertError::InvalidInput(format!("unknown condition: {other}"))),
        }
    }
}

/// Opaque unique alert identifier.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AlertId(pub SmolStr);

impl AlertId {
    pub fn random() -> Self {
        Self(SmolStr::new(uuid::Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for AlertId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

/// Determine if `last_triggered` is within `cooldown` of `now`.
///
/// A trigger timestamp in the future (clock adjustment) counts as within the cooldown.
pub fn in_cooldown(
    last_triggered: Option<DateTime<Utc>>,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_triggered else {
        return false;
    };

    match (now - last).to_std() {
        Ok(elapsed) => elapsed < cooldown,
        Err(_) => true,
    }
}

/// Exclusive reservation of a trigger, taken before a notification is sent.
///
/// A claim starts a new cooldown at `claimed_at`. If delivery fails, restoring the claim puts
/// the previous trigger time back, unless the entry was triggered again in the meantime.
#[derive(Clone, PartialEq, Debug)]
#[must_use = "a failed delivery must roll the claim back"]
pub struct Claim<K = AlertId> {
    pub key: K,
    pub claimed_at: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
}

impl<K> Claim<K> {
    /// Start a cooldown in `last_triggered` at `now`, if it is not already cooling down.
    pub fn acquire(
        key: K,
        last_triggered: &mut Option<DateTime<Utc>>,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if in_cooldown(*last_triggered, cooldown, now) {
            return None;
        }

        Some(Self {
            key,
            claimed_at: now,
            previous: last_triggered.replace(now),
        })
    }

    /// Put the previous trigger time back. Returns `false` if `last_triggered` moved on since.
    pub fn restore(self, last_triggered: &mut Option<DateTime<Utc>>) -> bool {
        if *last_triggered != Some(self.claimed_at) {
            return false;
        }
        *last_triggered = self.previous;
        true
    }
}
