//! Relative Strength Index with Wilder's smoothing.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Default RSI lookback period.
pub const DEFAULT_RSI_PERIOD: usize = 14;

/// Compute the RSI of `closes`, one entry per input bar.
///
/// The first `period` entries are `None`. Entry `period` is seeded from the simple mean of
/// the first `period` gains and losses, every later entry applies Wilder's smoothing
/// `avg = (avg * (period - 1) + x) / period`.
///
/// Returns an empty Vec if `closes.len() <= period` or `period == 0`.
pub fn compute_rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let deltas = closes
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect::<Vec<_>>();

    let n = period as f64;
    let (seed_gain, seed_loss) = deltas[..period]
        .iter()
        .fold((0.0, 0.0), |(gain, loss), delta| {
            (gain + delta.max(0.0), loss + (-delta).max(0.0))
        });
    let mut avg_gain = seed_gain / n;
    let mut avg_loss = seed_loss / n;

    let mut rsi = vec![None; period];
    rsi.reserve(closes.len() - period);
    rsi.push(Some(rsi_value(avg_gain, avg_loss)));

    for delta in &deltas[period..] {
        avg_gain = (avg_gain * (n - 1.0) + delta.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-delta).max(0.0)) / n;
        rsi.push(Some(rsi_value(avg_gain, avg_loss)));
    }

    rsi
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Most recent defined value of an RSI series.
pub fn latest(rsi: &[Option<f64>]) -> Option<f64> {
    rsi.iter().rev().find_map(|value| *value)
}

/// Coarse interpretation of an RSI reading.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RsiStatus {
    #[display("overbought")]
    Overbought,
    #[display("bullish lean")]
    BullishLean,
    #[display("neutral")]
    Neutral,
    #[display("bearish lean")]
    BearishLean,
    #[display("oversold")]
    Oversold,
}

impl RsiStatus {
    pub fn from_value(rsi: f64) -> Self {
        match rsi {
            value if value >= 70.0 => RsiStatus::Overbought,
            value if value >= 60.0 => RsiStatus::BullishLean,
            value if value >= 40.0 => RsiStatus::Neutral,
            value if value >= 30.0 => RsiStatus::BearishLean,
            _ => RsiStatus::Oversold,
        }
    }
}
