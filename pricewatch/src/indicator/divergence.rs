use super::extrema::{find_peaks, find_troughs};
use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};

/// Divergence classification between price and RSI extrema.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// Price lower low, RSI higher low.
    #[display("bullish_regular")]
    BullishRegular,
    /// Price higher high, RSI lower high.
    #[display("bearish_regular")]
    BearishRegular,
    /// Price higher low, RSI lower low.
    #[display("bullish_hidden")]
    BullishHidden,
    /// Price lower high, RSI higher high.
    #[display("bearish_hidden")]
    BearishHidden,
}

impl DivergenceKind {
    pub fn is_bullish(&self) -> bool {
        matches!(self, Self::BullishRegular | Self::BullishHidden)
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, Self::BullishHidden | Self::BearishHidden)
    }
}

/// Value of a series at an absolute bar index.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize, Constructor)]
pub struct Point {
    pub index: usize,
    pub value: f64,
}

/// Detected divergence. `first` is the older extremum of each pair.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct DivergenceResult {
    pub kind: DivergenceKind,
    pub price_first: Point,
    pub price_second: Point,
    pub rsi_first: Point,
    pub rsi_second: Point,
    /// Normalised RSI gap between the paired extrema, in `[0, 1]`.
    pub strength: f64,
}

/// Divergence detection parameters.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct DivergenceConfig {
    /// Bars at the end of the series considered.
    pub lookback: usize,
    /// Minimum distance between the two price extrema.
    pub min_bars_between: usize,
    pub detect_hidden: bool,
    /// Neighbours on each side an extremum must strictly exceed.
    pub order: usize,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            lookback: 50,
            min_bars_between: 5,
            detect_hidden: true,
            order: 3,
        }
    }
}

/// Two most recent same type extrema of price paired with their nearest RSI extrema.
#[derive(Copy, Clone, PartialEq, Debug)]
struct Pair {
    price_first: Point,
    price_second: Point,
    rsi_first: Point,
    rsi_second: Point,
}

impl Pair {
    fn price_rising(&self) -> bool {
        self.price_second.value > self.price_first.value
    }

    fn price_falling(&self) -> bool {
        self.price_second.value < self.price_first.value
    }

    fn rsi_rising(&self) -> bool {
        self.rsi_second.value > self.rsi_first.value
    }

    fn rsi_falling(&self) -> bool {
        self.rsi_second.value < self.rsi_first.value
    }

    fn into_result(self, kind: DivergenceKind) -> DivergenceResult {
        let (first, second) = (self.rsi_first.value, self.rsi_second.value);
        let (gap, base) = if second < first {
            (first - second, first)
        } else {
            (second - first, 100.0 - first)
        };
        let strength = if base > 0.0 {
            (gap / base).abs().min(1.0)
        } else {
            1.0
        };

        DivergenceResult {
            kind,
            price_first: self.price_first,
            price_second: self.price_second,
            rsi_first: self.rsi_first,
            rsi_second: self.rsi_second,
            strength,
        }
    }
}

/// Detect a divergence between `closes` and the aligned `rsi` series over the last
/// `config.lookback` bars.
///
/// `rsi` must hold one entry per close, as returned by `compute_rsi`. Returns `None` if the
/// series lengths differ, the series is shorter than the lookback or no divergence is found.
/// Regular bearish is checked first, then regular bullish, then hidden bullish and hidden
/// bearish. The first match is returned.
pub fn detect_divergence(
    closes: &[f64],
    rsi: &[Option<f64>],
    config: &DivergenceConfig,
) -> Option<DivergenceResult> {
    let len = closes.len();
    if rsi.len() != len || config.lookback == 0 || len < config.lookback {
        return None;
    }

    let offset = len - config.lookback;
    let prices = closes[offset..]
        .iter()
        .copied()
        .map(Some)
        .collect::<Vec<_>>();
    let rsi = &rsi[offset..];

    let highs = pair_extrema(
        &prices,
        rsi,
        &find_peaks(&prices, config.order),
        &find_peaks(rsi, config.order),
        offset,
        config.min_bars_between,
    );
    let lows = pair_extrema(
        &prices,
        rsi,
        &find_troughs(&prices, config.order),
        &find_troughs(rsi, config.order),
        offset,
        config.min_bars_between,
    );

    if let Some(highs) = highs.filter(|pair| pair.price_rising() && pair.rsi_falling()) {
        return Some(highs.into_result(DivergenceKind::BearishRegular));
    }
    if let Some(lows) = lows.filter(|pair| pair.price_falling() && pair.rsi_rising()) {
        return Some(lows.into_result(DivergenceKind::BullishRegular));
    }
    if !config.detect_hidden {
        return None;
    }
    if let Some(lows) = lows.filter(|pair| pair.price_rising() && pair.rsi_falling()) {
        return Some(lows.into_result(DivergenceKind::BullishHidden));
    }
    if let Some(highs) = highs.filter(|pair| pair.price_falling() && pair.rsi_rising()) {
        return Some(highs.into_result(DivergenceKind::BearishHidden));
    }

    None
}

fn pair_extrema(
    prices: &[Option<f64>],
    rsi: &[Option<f64>],
    price_extrema: &[usize],
    rsi_extrema: &[usize],
    offset: usize,
    min_bars_between: usize,
) -> Option<Pair> {
    let [.., first, second] = price_extrema else {
        return None;
    };
    if second - first < min_bars_between {
        return None;
    }

    let nearest = |target: usize| {
        rsi_extrema
            .iter()
            .copied()
            .min_by_key(|index| index.abs_diff(target))
    };
    let (rsi_first, rsi_second) = (nearest(*first)?, nearest(*second)?);
    if rsi_first == rsi_second {
        return None;
    }

    let point = |series: &[Option<f64>], index: usize| {
        series[index].map(|value| Point::new(offset + index, value))
    };

    Some(Pair {
        price_first: point(prices, *first)?,
        price_second: point(prices, *second)?,
        rsi_first: point(rsi, rsi_first)?,
        rsi_second: point(rsi, rsi_second)?,
    })
}
