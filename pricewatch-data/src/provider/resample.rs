//! Candle resampling.
//!
//! Aggregates source candles into wider buckets aligned to the Unix epoch
//! (open=first, high=max, low=min, close=last, volume=sum).

use super::Candle;
use chrono::DateTime;
use std::time::Duration;

/// Aggregates consecutive candles into fixed-width buckets.
/// Uses candle timestamps (not wall clock) for bucket boundaries.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    bucket_ms: i64,
    current: Option<Candle>,
}

impl CandleAggregator {
    pub fn new(bucket: Duration) -> Self {
        Self {
            bucket_ms: i64::try_from(bucket.as_millis()).unwrap_or(i64::MAX).max(1),
            current: None,
        }
    }

    /// Align a timestamp to the start of its bucket
    #[inline]
    fn align(&self, ts_ms: i64) -> i64 {
        ts_ms.div_euclid(self.bucket_ms) * self.bucket_ms
    }

    /// Returns `Some(candle)` when a bucket completes.
    pub fn update(&mut self, candle: &Candle) -> Option<Candle> {
        let bucket_start = self.align(candle.time.timestamp_millis());
        let bucket_time = DateTime::from_timestamp_millis(bucket_start).unwrap_or(candle.time);

        match self.current.as_mut() {
            Some(current) if current.time == bucket_time => {
                current.high = current.high.max(candle.high);
                current.low = current.low.min(candle.low);
                current.close = candle.close;
                current.volume += candle.volume;
                None
            }
            _ => self.current.replace(Candle {
                time: bucket_time,
                ..*candle
            }),
        }
    }

    /// Take the in-progress bucket, if any.
    pub fn flush(&mut self) -> Option<Candle> {
        self.current.take()
    }
}

/// Resample candles (oldest first) into `bucket` wide candles.
pub fn resample(candles: &[Candle], bucket: Duration) -> Vec<Candle> {
    let mut aggregator = CandleAggregator::new(bucket);
    let mut output = candles
        .iter()
        .filter_map(|candle| aggregator.update(candle))
        .collect::<Vec<_>>();
    output.extend(aggregator.flush());
    output
}
