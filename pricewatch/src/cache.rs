use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use pricewatch_data::{Candle, Timeframe};
use smol_str::SmolStr;
use std::{hash::Hash, sync::Arc};

/// Candle series cached per `K` (eg/ market) and timeframe.
///
/// An entry expires after half its timeframe's duration.
#[derive(Debug)]
pub struct CandleCache<K> {
    entries: Mutex<FnvHashMap<(SmolStr, K, Timeframe), Entry>>,
}

#[derive(Debug)]
struct Entry {
    fetched_at: DateTime<Utc>,
    candles: Arc<Vec<Candle>>,
}

impl<K> Default for CandleCache<K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(FnvHashMap::default()),
        }
    }
}

/// Time to live of a cached series for a timeframe.
pub fn ttl(timeframe: Timeframe) -> chrono::Duration {
    chrono::Duration::from_std(timeframe.duration() / 2).unwrap_or(chrono::Duration::zero())
}

impl<K> CandleCache<K>
where
    K: Copy + Eq + Hash,
{
    /// Cached series if present and not expired at `now`.
    pub fn get(
        &self,
        symbol: &str,
        key: K,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Option<Arc<Vec<Candle>>> {
        let entries = self.entries.lock();
        let entry = entries.get(&(SmolStr::new(symbol), key, timeframe))?;

        (now - entry.fetched_at < ttl(timeframe)).then(|| Arc::clone(&entry.candles))
    }

    pub fn insert(
        &self,
        symbol: &str,
        key: K,
        timeframe: Timeframe,
        candles: Vec<Candle>,
        now: DateTime<Utc>,
    ) -> Arc<Vec<Candle>> {
        let candles = Arc::new(candles);
        self.entries.lock().insert(
            (SmolStr::new(symbol), key, timeframe),
            Entry {
                fetched_at: now,
                candles: Arc::clone(&candles),
            },
        );
        candles
    }

    /// Drop every expired entry.
    pub fn purge(&self, now: DateTime<Utc>) {
        self.entries
            .lock()
            .retain(|(_, _, timeframe), entry| now - entry.fetched_at < ttl(*timeframe));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(close: f64) -> Candle {
        Candle {
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_cache_expires_after_half_timeframe() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let cache = CandleCache::<u8>::default();
        cache.insert("BTC", 0, Timeframe::H1, vec![candle(1.0)], t0);

        struct TestCase {
            key: u8,
            timeframe: Timeframe,
            minutes: i64,
            expected: bool,
        }

        let tests = vec![
            // TC0: fresh
            TestCase {
                key: 0,
                timeframe: Timeframe::H1,
                minutes: 29,
                expected: true,
            },
            // TC1: expired at half the timeframe
            TestCase {
                key: 0,
                timeframe: Timeframe::H1,
                minutes: 30,
                expected: false,
            },
            // TC2: different timeframe is a different entry
            TestCase {
                key: 0,
                timeframe: Timeframe::H4,
                minutes: 0,
                expected: false,
            },
            // TC3: different key is a different entry
            TestCase {
                key: 1,
                timeframe: Timeframe::H1,
                minutes: 0,
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let now = t0 + chrono::Duration::minutes(test.minutes);
            let actual = cache.get("BTC", test.key, test.timeframe, now).is_some();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }

        cache.purge(t0 + chrono::Duration::minutes(30));
        assert!(cache.is_empty());
    }
}
