// =============================================================================
// Candle Aggregator — per-(symbol, timeframe) forming candle + completed ring
// buffer, edge-triggered completion on next-tick arrival
// =============================================================================
//
// Mirrors `CandleManager`: for every incoming tick, every timeframe's forming
// candle is either updated in place (same bucket), or completed and replaced
// with a fresh one seeded from the tick (new bucket). Completion is
// edge-triggered — there is no background timer, a bucket only completes
// when a tick lands in the next bucket.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;

use crate::types::{Candle, Timeframe, Tick};

/// Composite key identifying a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// Outcome of folding a tick into the aggregator for one timeframe.
pub enum CandleEvent {
    /// The forming candle for this bucket was updated in place.
    Updated(Candle),
    /// The previous bucket closed (`completed`) and a new forming candle
    /// (`started`) was seeded from this tick.
    Completed { completed: Candle, started: Candle },
}

/// Floor `timestamp` to the start of its bucket for `timeframe`.
///
/// `D1` floors to UTC midnight of the tick's own day, per the resolved
/// open question on daily bucketing: the distinction between "midnight in
/// which timezone" is a configuration concern outside this aggregator, and
/// the aggregator itself always floors against the tick's UTC timestamp.
pub fn floor_to_bucket(timestamp: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    if timeframe == Timeframe::D1 {
        return timestamp
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always a valid time")
            .and_utc();
    }

    let minutes = timeframe.minutes();
    let minutes_since_midnight = timestamp.hour() as i64 * 60 + timestamp.minute() as i64;
    let bucket_minutes = (minutes_since_midnight / minutes) * minutes;
    let bucket_hour = bucket_minutes / 60;
    let bucket_minute = bucket_minutes % 60;

    timestamp
        .date_naive()
        .and_hms_opt(bucket_hour as u32, bucket_minute as u32, 0)
        .expect("bucket hour/minute are always in range")
        .and_utc()
}

struct Series {
    forming: Option<Candle>,
    completed: VecDeque<Candle>,
}

impl Series {
    fn new() -> Self {
        Self {
            forming: None,
            completed: VecDeque::new(),
        }
    }
}

/// Thread-safe forming-candle store and completed-candle ring buffer across
/// all seven timeframes for every subscribed symbol.
pub struct CandleAggregator {
    series: RwLock<HashMap<CandleKey, Series>>,
    lookback: usize,
}

impl CandleAggregator {
    pub fn new(lookback: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            lookback,
        }
    }

    /// Fold a tick into every one of the seven timeframes, returning one
    /// event per timeframe in `Timeframe::ALL` order.
    pub fn on_tick(&self, tick: &Tick) -> Vec<(Timeframe, CandleEvent)> {
        Timeframe::ALL
            .iter()
            .map(|&tf| (tf, self.update_timeframe(tick, tf)))
            .collect()
    }

    fn update_timeframe(&self, tick: &Tick, timeframe: Timeframe) -> CandleEvent {
        let bucket_start = floor_to_bucket(tick.timestamp, timeframe);
        let key = CandleKey {
            symbol: tick.symbol.clone(),
            timeframe,
        };

        let mut map = self.series.write();
        let series = map.entry(key).or_insert_with(Series::new);

        match series.forming.take() {
            None => {
                let candle = Candle::from_tick(tick, timeframe, bucket_start);
                series.forming = Some(candle.clone());
                CandleEvent::Updated(candle)
            }
            Some(mut current) if current.start == bucket_start => {
                current.update_with_tick(tick);
                series.forming = Some(current.clone());
                CandleEvent::Updated(current)
            }
            Some(mut previous) => {
                previous.forming = false;
                let started = Candle::from_tick(tick, timeframe, bucket_start);
                series.forming = Some(started.clone());

                series.completed.push_back(previous.clone());
                while series.completed.len() > self.lookback {
                    series.completed.pop_front();
                }

                CandleEvent::Completed {
                    completed: previous,
                    started,
                }
            }
        }
    }

    /// Force the current forming candle for `(symbol, timeframe)` to close
    /// without waiting for the next tick — used at shutdown or for
    /// end-of-session housekeeping.
    pub fn force_complete(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        let key = CandleKey {
            symbol: symbol.to_string(),
            timeframe,
        };

        let mut map = self.series.write();
        let series = map.get_mut(&key)?;
        let mut candle = series.forming.take()?;
        candle.forming = false;

        series.completed.push_back(candle.clone());
        while series.completed.len() > self.lookback {
            series.completed.pop_front();
        }

        Some(candle)
    }

    pub fn forming_candle(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        let key = CandleKey {
            symbol: symbol.to_string(),
            timeframe,
        };
        self.series.read().get(&key).and_then(|s| s.forming.clone())
    }

    /// Most recent `count` completed candles, oldest-first.
    pub fn completed_candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Vec<Candle> {
        let key = CandleKey {
            symbol: symbol.to_string(),
            timeframe,
        };
        let map = self.series.read();
        match map.get(&key) {
            Some(series) => {
                let start = series.completed.len().saturating_sub(count);
                series.completed.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn last_close(&self, symbol: &str, timeframe: Timeframe) -> Option<f64> {
        let key = CandleKey {
            symbol: symbol.to_string(),
            timeframe,
        };
        self.series.read().get(&key).and_then(|s| s.completed.back().map(|c| c.close))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tick_at(symbol: &str, price: f64, hour: u32, minute: u32, second: u32) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            price,
            volume: 1.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, second).unwrap(),
        }
    }

    #[test]
    fn floor_to_bucket_rounds_down_to_interval() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 37, 45).unwrap();
        let bucket = floor_to_bucket(ts, Timeframe::M5);
        assert_eq!(bucket, Utc.with_ymd_and_hms(2024, 1, 1, 9, 35, 0).unwrap());
    }

    #[test]
    fn floor_to_bucket_daily_floors_to_midnight() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap();
        let bucket = floor_to_bucket(ts, Timeframe::D1);
        assert_eq!(bucket, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn first_tick_seeds_forming_candle_for_every_timeframe() {
        let agg = CandleAggregator::new(10);
        let tick = tick_at("BTCUSDT", 100.0, 9, 37, 0);
        let events = agg.on_tick(&tick);
        assert_eq!(events.len(), 7);
        for (_, event) in events {
            assert!(matches!(event, CandleEvent::Updated(_)));
        }
    }

    #[test]
    fn second_tick_in_same_bucket_updates_in_place() {
        let agg = CandleAggregator::new(10);
        agg.on_tick(&tick_at("BTCUSDT", 100.0, 9, 37, 0));
        let events = agg.on_tick(&tick_at("BTCUSDT", 105.0, 9, 37, 30));

        let m1_event = events.iter().find(|(tf, _)| *tf == Timeframe::M1).unwrap();
        match &m1_event.1 {
            CandleEvent::Updated(c) => {
                assert_eq!(c.high, 105.0);
                assert_eq!(c.close, 105.0);
            }
            _ => panic!("expected update for same-bucket tick"),
        }
    }

    #[test]
    fn tick_in_next_bucket_completes_previous_and_starts_new() {
        let agg = CandleAggregator::new(10);
        agg.on_tick(&tick_at("BTCUSDT", 100.0, 9, 37, 0));
        let events = agg.on_tick(&tick_at("BTCUSDT", 110.0, 9, 38, 1));

        let m1_event = events.iter().find(|(tf, _)| *tf == Timeframe::M1).unwrap();
        match &m1_event.1 {
            CandleEvent::Completed { completed, started } => {
                assert_eq!(completed.close, 100.0);
                assert!(!completed.forming);
                assert_eq!(started.open, 110.0);
                assert!(started.forming);
            }
            _ => panic!("expected completion on bucket boundary crossing"),
        }

        assert_eq!(agg.last_close("BTCUSDT", Timeframe::M1), Some(100.0));
    }

    #[test]
    fn force_complete_closes_forming_candle_without_a_new_tick() {
        let agg = CandleAggregator::new(10);
        agg.on_tick(&tick_at("BTCUSDT", 100.0, 9, 37, 0));

        let completed = agg.force_complete("BTCUSDT", Timeframe::M1).expect("should complete");
        assert!(!completed.forming);
        assert!(agg.forming_candle("BTCUSDT", Timeframe::M1).is_none());
    }

    #[test]
    fn completed_ring_trims_to_lookback() {
        let agg = CandleAggregator::new(2);
        for m in 0..5 {
            agg.on_tick(&tick_at("BTCUSDT", 100.0 + m as f64, m, 0, 0));
        }
        let candles = agg.completed_candles("BTCUSDT", Timeframe::H1, 10);
        assert!(candles.len() <= 2);
    }
}
