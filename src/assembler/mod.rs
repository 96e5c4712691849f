// =============================================================================
// Multi-Timeframe Assembler — synchronized snapshot across timeframes
// =============================================================================
//
// A direct port of `MultiTimeframeDataProvider`: pull historical candles from
// the Candle Aggregator's completed-candle ring plus the current forming
// candle for each requested timeframe, stitch them into one snapshot, and
// give callers a freshness check before they trust it.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::candle::CandleAggregator;
use crate::clock::{Clock, SYSTEM_CLOCK};
use crate::indicators::engine::IndicatorEngine;
use crate::types::{Candle, IndicatorValue, Timeframe};

/// An indicator a caller wants computed alongside the raw candle data for
/// every requested timeframe, keyed in the resulting map by `name`.
#[derive(Debug, Clone)]
pub enum IndicatorRequest {
    Sma { name: String, period: usize },
    Ema { name: String, period: usize },
    Rsi { name: String, period: usize },
    Macd { name: String, fast: usize, slow: usize, signal: usize },
    Bollinger { name: String, period: usize, std_dev: f64 },
}

impl IndicatorRequest {
    fn name(&self) -> &str {
        match self {
            IndicatorRequest::Sma { name, .. }
            | IndicatorRequest::Ema { name, .. }
            | IndicatorRequest::Rsi { name, .. }
            | IndicatorRequest::Macd { name, .. }
            | IndicatorRequest::Bollinger { name, .. } => name,
        }
    }
}

/// Historical + forming candles for one timeframe, plus any indicators the
/// caller asked the assembler to compute alongside them.
#[derive(Debug, Clone)]
pub struct TimeframeData {
    pub historical_candles: Vec<Candle>,
    pub forming_candle: Option<Candle>,
    pub indicators: BTreeMap<String, IndicatorValue>,
}

impl TimeframeData {
    /// Forming candle if present, else the most recent historical close —
    /// mirrors `get_latest_candle`.
    pub fn latest_candle(&self) -> Option<&Candle> {
        self.forming_candle.as_ref().or_else(|| self.historical_candles.last())
    }
}

/// Synchronized snapshot across every requested timeframe for one symbol.
#[derive(Debug, Clone)]
pub struct MultiTimeframeData {
    pub symbol: String,
    pub timeframes: BTreeMap<Timeframe, TimeframeData>,
    pub current_price: f64,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Assembles [`MultiTimeframeData`] snapshots from a [`CandleAggregator`],
/// optionally enriched with indicator values computed through an
/// [`IndicatorEngine`].
pub struct MultiTimeframeAssembler<'a> {
    aggregator: &'a CandleAggregator,
    indicator_engine: Option<&'a IndicatorEngine>,
    clock: &'a dyn Clock,
    lookback: usize,
    freshness_secs: i64,
}

impl<'a> MultiTimeframeAssembler<'a> {
    pub fn new(aggregator: &'a CandleAggregator, lookback: usize, freshness_secs: i64) -> Self {
        Self {
            aggregator,
            indicator_engine: None,
            clock: &SYSTEM_CLOCK,
            lookback,
            freshness_secs,
        }
    }

    /// Attach an indicator engine so `get_data` can populate each
    /// timeframe's `indicators` map from `indicator_requests`.
    pub fn with_indicator_engine(mut self, engine: &'a IndicatorEngine) -> Self {
        self.indicator_engine = Some(engine);
        self
    }

    /// Substitute the "now" `ensure_consistency` compares candle freshness
    /// against. Defaults to [`SYSTEM_CLOCK`]; a replay run attaches a
    /// [`crate::clock::ReplayClock`] instead so staleness is judged against
    /// the replayed data's own time rather than wall-clock time.
    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Assemble a synchronized snapshot across `timeframes` for `symbol`,
    /// with no indicators attached.
    pub fn get_data(&self, symbol: &str, timeframes: &[Timeframe]) -> MultiTimeframeData {
        self.get_data_with_indicators(symbol, timeframes, &[])
    }

    /// Assemble a synchronized snapshot across `timeframes` for `symbol`,
    /// computing every indicator in `indicator_requests` for each timeframe
    /// and populating `TimeframeData::indicators` under its requested name.
    /// Requests are silently skipped (not an error) when no indicator engine
    /// is attached, or when a request has insufficient historical data —
    /// the raw candle data is still returned either way.
    pub fn get_data_with_indicators(
        &self,
        symbol: &str,
        timeframes: &[Timeframe],
        indicator_requests: &[IndicatorRequest],
    ) -> MultiTimeframeData {
        let mut by_timeframe = BTreeMap::new();
        let smallest_timeframe = timeframes.iter().copied().min();

        for &tf in timeframes {
            let historical_candles = self.aggregator.completed_candles(symbol, tf, self.lookback);
            let forming_candle = self.aggregator.forming_candle(symbol, tf);

            let mut closes: Vec<f64> = historical_candles.iter().map(|c| c.close).collect();
            if let Some(forming) = &forming_candle {
                closes.push(forming.close);
            }

            let indicators = self.compute_indicators(symbol, tf, &closes, indicator_requests);

            let tf_data = TimeframeData {
                historical_candles,
                forming_candle,
                indicators,
            };

            by_timeframe.insert(tf, tf_data);
        }

        // current_price is the close of the forming candle if present, else
        // the last historical close, on the smallest requested timeframe.
        let current_price = smallest_timeframe
            .and_then(|tf| by_timeframe.get(&tf))
            .and_then(|tf_data| tf_data.latest_candle())
            .map(|c| c.close)
            .unwrap_or(0.0);

        MultiTimeframeData {
            symbol: symbol.to_string(),
            timeframes: by_timeframe,
            current_price,
            timestamp: self.clock.now(),
        }
    }

    fn compute_indicators(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        closes: &[f64],
        requests: &[IndicatorRequest],
    ) -> BTreeMap<String, IndicatorValue> {
        let mut out = BTreeMap::new();
        let Some(engine) = self.indicator_engine else {
            return out;
        };

        for request in requests {
            let value = match request {
                IndicatorRequest::Sma { period, .. } => engine
                    .sma(symbol, timeframe, *period, closes)
                    .map(|v| (crate::types::IndicatorOutput::Scalar(v), "SMA")),
                IndicatorRequest::Ema { period, .. } => engine
                    .ema(symbol, timeframe, *period, closes)
                    .map(|v| (crate::types::IndicatorOutput::Scalar(v), "EMA")),
                IndicatorRequest::Rsi { period, .. } => engine
                    .rsi(symbol, timeframe, *period, closes)
                    .map(|v| (crate::types::IndicatorOutput::Scalar(v), "RSI")),
                IndicatorRequest::Macd { fast, slow, signal, .. } => engine
                    .macd(symbol, timeframe, *fast, *slow, *signal, closes)
                    .map(|(a, b, c)| (crate::types::IndicatorOutput::Triple { a, b, c }, "MACD")),
                IndicatorRequest::Bollinger { period, std_dev, .. } => engine
                    .bollinger(symbol, timeframe, *period, *std_dev, closes)
                    .map(|(a, b, c)| (crate::types::IndicatorOutput::Triple { a, b, c }, "BB")),
            };

            if let Some((output, indicator_type)) = value {
                out.insert(
                    request.name().to_string(),
                    IndicatorValue {
                        symbol: symbol.to_string(),
                        timeframe,
                        indicator_type: indicator_type.to_string(),
                        params: BTreeMap::new(),
                        value: output,
                        timestamp: Utc::now(),
                    },
                );
            }
        }

        out
    }

    /// Validate that `data` has content for every timeframe and that the
    /// latest candle per timeframe is no older than the configured
    /// freshness window.
    pub fn ensure_consistency(&self, data: &MultiTimeframeData) -> bool {
        if data.timeframes.is_empty() {
            return false;
        }

        let now = self.clock.now();

        for (timeframe, tf_data) in &data.timeframes {
            if tf_data.historical_candles.is_empty() && tf_data.forming_candle.is_none() {
                tracing::warn!(%timeframe, "no data for timeframe");
                return false;
            }

            if let Some(latest) = tf_data.latest_candle() {
                let age = (now - latest.start).num_seconds();
                if age > self.freshness_secs {
                    tracing::warn!(%timeframe, age, "stale data for timeframe");
                    return false;
                }
            }
        }

        true
    }
}

impl MultiTimeframeData {
    pub fn get_latest_candle(&self, timeframe: Timeframe) -> Option<&Candle> {
        self.timeframes.get(&timeframe).and_then(|d| d.latest_candle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tick;
    use chrono::TimeZone;

    fn tick_at(symbol: &str, price: f64, hour: u32, minute: u32) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            price,
            volume: 1.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap(),
        }
    }

    #[test]
    fn get_data_picks_current_price_from_forming_candle() {
        let agg = CandleAggregator::new(500);
        agg.on_tick(&tick_at("BTCUSDT", 100.0, 9, 0));

        let assembler = MultiTimeframeAssembler::new(&agg, 500, 60);
        let data = assembler.get_data("BTCUSDT", &[Timeframe::M1]);

        assert_eq!(data.current_price, 100.0);
        assert!(data.timeframes[&Timeframe::M1].forming_candle.is_some());
    }

    #[test]
    fn current_price_is_read_from_smallest_requested_timeframe_regardless_of_order() {
        let agg = CandleAggregator::new(500);
        agg.on_tick(&tick_at("BTCUSDT", 150.0, 9, 0));

        let assembler = MultiTimeframeAssembler::new(&agg, 500, 3600);
        // Pass timeframes with the smallest one last in the slice: the
        // result must still come from M1 (the smallest), not whichever
        // timeframe happens to be iterated last.
        let ordered_last = assembler.get_data("BTCUSDT", &[Timeframe::H1, Timeframe::M1]);
        let ordered_first = assembler.get_data("BTCUSDT", &[Timeframe::M1, Timeframe::H1]);

        assert_eq!(ordered_last.current_price, ordered_first.current_price);
        assert_eq!(
            ordered_last.current_price,
            ordered_last.timeframes[&Timeframe::M1].latest_candle().unwrap().close
        );
    }

    #[test]
    fn ensure_consistency_fails_when_timeframe_has_no_data() {
        let agg = CandleAggregator::new(500);
        let assembler = MultiTimeframeAssembler::new(&agg, 500, 60);
        let data = assembler.get_data("BTCUSDT", &[Timeframe::M1]);

        assert!(!assembler.ensure_consistency(&data));
    }

    #[test]
    fn ensure_consistency_fails_on_empty_timeframe_set() {
        let agg = CandleAggregator::new(500);
        let assembler = MultiTimeframeAssembler::new(&agg, 500, 60);
        let data = assembler.get_data("BTCUSDT", &[]);

        assert!(!assembler.ensure_consistency(&data));
    }

    #[test]
    fn ensure_consistency_passes_with_fresh_forming_candle() {
        let agg = CandleAggregator::new(500);
        let now_tick = Tick {
            symbol: "BTCUSDT".to_string(),
            price: 100.0,
            volume: 1.0,
            timestamp: Utc::now(),
        };
        agg.on_tick(&now_tick);

        let assembler = MultiTimeframeAssembler::new(&agg, 500, 60);
        let data = assembler.get_data("BTCUSDT", &[Timeframe::M1]);

        assert!(assembler.ensure_consistency(&data));
    }

    #[test]
    fn ensure_consistency_with_a_replay_clock_judges_freshness_against_replayed_time() {
        use crate::clock::ReplayClock;

        // A tick timestamped long before real "now" would fail freshness
        // against `Utc::now()`, but must pass once the assembler's clock is
        // pinned to that same historical instant.
        let agg = CandleAggregator::new(500);
        let historical_tick = tick_at("BTCUSDT", 100.0, 9, 0);
        agg.on_tick(&historical_tick);

        let replay_clock = ReplayClock::new(historical_tick.timestamp);
        let assembler = MultiTimeframeAssembler::new(&agg, 500, 60).with_clock(&replay_clock);
        let data = assembler.get_data("BTCUSDT", &[Timeframe::M1]);

        assert!(assembler.ensure_consistency(&data));

        // Advancing the replay clock far past the candle's start reproduces
        // the staleness failure, proving the check reads from the clock and
        // not from wall time.
        replay_clock.set(historical_tick.timestamp + chrono::Duration::seconds(120));
        assert!(!assembler.ensure_consistency(&data));
    }

    #[test]
    fn get_latest_candle_prefers_forming_over_historical() {
        let agg = CandleAggregator::new(500);
        agg.on_tick(&tick_at("BTCUSDT", 100.0, 9, 0));
        agg.on_tick(&tick_at("BTCUSDT", 110.0, 9, 2));

        let assembler = MultiTimeframeAssembler::new(&agg, 500, 3600);
        let data = assembler.get_data("BTCUSDT", &[Timeframe::M1]);

        let latest = data.get_latest_candle(Timeframe::M1).expect("should have latest");
        assert_eq!(latest.close, 110.0);
    }

    #[test]
    fn get_data_with_indicators_populates_requested_values() {
        use crate::indicators::engine::IndicatorEngine;

        let agg = CandleAggregator::new(500);
        for i in 0..20 {
            agg.on_tick(&tick_at("BTCUSDT", 100.0 + i as f64, 9, i));
        }

        let engine = IndicatorEngine::new(std::time::Duration::from_secs(60));
        let assembler = MultiTimeframeAssembler::new(&agg, 500, 3600).with_indicator_engine(&engine);
        let requests = vec![IndicatorRequest::Sma {
            name: "sma_fast".to_string(),
            period: 5,
        }];
        let data = assembler.get_data_with_indicators("BTCUSDT", &[Timeframe::M1], &requests);

        let tf_data = &data.timeframes[&Timeframe::M1];
        assert!(tf_data.indicators.contains_key("sma_fast"));
    }

    #[test]
    fn get_data_without_indicator_engine_leaves_indicators_empty() {
        let agg = CandleAggregator::new(500);
        agg.on_tick(&tick_at("BTCUSDT", 100.0, 9, 0));

        let assembler = MultiTimeframeAssembler::new(&agg, 500, 3600);
        let data = assembler.get_data("BTCUSDT", &[Timeframe::M1]);

        assert!(data.timeframes[&Timeframe::M1].indicators.is_empty());
    }
}
