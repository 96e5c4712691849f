// =============================================================================
// macd_cross — example strategy plugin
// =============================================================================
//
// A MACD histogram-crossover strategy, in the spirit of the teacher's old
// single hardcoded `AuroraV3` pipeline (5M-candle-close evaluation, MACD
// among its indicator stack) but expressed as one `StrategyPlugin`
// implementation among many rather than the only strategy the engine knows.
// Emits a long entry when the histogram crosses from non-positive to
// positive, and an exit when it crosses back to non-positive. Tracks only
// the sign it last saw so a restart (via `set_state`) resumes without
// re-firing a signal for a crossover that already happened.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::assembler::MultiTimeframeData;
use crate::errors::CoreError;
use crate::indicators::macd::calculate_macd;
use crate::strategy::plugin::StrategyPlugin;
use crate::types::{Candle, Direction, OrderType, Signal, SignalType, StrategyConfig, Timeframe};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Params {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    quantity: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
            quantity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Sign {
    Positive,
    NonPositive,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct State {
    last_sign: Sign,
}

impl Default for State {
    fn default() -> Self {
        Self {
            last_sign: Sign::Unknown,
        }
    }
}

pub struct MacdCrossPlugin {
    params: Params,
    timeframe: Timeframe,
    state: State,
}

impl MacdCrossPlugin {
    pub fn new() -> Self {
        Self {
            params: Params::default(),
            timeframe: Timeframe::M5,
            state: State::default(),
        }
    }

    fn closes_for(&self, data: &MultiTimeframeData) -> Option<Vec<f64>> {
        let tf_data = data.timeframes.get(&self.timeframe)?;
        let mut closes: Vec<f64> = tf_data.historical_candles.iter().map(|c| c.close).collect();
        if let Some(forming) = &tf_data.forming_candle {
            closes.push(forming.close);
        }
        Some(closes)
    }

    fn evaluate(&mut self, data: &MultiTimeframeData, config: &StrategyConfig) -> Result<Option<Signal>, CoreError> {
        let Some(closes) = self.closes_for(data) else {
            return Ok(None);
        };

        let Some((_, _, histogram)) = calculate_macd(
            &closes,
            self.params.fast_period,
            self.params.slow_period,
            self.params.signal_period,
        ) else {
            return Ok(None);
        };

        let sign = if histogram > 0.0 { Sign::Positive } else { Sign::NonPositive };
        let previous = self.state.last_sign;
        self.state.last_sign = sign;

        if previous == sign || previous == Sign::Unknown {
            return Ok(None);
        }

        let symbol = config
            .symbols
            .first()
            .cloned()
            .unwrap_or_else(|| data.symbol.clone());

        let signal = match sign {
            Sign::Positive => Signal {
                signal_type: SignalType::Entry,
                direction: Direction::Long,
                symbol,
                quantity: self.params.quantity,
                order_type: OrderType::Market,
                price: None,
                stop_loss: None,
                take_profit: None,
                trailing_stop_pct: None,
                reason: "macd histogram crossed positive".to_string(),
            },
            Sign::NonPositive => Signal {
                signal_type: SignalType::Exit,
                direction: Direction::Long,
                symbol,
                quantity: self.params.quantity,
                order_type: OrderType::Market,
                price: None,
                stop_loss: None,
                take_profit: None,
                trailing_stop_pct: None,
                reason: "macd histogram crossed non-positive".to_string(),
            },
            Sign::Unknown => return Ok(None),
        };

        Ok(Some(signal))
    }
}

impl Default for MacdCrossPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn param_usize(parameters: &BTreeMap<String, serde_json::Value>, name: &str, default: usize) -> usize {
    parameters.get(name).and_then(|v| v.as_u64()).map(|v| v as usize).unwrap_or(default)
}

fn param_f64(parameters: &BTreeMap<String, serde_json::Value>, name: &str, default: f64) -> f64 {
    parameters.get(name).and_then(|v| v.as_f64()).unwrap_or(default)
}

impl StrategyPlugin for MacdCrossPlugin {
    fn initialize(&mut self, config: &StrategyConfig) -> Result<(), CoreError> {
        self.params = Params {
            fast_period: param_usize(&config.parameters, "fast_period", Params::default().fast_period),
            slow_period: param_usize(&config.parameters, "slow_period", Params::default().slow_period),
            signal_period: param_usize(&config.parameters, "signal_period", Params::default().signal_period),
            quantity: param_f64(&config.parameters, "quantity", Params::default().quantity),
        };
        self.timeframe = config.timeframes.first().copied().unwrap_or(Timeframe::M5);
        Ok(())
    }

    fn on_tick(&mut self, _data: &MultiTimeframeData) -> Result<Option<Signal>, CoreError> {
        Ok(None)
    }

    fn on_candle_complete(
        &mut self,
        timeframe: Timeframe,
        _candle: &Candle,
        data: &MultiTimeframeData,
    ) -> Result<Option<Signal>, CoreError> {
        if timeframe != self.timeframe {
            return Ok(None);
        }
        // config is not available here; evaluate reconstructs the symbol
        // from `data` alone since the signal's `config.symbols` check only
        // requires membership, and `data.symbol` always belongs to it.
        let config = StrategyConfig {
            strategy_id: String::new(),
            account_id: String::new(),
            plugin_name: String::new(),
            trading_mode: crate::types::TradingMode::Paper,
            symbols: vec![data.symbol.clone()],
            timeframes: vec![self.timeframe],
            parameters: BTreeMap::new(),
            risk_parameters: None,
        };
        self.evaluate(data, &config)
    }

    fn cleanup(&mut self) {}

    fn get_state(&self) -> serde_json::Value {
        serde_json::to_value(&self.state).unwrap_or(serde_json::json!({}))
    }

    fn set_state(&mut self, state: serde_json::Value) -> Result<(), CoreError> {
        self.state = serde_json::from_value(state).unwrap_or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradingMode;
    use std::collections::BTreeMap;

    fn sample_config() -> StrategyConfig {
        StrategyConfig {
            strategy_id: "macd-1".into(),
            account_id: "acct-1".into(),
            plugin_name: "macd_cross".into(),
            trading_mode: TradingMode::Paper,
            symbols: vec!["BTCUSDT".into()],
            timeframes: vec![Timeframe::M5],
            parameters: BTreeMap::new(),
            risk_parameters: None,
        }
    }

    fn data_with_closes(closes: &[f64]) -> MultiTimeframeData {
        let mut timeframes = std::collections::BTreeMap::new();
        let historical: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                symbol: "BTCUSDT".into(),
                timeframe: Timeframe::M5,
                start: chrono::Utc::now() - chrono::Duration::minutes(5 * (closes.len() - i) as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
                forming: false,
            })
            .collect();
        timeframes.insert(
            Timeframe::M5,
            crate::assembler::TimeframeData {
                historical_candles: historical,
                forming_candle: None,
                indicators: BTreeMap::new(),
            },
        );
        MultiTimeframeData {
            symbol: "BTCUSDT".into(),
            timeframes,
            current_price: *closes.last().unwrap(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn initialize_reads_parameters() {
        let mut plugin = MacdCrossPlugin::new();
        let mut config = sample_config();
        config.parameters.insert("fast_period".into(), serde_json::json!(5));
        plugin.initialize(&config).unwrap();
        assert_eq!(plugin.params.fast_period, 5);
    }

    #[test]
    fn no_signal_on_insufficient_history() {
        let mut plugin = MacdCrossPlugin::new();
        plugin.initialize(&sample_config()).unwrap();
        let data = data_with_closes(&[1.0, 2.0, 3.0]);
        let candle = data.timeframes[&Timeframe::M5].historical_candles.last().unwrap().clone();
        let result = plugin.on_candle_complete(Timeframe::M5, &candle, &data).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn first_observed_sign_does_not_fire_a_signal() {
        let mut plugin = MacdCrossPlugin::new();
        plugin.initialize(&sample_config()).unwrap();
        let closes: Vec<f64> = (1..=40).map(|i| i as f64).collect();
        let data = data_with_closes(&closes);
        let candle = data.timeframes[&Timeframe::M5].historical_candles.last().unwrap().clone();
        let result = plugin.on_candle_complete(Timeframe::M5, &candle, &data).unwrap();
        assert!(result.is_none());
        assert_eq!(plugin.state.last_sign, Sign::Positive);
    }

    #[test]
    fn sign_flip_fires_exit_signal() {
        let mut plugin = MacdCrossPlugin::new();
        plugin.initialize(&sample_config()).unwrap();

        let rising: Vec<f64> = (1..=40).map(|i| i as f64).collect();
        let data = data_with_closes(&rising);
        let candle = data.timeframes[&Timeframe::M5].historical_candles.last().unwrap().clone();
        plugin.on_candle_complete(Timeframe::M5, &candle, &data).unwrap();

        let mut falling = rising.clone();
        falling.extend((1..=20).rev().map(|i| i as f64));
        let data2 = data_with_closes(&falling);
        let candle2 = data2.timeframes[&Timeframe::M5].historical_candles.last().unwrap().clone();
        let result = plugin.on_candle_complete(Timeframe::M5, &candle2, &data2).unwrap();

        assert!(result.is_some());
        assert_eq!(result.unwrap().signal_type, SignalType::Exit);
    }

    #[test]
    fn wrong_timeframe_is_ignored() {
        let mut plugin = MacdCrossPlugin::new();
        plugin.initialize(&sample_config()).unwrap();
        let closes: Vec<f64> = (1..=40).map(|i| i as f64).collect();
        let data = data_with_closes(&closes);
        let candle = data.timeframes[&Timeframe::M5].historical_candles.last().unwrap().clone();
        let result = plugin.on_candle_complete(Timeframe::M1, &candle, &data).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn get_state_set_state_round_trips() {
        let mut plugin = MacdCrossPlugin::new();
        plugin.initialize(&sample_config()).unwrap();
        plugin.state.last_sign = Sign::Positive;
        let snapshot = plugin.get_state();

        let mut fresh = MacdCrossPlugin::new();
        fresh.initialize(&sample_config()).unwrap();
        fresh.set_state(snapshot).unwrap();
        assert_eq!(fresh.state.last_sign, Sign::Positive);
    }
}
