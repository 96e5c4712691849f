// =============================================================================
// StrategyPlugin trait — the pluggable unit of trading logic
// =============================================================================
//
// Generalizes the teacher's single hardcoded `AuroraV3` strategy (see
// `src/strategy.rs`, kept nearby as a style reference) into a trait every
// concrete strategy implements, discovered and scheduled by the
// `StrategyScheduler` rather than wired directly into `main.rs`.

use crate::assembler::MultiTimeframeData;
use crate::errors::CoreError;
use crate::types::{Candle, Signal, StrategyConfig, Timeframe};

/// A concrete trading strategy. Implementations are expected to be cheap to
/// construct and to hold all working state in `custom_state` (round-tripped
/// through `get_state`/`set_state`) rather than in their own fields, so the
/// Scheduler can persist and rehydrate them uniformly.
pub trait StrategyPlugin: Send {
    /// Called once when the strategy instance is loaded, before any tick or
    /// candle callback.
    fn initialize(&mut self, config: &StrategyConfig) -> Result<(), CoreError>;

    /// Called on every tick for a symbol the strategy subscribes to, after
    /// multi-timeframe data has been assembled and passed consistency
    /// checks. Returning `Ok(None)` means no signal this tick.
    fn on_tick(&mut self, data: &MultiTimeframeData) -> Result<Option<Signal>, CoreError>;

    /// Called whenever a candle completes on one of the strategy's
    /// subscribed timeframes.
    fn on_candle_complete(
        &mut self,
        timeframe: Timeframe,
        candle: &Candle,
        data: &MultiTimeframeData,
    ) -> Result<Option<Signal>, CoreError>;

    /// Called once when the strategy instance is stopped, for any final
    /// bookkeeping (closing open resources, logging a summary).
    fn cleanup(&mut self);

    /// Serialize this strategy's working state for persistence.
    fn get_state(&self) -> serde_json::Value;

    /// Restore working state from a previous `get_state` call, e.g. on
    /// restart rehydration.
    fn set_state(&mut self, state: serde_json::Value) -> Result<(), CoreError>;
}

/// Validates a signal against the strategy's own configuration before it
/// leaves the core. Mirrors `StrategyOrchestrator._validate_signal`.
pub fn validate_signal(signal: &Signal, config: &StrategyConfig) -> Result<(), CoreError> {
    if signal.symbol.is_empty() {
        return Err(CoreError::validation("signal missing symbol"));
    }
    if signal.quantity <= 0.0 {
        return Err(CoreError::validation("signal quantity must be positive"));
    }
    if !config.symbols.contains(&signal.symbol) {
        return Err(CoreError::validation(format!(
            "signal symbol {} is not in the strategy's configured symbols",
            signal.symbol
        )));
    }
    if matches!(signal.order_type, crate::types::OrderType::Limit) && signal.price.is_none() {
        return Err(CoreError::validation("limit order missing price"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, OrderType, SignalType, TradingMode};
    use std::collections::BTreeMap;

    fn sample_config() -> StrategyConfig {
        StrategyConfig {
            strategy_id: "s1".into(),
            account_id: "acct-1".into(),
            plugin_name: "macd_cross".into(),
            trading_mode: TradingMode::Paper,
            symbols: vec!["BTCUSDT".into()],
            timeframes: vec![Timeframe::M1],
            parameters: BTreeMap::new(),
            risk_parameters: None,
        }
    }

    fn sample_signal() -> Signal {
        Signal {
            signal_type: SignalType::Entry,
            direction: Direction::Long,
            symbol: "BTCUSDT".into(),
            quantity: 1.0,
            order_type: OrderType::Market,
            price: None,
            stop_loss: None,
            take_profit: None,
            trailing_stop_pct: None,
            reason: "macd cross".into(),
        }
    }

    #[test]
    fn valid_signal_passes() {
        assert!(validate_signal(&sample_signal(), &sample_config()).is_ok());
    }

    #[test]
    fn rejects_symbol_outside_config() {
        let mut signal = sample_signal();
        signal.symbol = "ETHUSDT".into();
        assert!(validate_signal(&signal, &sample_config()).is_err());
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let mut signal = sample_signal();
        signal.quantity = 0.0;
        assert!(validate_signal(&signal, &sample_config()).is_err());
    }

    #[test]
    fn rejects_limit_order_without_price() {
        let mut signal = sample_signal();
        signal.order_type = OrderType::Limit;
        assert!(validate_signal(&signal, &sample_config()).is_err());
    }

    #[test]
    fn accepts_limit_order_with_price() {
        let mut signal = sample_signal();
        signal.order_type = OrderType::Limit;
        signal.price = Some(100.0);
        assert!(validate_signal(&signal, &sample_config()).is_ok());
    }
}
