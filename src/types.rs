// =============================================================================
// Shared data model for the market data and strategy execution core
// =============================================================================

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Timeframe
// =============================================================================

/// One of the seven supported candle timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::D1,
    ];

    /// Width of this timeframe in minutes. `D1` is handled specially by the
    /// bucketing function (it floors to midnight rather than a minute
    /// multiple) but the width is still meaningful for display/ordering.
    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::D1 => 1440,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Timeframe> {
        match s {
            "1m" => Some(Timeframe::M1),
            "3m" => Some(Timeframe::M3),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "30m" => Some(Timeframe::M30),
            "1h" => Some(Timeframe::H1),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tick
// =============================================================================

/// One atomic price + volume update from the upstream feed. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Candle
// =============================================================================

/// OHLCV bar for a `(symbol, timeframe)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub forming: bool,
}

impl Candle {
    /// Seed a brand-new forming candle from the first tick of a bar.
    pub fn from_tick(tick: &Tick, timeframe: Timeframe, start: DateTime<Utc>) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            timeframe,
            start,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
            forming: true,
        }
    }

    /// Fold another tick from the same bar into this forming candle.
    pub fn update_with_tick(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.volume += tick.volume;
    }
}

// =============================================================================
// Indicator Value
// =============================================================================

/// The scalar, vector, or record result of an indicator computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum IndicatorOutput {
    Scalar(f64),
    Triple {
        a: f64,
        b: f64,
        c: f64,
    },
}

/// `(symbol, timeframe, type, params, value, timestamp)`, keyed externally by
/// its fingerprint (see `indicators::engine::fingerprint`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub indicator_type: String,
    pub params: BTreeMap<String, String>,
    pub value: IndicatorOutput,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Subscription
// =============================================================================

/// A subscriber's interest in a `(symbol, timeframes)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber_id: String,
    pub symbol: String,
    pub timeframes: HashSet<Timeframe>,
    pub exchange: String,
}

impl Subscription {
    pub fn new(subscriber_id: impl Into<String>, symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            symbol: symbol.into(),
            timeframes: HashSet::new(),
            exchange: exchange.into(),
        }
    }
}

// =============================================================================
// Trading mode / status enums
// =============================================================================

/// Whether a strategy instance trades on a simulated ledger or a live account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Paper,
    Live,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

/// Lifecycle status of a Strategy Instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Running,
    Paused,
    Error,
    Stopped,
}

impl std::fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyStatus::Running => write!(f, "running"),
            StrategyStatus::Paused => write!(f, "paused"),
            StrategyStatus::Error => write!(f, "error"),
            StrategyStatus::Stopped => write!(f, "stopped"),
        }
    }
}

// =============================================================================
// Strategy Instance
// =============================================================================

/// Configuration supplied at `load` time — everything a strategy plugin needs
/// to be instantiated and scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_id: String,
    pub account_id: String,
    pub plugin_name: String,
    pub trading_mode: TradingMode,
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// Per-strategy position sizing and exit rules. Distinct from the
    /// account-level `RiskLimits` circuit breaker keyed by `RiskKey`: this
    /// governs how one strategy sizes and exits its own trades, the circuit
    /// breaker governs when an account/mode pair gets paused outright.
    #[serde(default)]
    pub risk_parameters: Option<RiskParameters>,
}

/// Per-strategy risk parameters, carried alongside a `StrategyConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParameters {
    pub max_position_size: f64,
    pub max_loss_per_trade: f64,
    pub stop_loss_percentage: Option<f64>,
    pub take_profit_percentage: Option<f64>,
    pub trailing_stop_percentage: Option<f64>,
}

/// A live, owned strategy instance tracked by the Strategy Scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyInstance {
    pub config: StrategyConfig,
    pub status: StrategyStatus,
    /// Opaque to the Scheduler; round-tripped through `get_state`/`set_state`.
    pub custom_state: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl StrategyInstance {
    pub fn id(&self) -> &str {
        &self.config.strategy_id
    }
}

// =============================================================================
// Risk Limits / Strategy Limits
// =============================================================================

/// Composite key every risk record and concurrency cap lookup is indexed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RiskKey {
    pub account_id: String,
    pub trading_mode: TradingMode,
}

impl RiskKey {
    pub fn new(account_id: impl Into<String>, trading_mode: TradingMode) -> Self {
        Self {
            account_id: account_id.into(),
            trading_mode,
        }
    }
}

/// Per-`(account_id, trading_mode)` loss tracking and breach state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_loss: f64,
    pub current_loss: f64,
    pub breached: bool,
    pub breached_at: Option<DateTime<Utc>>,
    pub acknowledged: bool,
}

impl RiskLimits {
    pub fn new(max_loss: f64) -> Self {
        Self {
            max_loss,
            current_loss: 0.0,
            breached: false,
            breached_at: None,
            acknowledged: true,
        }
    }
}

/// Per-`trading_mode` concurrency cap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StrategyLimits {
    pub max_concurrent: u32,
}

// =============================================================================
// Signal
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// A strategy callback's intent to enter or exit a position. Validated by the
/// Scheduler before being handed off to the external order processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub direction: Direction,
    pub symbol: String,
    pub quantity: f64,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    pub reason: String,
}

// =============================================================================
// Misc shared types retained from the original account/balance model
// =============================================================================

/// Balance snapshot for a single asset — kept for the external order processor
/// boundary (§6 signal/order contract); the core itself does not interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_roundtrips_through_str() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::parse(tf.as_str()), Some(tf));
        }
    }

    #[test]
    fn timeframe_minutes_are_increasing() {
        let minutes: Vec<i64> = Timeframe::ALL.iter().map(|tf| tf.minutes()).collect();
        for window in minutes.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn candle_from_tick_seeds_ohlc_from_single_price() {
        let tick = Tick {
            symbol: "X".into(),
            price: 100.0,
            volume: 10.0,
            timestamp: Utc::now(),
        };
        let candle = Candle::from_tick(&tick, Timeframe::M1, tick.timestamp);
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.high, 100.0);
        assert_eq!(candle.low, 100.0);
        assert_eq!(candle.close, 100.0);
        assert_eq!(candle.volume, 10.0);
        assert!(candle.forming);
    }

    #[test]
    fn candle_update_with_tick_extends_high_low_and_accumulates_volume() {
        let t0 = Utc::now();
        let first = Tick {
            symbol: "X".into(),
            price: 100.0,
            volume: 10.0,
            timestamp: t0,
        };
        let mut candle = Candle::from_tick(&first, Timeframe::M1, t0);

        candle.update_with_tick(&Tick {
            symbol: "X".into(),
            price: 102.0,
            volume: 5.0,
            timestamp: t0,
        });
        candle.update_with_tick(&Tick {
            symbol: "X".into(),
            price: 99.0,
            volume: 7.0,
            timestamp: t0,
        });

        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.high, 102.0);
        assert_eq!(candle.low, 99.0);
        assert_eq!(candle.close, 99.0);
        assert_eq!(candle.volume, 22.0);
    }

    #[test]
    fn risk_limits_start_unbreached() {
        let limits = RiskLimits::new(1000.0);
        assert!(!limits.breached);
        assert_eq!(limits.current_loss, 0.0);
    }
}
