// =============================================================================
// Configuration — every tunable setting for the core, hot-reloadable via an
// atomic tmp + rename save/load cycle.
// =============================================================================
//
// All fields carry `#[serde(default = "...")]` so that adding a new field
// never breaks loading an older config file on disk.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}

fn default_feed_kind() -> String {
    "live".to_string()
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

fn default_reconnect_interval_secs() -> u64 {
    30
}

fn default_tick_buffer_size() -> usize {
    4096
}

fn default_candle_lookback() -> usize {
    500
}

fn default_indicator_cache_ttl_secs() -> u64 {
    5
}

fn default_strategy_state_ttl_secs() -> u64 {
    86_400
}

fn default_consistency_freshness_secs() -> i64 {
    60
}

fn default_max_concurrent_paper() -> u32 {
    10
}

fn default_max_concurrent_live() -> u32 {
    5
}

fn default_plugin_dir() -> String {
    "strategies".to_string()
}

fn default_state_dir() -> String {
    "state".to_string()
}

// =============================================================================
// FeedConfig
// =============================================================================

/// Settings for the Feed Connector: which adapter to run and its reconnect
/// policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// `"live"` for the websocket adapter, `"replay"` for the simulated one.
    #[serde(default = "default_feed_kind")]
    pub kind: String,

    /// Symbols subscribed to at startup.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Bounded reconnect attempts before the Feed Connector gives up and
    /// raises a fatal error.
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,

    /// Fixed interval between reconnect attempts (immediate first attempt,
    /// then this interval between each subsequent one).
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Capacity of the internal tick channel between the adapter task and
    /// the Candle Aggregator.
    #[serde(default = "default_tick_buffer_size")]
    pub tick_buffer_size: usize,

    /// Path to a recorded tick file, only used when `kind == "replay"`.
    #[serde(default)]
    pub replay_file: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: default_feed_kind(),
            symbols: default_symbols(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            tick_buffer_size: default_tick_buffer_size(),
            replay_file: None,
        }
    }
}

// =============================================================================
// CandleConfig
// =============================================================================

/// Settings for the Candle Aggregator / Multi-Timeframe Assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleConfig {
    /// Number of completed candles retained per `(symbol, timeframe)`.
    #[serde(default = "default_candle_lookback")]
    pub lookback: usize,

    /// Maximum age, in seconds, a forming candle or historical close may have
    /// before `ensure_consistency` flags it as stale.
    #[serde(default = "default_consistency_freshness_secs")]
    pub consistency_freshness_secs: i64,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            lookback: default_candle_lookback(),
            consistency_freshness_secs: default_consistency_freshness_secs(),
        }
    }
}

// =============================================================================
// IndicatorConfig
// =============================================================================

/// Settings for the Indicator Engine's advisory cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// TTL, in seconds, for a cached indicator value before it is treated as
    /// a miss and recomputed. The cache is advisory only: a miss never fails
    /// the caller, it just recomputes from the candle buffer.
    #[serde(default = "default_indicator_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_indicator_cache_ttl_secs(),
        }
    }
}

// =============================================================================
// StrategyConfig (scheduler-wide settings, distinct from a single strategy's
// own `types::StrategyConfig`)
// =============================================================================

/// Scheduler-wide settings: plugin discovery, state persistence, concurrency
/// caps per trading mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Directory scanned for strategy plugin manifests.
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: String,

    /// Directory persisted strategy state files are written under.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// TTL, in seconds, for a persisted strategy state entry. An entry older
    /// than this at rehydration time is treated as a fresh-init with a
    /// warning, not a fatal error.
    #[serde(default = "default_strategy_state_ttl_secs")]
    pub state_ttl_secs: u64,

    /// Default maximum concurrent strategy instances for paper trading,
    /// used when no `StrategyLimits` row exists for a trading mode yet.
    #[serde(default = "default_max_concurrent_paper")]
    pub default_max_concurrent_paper: u32,

    /// Default maximum concurrent strategy instances for live trading.
    #[serde(default = "default_max_concurrent_live")]
    pub default_max_concurrent_live: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            state_dir: default_state_dir(),
            state_ttl_secs: default_strategy_state_ttl_secs(),
            default_max_concurrent_paper: default_max_concurrent_paper(),
            default_max_concurrent_live: default_max_concurrent_live(),
        }
    }
}

// =============================================================================
// CoreConfig — top level
// =============================================================================

/// Top-level configuration for the core. Every field has a serde default so
/// older JSON files missing new sections still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub candle: CandleConfig,

    #[serde(default)]
    pub indicator: IndicatorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl CoreConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            feed_kind = %config.feed.kind,
            symbols = ?config.feed.symbols,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Per-trading-mode default concurrency cap, used to seed a
    /// `StrategyLimits` row the first time a trading mode is seen.
    pub fn default_max_concurrent(&self, mode: crate::types::TradingMode) -> u32 {
        match mode {
            crate::types::TradingMode::Paper => self.scheduler.default_max_concurrent_paper,
            crate::types::TradingMode::Live => self.scheduler.default_max_concurrent_live,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.feed.kind, "live");
        assert_eq!(cfg.feed.symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(cfg.feed.reconnect_max_attempts, 10);
        assert_eq!(cfg.feed.reconnect_interval_secs, 30);
        assert_eq!(cfg.candle.lookback, 500);
        assert_eq!(cfg.indicator.cache_ttl_secs, 5);
        assert_eq!(cfg.scheduler.state_ttl_secs, 86_400);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: CoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.feed.kind, "live");
        assert_eq!(cfg.scheduler.default_max_concurrent_live, 5);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "feed": { "kind": "replay", "replay_file": "ticks.jsonl" } }"#;
        let cfg: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.feed.kind, "replay");
        assert_eq!(cfg.feed.replay_file.as_deref(), Some("ticks.jsonl"));
        assert_eq!(cfg.feed.reconnect_max_attempts, 10);
        assert_eq!(cfg.candle.lookback, 500);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = CoreConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.feed.symbols, cfg2.feed.symbols);
        assert_eq!(cfg.scheduler.state_ttl_secs, cfg2.scheduler.state_ttl_secs);
    }

    #[test]
    fn default_max_concurrent_differs_by_trading_mode() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.default_max_concurrent(crate::types::TradingMode::Paper), 10);
        assert_eq!(cfg.default_max_concurrent(crate::types::TradingMode::Live), 5);
    }
}
