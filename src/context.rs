// =============================================================================
// Core Context — central handle tying every subsystem together
// =============================================================================
//
// Generalizes `AppState`'s role as the single source of truth an engine's
// async tasks all hold an `Arc` to. Where `AppState` owned dashboard-facing
// snapshot state for one hardcoded strategy, `CoreContext` owns the explicit
// handles the redesign note calls for in place of global singletons: the
// Candle Aggregator, Distribution Bus, Indicator Engine, Strategy Scheduler,
// Risk Gate, and the loaded configuration, each wrapped in the `Arc` its own
// interior mutability already provides.
//
// This is the one place in the crate that is allowed to know about every
// component at once; individual modules stay leaves that depend on at most
// the ones below them in the dependency order (Risk Gate never depends on
// the Scheduler, the Scheduler depends on the Risk Gate, etc).

use std::sync::Arc;

use tracing::info;

use crate::candle::CandleAggregator;
use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::distribution::DistributionBus;
use crate::indicators::engine::IndicatorEngine;
use crate::risk::RiskGate;
use crate::strategy::registry::PluginRegistry;
use crate::strategy::scheduler::StrategyScheduler;
use crate::strategy::state::StrategyStateStore;
use crate::types::TradingMode;

pub struct CoreContext {
    pub config: CoreConfig,
    pub candle_aggregator: Arc<CandleAggregator>,
    pub distribution_bus: Arc<DistributionBus>,
    pub indicator_engine: Arc<IndicatorEngine>,
    pub risk_gate: Arc<RiskGate>,
    pub scheduler: Arc<StrategyScheduler>,
    pub clock: Arc<dyn Clock>,
}

impl CoreContext {
    /// Build every subsystem from `config`, reading "now" from the real
    /// system clock. See [`Self::with_clock`] for replay runs.
    pub fn new(config: CoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build every subsystem from `config`, discovering plugins under
    /// `config.scheduler.plugin_dir` and opening the strategy state store at
    /// `config.scheduler.state_dir`. Registered plugin constructors must be
    /// added separately via `scheduler.reload_plugins` once the caller has
    /// built its in-binary plugin set — discovery only supplies manifests.
    /// `clock` is the "now" source `assembler()`'s consistency check reads
    /// from — a replay run passes a `ReplayClock` driven by the feed instead
    /// of the default `SystemClock`.
    pub fn with_clock(config: CoreConfig, clock: Arc<dyn Clock>) -> Self {
        let candle_aggregator = Arc::new(CandleAggregator::new(config.candle.lookback));
        let distribution_bus = Arc::new(DistributionBus::new());
        let indicator_engine = Arc::new(IndicatorEngine::new(std::time::Duration::from_secs(
            config.indicator.cache_ttl_secs,
        )));

        let risk_gate = Arc::new(RiskGate::new());
        risk_gate.set_max_concurrent(TradingMode::Paper, config.scheduler.default_max_concurrent_paper);
        risk_gate.set_max_concurrent(TradingMode::Live, config.scheduler.default_max_concurrent_live);

        let state_store = StrategyStateStore::new(&config.scheduler.state_dir)
            .expect("failed to open strategy state directory");

        let registry = PluginRegistry::new();
        let mut default_max_concurrent = std::collections::HashMap::new();
        default_max_concurrent.insert(TradingMode::Paper, config.scheduler.default_max_concurrent_paper);
        default_max_concurrent.insert(TradingMode::Live, config.scheduler.default_max_concurrent_live);

        let scheduler = Arc::new(StrategyScheduler::new(
            registry,
            state_store,
            risk_gate.clone(),
            default_max_concurrent,
        ));

        info!(plugin_dir = %config.scheduler.plugin_dir, state_dir = %config.scheduler.state_dir, "core context built");

        Self {
            config,
            candle_aggregator,
            distribution_bus,
            indicator_engine,
            risk_gate,
            scheduler,
            clock,
        }
    }

    /// Build a Multi-Timeframe Assembler bound to this context's aggregator,
    /// indicator engine and clock, using the configured lookback and
    /// freshness window. Cheap: holds only references, construct one per
    /// call site.
    pub fn assembler(&self) -> crate::assembler::MultiTimeframeAssembler<'_> {
        crate::assembler::MultiTimeframeAssembler::new(
            &self.candle_aggregator,
            self.config.candle.lookback,
            self.config.candle.consistency_freshness_secs,
        )
        .with_indicator_engine(&self.indicator_engine)
        .with_clock(self.clock.as_ref())
    }

    /// Apply a realized loss/gain delta for `(account_id, trading_mode)` and
    /// pause that fleet if this call trips a breach. Callers in the event
    /// loop should invoke this whenever a strategy reports a filled exit.
    pub fn record_loss_and_enforce(&self, account_id: &str, trading_mode: TradingMode, delta: f64) {
        if let Some(key) = self.risk_gate.record_loss_delta(account_id, trading_mode, delta) {
            self.scheduler.pause_fleet(&key.account_id, key.trading_mode, "risk limit breached");
        }
    }
}
