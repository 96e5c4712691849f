// =============================================================================
// Strategy Scheduler — plugin lifecycle, fault isolation, fleet pause
// =============================================================================
//
// Ported from `StrategyOrchestrator`: `load_strategy`/`execute_on_tick`/
// `execute_on_candle_complete`/`pause_strategy`/`_validate_signal`/
// `_handle_strategy_error`/`_check_concurrent_limit`. Each loaded strategy
// holds its plugin instance behind a `tokio::sync::Mutex` so the scheduler
// can guarantee callbacks for one strategy never run concurrently with each
// other (per-strategy serialization, §5) while different strategies still
// run in parallel across the worker pool driving this scheduler.
//
// Fault isolation wraps every plugin callback in `catch_unwind` in addition
// to propagating `Err` results: a plugin that panics outright must not take
// the whole scheduler down with it, only its own instance.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use crate::assembler::MultiTimeframeData;
use crate::errors::CoreError;
use crate::risk::RiskGate;
use crate::strategy::manifest::validate_parameters;
use crate::strategy::plugin::{validate_signal, StrategyPlugin};
use crate::strategy::registry::PluginRegistry;
use crate::strategy::state::StrategyStateStore;
use crate::types::{Candle, Signal, StrategyConfig, StrategyInstance, StrategyStatus, Timeframe, TradingMode};

struct LoadedStrategy {
    plugin: AsyncMutex<Box<dyn StrategyPlugin + Send>>,
    instance: RwLock<StrategyInstance>,
}

/// The operational heart of the core: loads strategy plugins, routes tick
/// and candle-complete events to them, isolates their failures, and
/// persists their state.
pub struct StrategyScheduler {
    registry: RwLock<PluginRegistry>,
    strategies: RwLock<HashMap<String, Arc<LoadedStrategy>>>,
    state_store: StrategyStateStore,
    risk_gate: Arc<RiskGate>,
    default_max_concurrent: HashMap<TradingMode, u32>,
}

impl StrategyScheduler {
    pub fn new(
        registry: PluginRegistry,
        state_store: StrategyStateStore,
        risk_gate: Arc<RiskGate>,
        default_max_concurrent: HashMap<TradingMode, u32>,
    ) -> Self {
        Self {
            registry: RwLock::new(registry),
            strategies: RwLock::new(HashMap::new()),
            state_store,
            risk_gate,
            default_max_concurrent,
        }
    }

    /// Replace the plugin registry wholesale — backs the `reload_plugins`
    /// operation (§6). Already-loaded strategy instances are unaffected;
    /// only future `load` calls see the new set of plugins.
    pub fn reload_plugins(&self, registry: PluginRegistry) {
        *self.registry.write() = registry;
        info!("plugin registry reloaded");
    }

    fn running_count(&self, account_id: &str, trading_mode: TradingMode) -> u32 {
        self.strategies
            .read()
            .values()
            .filter(|s| {
                let instance = s.instance.read();
                instance.config.account_id == account_id
                    && instance.config.trading_mode == trading_mode
                    && instance.status == StrategyStatus::Running
            })
            .count() as u32
    }

    /// Load protocol (§4.6): reject duplicates, resolve the plugin, validate
    /// parameters against its manifest, consult the Risk Gate, then
    /// instantiate and register.
    pub fn load(&self, config: StrategyConfig) -> Result<(), CoreError> {
        if self.strategies.read().contains_key(&config.strategy_id) {
            return Err(CoreError::validation(format!(
                "strategy '{}' is already loaded",
                config.strategy_id
            )));
        }

        let registry = self.registry.read();
        let manifest = registry
            .manifest(&config.plugin_name)
            .ok_or_else(|| CoreError::validation(format!("unknown plugin '{}'", config.plugin_name)))?;
        validate_parameters(manifest, &config.parameters)?;

        let running = self.running_count(&config.account_id, config.trading_mode);
        let default_cap = self
            .default_max_concurrent
            .get(&config.trading_mode)
            .copied()
            .unwrap_or(5);
        let (ok, reason) = self
            .risk_gate
            .can_activate(&config.account_id, config.trading_mode, running, default_cap);
        if !ok {
            return Err(CoreError::validation(reason.unwrap_or_else(|| "activation denied".to_string())));
        }

        let mut plugin = registry.instantiate(&config.plugin_name)?;
        drop(registry);

        plugin.initialize(&config).map_err(|e| CoreError::plugin(config.plugin_name.clone(), e.to_string()))?;

        let now = Utc::now();
        let instance = StrategyInstance {
            config: config.clone(),
            status: StrategyStatus::Running,
            custom_state: plugin.get_state(),
            started_at: now,
            last_update: now,
            last_error: None,
        };

        self.state_store
            .save_state(&instance)
            .map_err(|e| CoreError::fatal(format!("failed to persist strategy state: {e}")))?;

        self.strategies.write().insert(
            config.strategy_id.clone(),
            Arc::new(LoadedStrategy {
                plugin: AsyncMutex::new(plugin),
                instance: RwLock::new(instance),
            }),
        );

        info!(strategy_id = %config.strategy_id, plugin = %config.plugin_name, "strategy loaded");
        Ok(())
    }

    fn get(&self, strategy_id: &str) -> Option<Arc<LoadedStrategy>> {
        self.strategies.read().get(strategy_id).cloned()
    }

    /// Execute `on_tick` for `strategy_id` if it is currently running and the
    /// assembled data passes a freshness check the caller already ran.
    /// Returns `Ok(None)` for "nothing to do" (not running, no signal);
    /// `Err` only for a fault that the caller should log — the instance
    /// itself has already been paused and marked `error` by this point.
    pub async fn execute_on_tick(&self, strategy_id: &str, data: &MultiTimeframeData) -> Result<Option<Signal>, CoreError> {
        let Some(loaded) = self.get(strategy_id) else {
            return Ok(None);
        };
        if loaded.instance.read().status != StrategyStatus::Running {
            return Ok(None);
        }

        let mut plugin = loaded.plugin.lock().await;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| plugin.on_tick(data)));
        self.handle_callback_result(strategy_id, &loaded, &mut plugin, result).await
    }

    /// Execute `on_candle_complete` for `strategy_id` under the same
    /// isolation boundary as `execute_on_tick`.
    pub async fn execute_on_candle_complete(
        &self,
        strategy_id: &str,
        timeframe: Timeframe,
        candle: &Candle,
        data: &MultiTimeframeData,
    ) -> Result<Option<Signal>, CoreError> {
        let Some(loaded) = self.get(strategy_id) else {
            return Ok(None);
        };
        if loaded.instance.read().status != StrategyStatus::Running {
            return Ok(None);
        }

        let mut plugin = loaded.plugin.lock().await;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| plugin.on_candle_complete(timeframe, candle, data)));
        self.handle_callback_result(strategy_id, &loaded, &mut plugin, result).await
    }

    async fn handle_callback_result(
        &self,
        strategy_id: &str,
        loaded: &Arc<LoadedStrategy>,
        plugin: &mut Box<dyn StrategyPlugin + Send>,
        result: std::thread::Result<Result<Option<Signal>, CoreError>>,
    ) -> Result<Option<Signal>, CoreError> {
        let callback_result = match result {
            Ok(r) => r,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "plugin panicked".to_string());
                Err(CoreError::plugin(strategy_id, msg))
            }
        };

        match callback_result {
            Ok(Some(signal)) => {
                let config = loaded.instance.read().config.clone();
                match validate_signal(&signal, &config) {
                    Ok(()) => {
                        self.flush_state(strategy_id, loaded, plugin, None);
                        Ok(Some(signal))
                    }
                    Err(e) => {
                        warn!(strategy_id, error = %e, "dropping invalid signal");
                        self.flush_state(strategy_id, loaded, plugin, None);
                        Ok(None)
                    }
                }
            }
            Ok(None) => {
                self.flush_state(strategy_id, loaded, plugin, None);
                Ok(None)
            }
            Err(e) => {
                error!(strategy_id, error = %e, "strategy callback failed, pausing and marking error");
                self.flush_state(strategy_id, loaded, plugin, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn flush_state(&self, strategy_id: &str, loaded: &Arc<LoadedStrategy>, plugin: &Box<dyn StrategyPlugin + Send>, error: Option<String>) {
        let mut instance = loaded.instance.write();
        instance.custom_state = plugin.get_state();
        instance.last_update = Utc::now();
        if let Some(reason) = error {
            instance.status = StrategyStatus::Error;
            instance.last_error = Some(reason);
        }
        let snapshot = instance.clone();
        drop(instance);

        if let Err(e) = self.state_store.save_state(&snapshot) {
            error!(strategy_id, error = %e, "failed to persist strategy state after callback");
        }
    }

    /// Durable pause: status -> paused, callbacks become no-ops.
    pub fn pause(&self, strategy_id: &str) -> Result<(), CoreError> {
        let loaded = self
            .get(strategy_id)
            .ok_or_else(|| CoreError::validation(format!("unknown strategy '{strategy_id}'")))?;
        let mut instance = loaded.instance.write();
        instance.status = StrategyStatus::Paused;
        instance.last_update = Utc::now();
        let snapshot = instance.clone();
        drop(instance);
        self.state_store
            .save_state(&snapshot)
            .map_err(|e| CoreError::fatal(e.to_string()))?;
        Ok(())
    }

    /// Resume requires the strategy currently be paused.
    pub fn resume(&self, strategy_id: &str) -> Result<(), CoreError> {
        let loaded = self
            .get(strategy_id)
            .ok_or_else(|| CoreError::validation(format!("unknown strategy '{strategy_id}'")))?;
        let mut instance = loaded.instance.write();
        if instance.status != StrategyStatus::Paused {
            return Err(CoreError::validation(format!(
                "strategy '{strategy_id}' is not paused (status = {})",
                instance.status
            )));
        }
        instance.status = StrategyStatus::Running;
        instance.last_update = Utc::now();
        let snapshot = instance.clone();
        drop(instance);
        self.state_store
            .save_state(&snapshot)
            .map_err(|e| CoreError::fatal(e.to_string()))?;
        Ok(())
    }

    /// Stop calls `cleanup()` then removes the instance from the active set.
    pub async fn stop(&self, strategy_id: &str) -> Result<(), CoreError> {
        let loaded = {
            let mut strategies = self.strategies.write();
            strategies
                .remove(strategy_id)
                .ok_or_else(|| CoreError::validation(format!("unknown strategy '{strategy_id}'")))?
        };

        let mut plugin = loaded.plugin.lock().await;
        plugin.cleanup();

        let mut instance = loaded.instance.write();
        instance.status = StrategyStatus::Stopped;
        instance.last_update = Utc::now();
        let snapshot = instance.clone();
        drop(instance);

        self.state_store
            .save_state(&snapshot)
            .map_err(|e| CoreError::fatal(e.to_string()))?;
        Ok(())
    }

    /// Pause every running strategy for `(account_id, trading_mode)`.
    /// Returns the count paused. Invoked when the Risk Gate reports a
    /// breach for that pair.
    pub fn pause_fleet(&self, account_id: &str, trading_mode: TradingMode, reason: &str) -> usize {
        let strategies = self.strategies.read();
        let mut paused = 0usize;

        for loaded in strategies.values() {
            let mut instance = loaded.instance.write();
            let matches = instance.config.account_id == account_id
                && instance.config.trading_mode == trading_mode
                && instance.status == StrategyStatus::Running;
            if !matches {
                continue;
            }
            instance.status = StrategyStatus::Paused;
            instance.last_update = Utc::now();
            let snapshot = instance.clone();
            drop(instance);

            if let Err(e) = self.state_store.save_state(&snapshot) {
                error!(strategy_id = %snapshot.config.strategy_id, error = %e, "failed to persist fleet-paused strategy");
            }
            paused += 1;
        }

        if paused > 0 {
            warn!(account_id, trading_mode = %trading_mode, reason, paused, "fleet paused");
        }

        paused
    }

    /// Rehydrate every strategy recorded as active in the state store: read
    /// back its config/status/custom_state, re-initialize its plugin, and
    /// call `set_state` post-`initialize`, per §4.6's restart protocol.
    pub fn rehydrate(&self) -> Result<usize, CoreError> {
        let active_ids = self
            .state_store
            .get_active_strategies()
            .map_err(|e| CoreError::fatal(e.to_string()))?;

        let mut restored = 0usize;
        for strategy_id in active_ids {
            let Some(instance) = self
                .state_store
                .load_state(&strategy_id)
                .map_err(|e| CoreError::fatal(e.to_string()))?
            else {
                continue;
            };

            let registry = self.registry.read();
            let Some(_manifest) = registry.manifest(&instance.config.plugin_name) else {
                warn!(strategy_id, plugin = %instance.config.plugin_name, "cannot rehydrate: plugin no longer registered");
                continue;
            };
            let mut plugin = registry.instantiate(&instance.config.plugin_name)?;
            drop(registry);

            plugin
                .initialize(&instance.config)
                .map_err(|e| CoreError::plugin(instance.config.plugin_name.clone(), e.to_string()))?;
            plugin
                .set_state(instance.custom_state.clone())
                .map_err(|e| CoreError::plugin(instance.config.plugin_name.clone(), e.to_string()))?;

            self.strategies.write().insert(
                strategy_id.clone(),
                Arc::new(LoadedStrategy {
                    plugin: AsyncMutex::new(plugin),
                    instance: RwLock::new(instance),
                }),
            );
            restored += 1;
            info!(strategy_id, "strategy rehydrated");
        }

        Ok(restored)
    }

    pub fn status(&self, strategy_id: &str) -> Option<StrategyStatus> {
        self.get(strategy_id).map(|l| l.instance.read().status)
    }

    pub fn instance_snapshot(&self, strategy_id: &str) -> Option<StrategyInstance> {
        self.get(strategy_id).map(|l| l.instance.read().clone())
    }

    /// Strategy ids subscribed (by configured symbol list) to `symbol`,
    /// used by the event-routing loop in `main.rs` to find which strategies
    /// to invoke for a given tick or candle completion.
    pub fn strategies_for_symbol(&self, symbol: &str) -> Vec<String> {
        self.strategies
            .read()
            .iter()
            .filter(|(_, loaded)| loaded.instance.read().config.symbols.iter().any(|s| s == symbol))
            .map(|(id, _)| id.clone())
            .collect()
    }
}
