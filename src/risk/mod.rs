// =============================================================================
// Risk Gate — loss-limit circuit breaker + concurrent-strategy enforcement
// =============================================================================
//
// Generalizes `RiskEngine`'s single-flat-account circuit breaker (one
// `RwLock<Inner>` guarding atomic breach detection) into a map keyed by
// `(account_id, trading_mode)`, per `shared/models/risk_management.py`'s
// `RiskLimits`/`StrategyLimits` table definitions. Breach detection and the
// write that flips `breached` happen under the same write-lock acquisition
// so a concurrent `record_loss_delta` can never observe a half-applied
// breach, matching the teacher's single-writer-lock discipline.
//
// This module does not hold a handle back to the Strategy Scheduler — doing
// so would invert the dependency order in which these components are built
// (Risk Gate is a leaf, the Scheduler depends on it, not the reverse). A
// breach is surfaced to the caller of `record_loss_delta` as the `RiskKey`
// that just tripped; the caller (the wiring in `main.rs`) is responsible for
// invoking `StrategyScheduler::pause_fleet` for that key. This mirrors the
// "coroutine/callback tangles -> channels" redesign: the breach event is
// data returned up the call stack, not a callback invoked sideways into
// another component.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::{RiskKey, RiskLimits, StrategyLimits, TradingMode};

/// Loss-limit tracking and concurrency caps, keyed by `(account_id,
/// trading_mode)` and `trading_mode` respectively.
pub struct RiskGate {
    limits: RwLock<HashMap<RiskKey, RiskLimits>>,
    strategy_limits: RwLock<HashMap<TradingMode, StrategyLimits>>,
}

impl RiskGate {
    pub fn new() -> Self {
        Self {
            limits: RwLock::new(HashMap::new()),
            strategy_limits: RwLock::new(HashMap::new()),
        }
    }

    /// Set (or replace) the concurrency cap for a trading mode. Consulted by
    /// `can_activate`; modes with no explicit cap fall back to whatever the
    /// caller passes as `default_max_concurrent` there.
    pub fn set_max_concurrent(&self, trading_mode: TradingMode, max_concurrent: u32) {
        self.strategy_limits
            .write()
            .insert(trading_mode, StrategyLimits { max_concurrent });
    }

    /// Set (or replace) the max-loss threshold for `(account_id,
    /// trading_mode)`. A fresh `RiskLimits` row starts unbreached.
    pub fn set_max_loss(&self, account_id: &str, trading_mode: TradingMode, amount: f64) {
        let key = RiskKey::new(account_id, trading_mode);
        let mut limits = self.limits.write();
        limits
            .entry(key)
            .and_modify(|l| l.max_loss = amount)
            .or_insert_with(|| RiskLimits::new(amount));
    }

    /// Apply a loss delta (positive = more loss) to `(account_id,
    /// trading_mode)` and check for breach atomically. Returns the key if
    /// this call is the one that flipped `breached` from `false` to `true`
    /// — the caller must pause that fleet. Returns `None` if the pair was
    /// already breached, is not yet tracked, or remains under the limit.
    pub fn record_loss_delta(&self, account_id: &str, trading_mode: TradingMode, delta: f64) -> Option<RiskKey> {
        let key = RiskKey::new(account_id, trading_mode);
        let mut limits = self.limits.write();
        let entry = limits.entry(key.clone()).or_insert_with(|| RiskLimits::new(f64::MAX));
        entry.current_loss += delta;

        if !entry.breached && entry.current_loss >= entry.max_loss {
            entry.breached = true;
            entry.breached_at = Some(Utc::now());
            entry.acknowledged = false;
            tracing::warn!(
                account_id,
                trading_mode = %trading_mode,
                current_loss = entry.current_loss,
                max_loss = entry.max_loss,
                "risk limit breached"
            );
            return Some(key);
        }

        None
    }

    /// Re-evaluate breach status for `(account_id, trading_mode)` without
    /// applying a new delta — idempotent, safe to call repeatedly. Returns
    /// the current `breached` flag.
    pub fn check_and_breach(&self, account_id: &str, trading_mode: TradingMode) -> bool {
        let key = RiskKey::new(account_id, trading_mode);
        let mut limits = self.limits.write();
        let Some(entry) = limits.get_mut(&key) else {
            return false;
        };

        if !entry.breached && entry.current_loss >= entry.max_loss {
            entry.breached = true;
            entry.breached_at = Some(Utc::now());
            entry.acknowledged = false;
        }

        entry.breached
    }

    /// Clear a breach, optionally raising the limit at the same time.
    /// Activations for this pair resume once this returns.
    pub fn acknowledge(&self, account_id: &str, trading_mode: TradingMode, new_limit: Option<f64>) {
        let key = RiskKey::new(account_id, trading_mode);
        let mut limits = self.limits.write();
        if let Some(entry) = limits.get_mut(&key) {
            entry.breached = false;
            entry.breached_at = None;
            entry.acknowledged = true;
            if let Some(new_limit) = new_limit {
                entry.max_loss = new_limit;
            }
        }
    }

    /// Whether a strategy may be activated for `(account_id, trading_mode)`.
    /// `running_count` is the number of currently-running strategies for
    /// that pair, supplied by the Scheduler (which owns that count) so this
    /// gate never needs a handle back to it. Checks breach status first,
    /// then the concurrency cap.
    pub fn can_activate(&self, account_id: &str, trading_mode: TradingMode, running_count: u32, default_max_concurrent: u32) -> (bool, Option<String>) {
        let key = RiskKey::new(account_id, trading_mode);
        if let Some(entry) = self.limits.read().get(&key) {
            if entry.breached {
                return (false, Some("limit breached".to_string()));
            }
        }

        let max_concurrent = self
            .strategy_limits
            .read()
            .get(&trading_mode)
            .map(|l| l.max_concurrent)
            .unwrap_or(default_max_concurrent);

        if running_count >= max_concurrent {
            return (
                false,
                Some(format!(
                    "concurrent strategy limit reached: {running_count} >= {max_concurrent}"
                )),
            );
        }

        (true, None)
    }

    pub fn limits_for(&self, account_id: &str, trading_mode: TradingMode) -> Option<RiskLimits> {
        self.limits.read().get(&RiskKey::new(account_id, trading_mode)).cloned()
    }

    pub fn breached_since(&self, account_id: &str, trading_mode: TradingMode) -> Option<DateTime<Utc>> {
        self.limits
            .read()
            .get(&RiskKey::new(account_id, trading_mode))
            .and_then(|l| l.breached_at)
    }
}

impl Default for RiskGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breach_flips_exactly_once() {
        let gate = RiskGate::new();
        gate.set_max_loss("acct-1", TradingMode::Paper, 100.0);

        assert!(gate.record_loss_delta("acct-1", TradingMode::Paper, 60.0).is_none());
        let breach = gate.record_loss_delta("acct-1", TradingMode::Paper, 60.0);
        assert!(breach.is_some());

        // Already breached — further losses do not re-report a breach.
        assert!(gate.record_loss_delta("acct-1", TradingMode::Paper, 10.0).is_none());
    }

    #[test]
    fn can_activate_false_while_breached() {
        let gate = RiskGate::new();
        gate.set_max_loss("acct-1", TradingMode::Paper, 100.0);
        gate.record_loss_delta("acct-1", TradingMode::Paper, 150.0);

        let (ok, reason) = gate.can_activate("acct-1", TradingMode::Paper, 0, 5);
        assert!(!ok);
        assert_eq!(reason.as_deref(), Some("limit breached"));
    }

    #[test]
    fn acknowledge_clears_breach_and_can_raise_limit() {
        let gate = RiskGate::new();
        gate.set_max_loss("acct-1", TradingMode::Paper, 100.0);
        gate.record_loss_delta("acct-1", TradingMode::Paper, 150.0);

        gate.acknowledge("acct-1", TradingMode::Paper, Some(500.0));

        let (ok, _) = gate.can_activate("acct-1", TradingMode::Paper, 0, 5);
        assert!(ok);
        assert_eq!(gate.limits_for("acct-1", TradingMode::Paper).unwrap().max_loss, 500.0);
    }

    #[test]
    fn can_activate_false_at_concurrency_cap() {
        let gate = RiskGate::new();
        gate.set_max_concurrent(TradingMode::Paper, 2);

        let (ok, _) = gate.can_activate("acct-1", TradingMode::Paper, 2, 5);
        assert!(!ok);
        let (ok, _) = gate.can_activate("acct-1", TradingMode::Paper, 1, 5);
        assert!(ok);
    }

    #[test]
    fn unset_account_defaults_to_unbreached_and_under_cap() {
        let gate = RiskGate::new();
        let (ok, reason) = gate.can_activate("fresh-acct", TradingMode::Live, 0, 5);
        assert!(ok);
        assert!(reason.is_none());
    }

    #[test]
    fn check_and_breach_is_idempotent() {
        let gate = RiskGate::new();
        gate.set_max_loss("acct-1", TradingMode::Paper, 100.0);
        gate.record_loss_delta("acct-1", TradingMode::Paper, 150.0);

        assert!(gate.check_and_breach("acct-1", TradingMode::Paper));
        assert!(gate.check_and_breach("acct-1", TradingMode::Paper));
    }
}
