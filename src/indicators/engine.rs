// =============================================================================
// Indicator Engine — registry + advisory fingerprinted TTL cache
// =============================================================================
//
// The cache is advisory only, never authoritative: a miss (expired entry,
// first request, or eviction) always falls through to recomputing straight
// from the candle buffer. Nothing downstream may treat a cache hit as
// required for correctness — it exists purely to avoid recomputing the same
// indicator for every subscriber reading the same (symbol, timeframe) tick.
//
// Keyed state behind a single `RwLock`, mirroring `RiskEngine`'s
// single-write-lock-guarded `Inner` struct, generalized here to a map keyed
// by a computed fingerprint instead of one flat account's state.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::indicators::{bollinger, ema, macd, rsi, sma};
use crate::types::{IndicatorOutput, IndicatorValue, Timeframe};

/// Compute a stable cache key from an indicator's identity.
pub fn fingerprint(symbol: &str, timeframe: Timeframe, indicator_type: &str, params: &BTreeMap<String, String>) -> String {
    let mut key = format!("{symbol}:{timeframe}:{indicator_type}");
    for (k, v) in params {
        key.push(':');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

struct CacheEntry {
    value: IndicatorValue,
    inserted_at: Instant,
}

/// Registry of indicator formulas plus an advisory TTL cache keyed by
/// fingerprint.
pub struct IndicatorEngine {
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl IndicatorEngine {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a cached value by fingerprint. Returns `None` on a genuine
    /// miss or an expired entry — callers must always be prepared to
    /// recompute, the cache is advisory.
    fn cached(&self, key: &str) -> Option<IndicatorValue> {
        let cache = self.cache.read();
        let entry = cache.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    fn store(&self, key: String, value: IndicatorValue) {
        let mut cache = self.cache.write();
        cache.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Evict expired entries. Purely a memory-bound housekeeping step; never
    /// required for correctness since every read already checks freshness.
    pub fn evict_expired(&self) {
        let mut cache = self.cache.write();
        cache.retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
    }

    /// Drop every cached value for `(symbol, timeframe)`. Called on candle
    /// completion so a strategy reading indicators just after a bar closes
    /// gets a value computed over the now-extended closes series rather
    /// than whatever was cached against the candle still forming.
    pub fn invalidate(&self, symbol: &str, timeframe: Timeframe) {
        let prefix = format!("{symbol}:{timeframe}:");
        let mut cache = self.cache.write();
        cache.retain(|key, _| !key.starts_with(&prefix));
    }

    /// SMA read-through: serve from cache if fresh, else recompute from
    /// `closes` and repopulate the cache.
    pub fn sma(&self, symbol: &str, timeframe: Timeframe, period: usize, closes: &[f64]) -> Option<f64> {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), period.to_string());
        let key = fingerprint(symbol, timeframe, "SMA", &params);

        if let Some(cached) = self.cached(&key) {
            if let IndicatorOutput::Scalar(v) = cached.value {
                return Some(v);
            }
        }

        let series = sma::calculate_sma(closes, period);
        let value = *series.last()?;

        self.store(
            key,
            IndicatorValue {
                symbol: symbol.to_string(),
                timeframe,
                indicator_type: "SMA".to_string(),
                params,
                value: IndicatorOutput::Scalar(value),
                timestamp: chrono::Utc::now(),
            },
        );

        Some(value)
    }

    /// EMA read-through (see [`sma`] for cache semantics).
    pub fn ema(&self, symbol: &str, timeframe: Timeframe, period: usize, closes: &[f64]) -> Option<f64> {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), period.to_string());
        let key = fingerprint(symbol, timeframe, "EMA", &params);

        if let Some(cached) = self.cached(&key) {
            if let IndicatorOutput::Scalar(v) = cached.value {
                return Some(v);
            }
        }

        if closes.len() < ema::required_history(period) {
            return None;
        }
        let series = ema::calculate_ema(closes, period);
        let value = *series.last()?;

        self.store(
            key,
            IndicatorValue {
                symbol: symbol.to_string(),
                timeframe,
                indicator_type: "EMA".to_string(),
                params,
                value: IndicatorOutput::Scalar(value),
                timestamp: chrono::Utc::now(),
            },
        );

        Some(value)
    }

    /// RSI read-through.
    pub fn rsi(&self, symbol: &str, timeframe: Timeframe, period: usize, closes: &[f64]) -> Option<f64> {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), period.to_string());
        let key = fingerprint(symbol, timeframe, "RSI", &params);

        if let Some(cached) = self.cached(&key) {
            if let IndicatorOutput::Scalar(v) = cached.value {
                return Some(v);
            }
        }

        let value = *rsi::calculate_rsi(closes, period).last()?;

        self.store(
            key,
            IndicatorValue {
                symbol: symbol.to_string(),
                timeframe,
                indicator_type: "RSI".to_string(),
                params,
                value: IndicatorOutput::Scalar(value),
                timestamp: chrono::Utc::now(),
            },
        );

        Some(value)
    }

    /// MACD read-through, returning `(macd, signal, histogram)`.
    pub fn macd(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        fast: usize,
        slow: usize,
        signal_period: usize,
        closes: &[f64],
    ) -> Option<(f64, f64, f64)> {
        let mut params = BTreeMap::new();
        params.insert("fast".to_string(), fast.to_string());
        params.insert("slow".to_string(), slow.to_string());
        params.insert("signal".to_string(), signal_period.to_string());
        let key = fingerprint(symbol, timeframe, "MACD", &params);

        if let Some(cached) = self.cached(&key) {
            if let IndicatorOutput::Triple { a, b, c } = cached.value {
                return Some((a, b, c));
            }
        }

        let (m, s, h) = macd::calculate_macd(closes, fast, slow, signal_period)?;

        self.store(
            key,
            IndicatorValue {
                symbol: symbol.to_string(),
                timeframe,
                indicator_type: "MACD".to_string(),
                params,
                value: IndicatorOutput::Triple { a: m, b: s, c: h },
                timestamp: chrono::Utc::now(),
            },
        );

        Some((m, s, h))
    }

    /// Bollinger Bands read-through, returning `(upper, middle, lower)`.
    pub fn bollinger(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        period: usize,
        std_dev: f64,
        closes: &[f64],
    ) -> Option<(f64, f64, f64)> {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), period.to_string());
        params.insert("std_dev".to_string(), std_dev.to_string());
        let key = fingerprint(symbol, timeframe, "BB", &params);

        if let Some(cached) = self.cached(&key) {
            if let IndicatorOutput::Triple { a, b, c } = cached.value {
                return Some((a, b, c));
            }
        }

        let bands = bollinger::calculate_bollinger(closes, period, std_dev)?;

        self.store(
            key,
            IndicatorValue {
                symbol: symbol.to_string(),
                timeframe,
                indicator_type: "BB".to_string(),
                params,
                value: IndicatorOutput::Triple {
                    a: bands.upper,
                    b: bands.middle,
                    c: bands.lower,
                },
                timestamp: chrono::Utc::now(),
            },
        );

        Some((bands.upper, bands.middle, bands.lower))
    }
}
