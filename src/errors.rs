// =============================================================================
// Typed, matchable error categories
// =============================================================================
//
// `anyhow` is still used at the top of `main.rs` and for ad-hoc context
// bubbling, but components that need callers to branch on failure kind
// (feed reconnect logic, the strategy scheduler's fault isolation, the risk
// gate) return `CoreError` so a match arm can decide retry vs. pause vs.
// propagate without string-sniffing a message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Network hiccup, timeout, or upstream disconnect — safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Tick or candle data failed a sanity check (stale, out of range,
    /// non-monotonic). The caller should drop the data, not crash.
    #[error("data quality: {0}")]
    DataQuality(String),

    /// A strategy plugin panicked, returned malformed state, or violated its
    /// own manifest contract.
    #[error("plugin '{plugin}' failed: {reason}")]
    Plugin { plugin: String, reason: String },

    /// Input failed schema or range validation before being accepted.
    #[error("validation: {0}")]
    Validation(String),

    /// Unrecoverable — the component that raised this cannot continue.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn transient(msg: impl Into<String>) -> Self {
        CoreError::Transient(msg.into())
    }

    pub fn data_quality(msg: impl Into<String>) -> Self {
        CoreError::DataQuality(msg.into())
    }

    pub fn plugin(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Plugin {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        CoreError::Fatal(msg.into())
    }

    /// Whether a caller driving a retry loop (e.g. the feed reconnector)
    /// should attempt again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(CoreError::transient("timeout").is_retryable());
        assert!(!CoreError::data_quality("stale tick").is_retryable());
        assert!(!CoreError::plugin("macd_cross", "panicked").is_retryable());
        assert!(!CoreError::validation("min > max").is_retryable());
        assert!(!CoreError::fatal("disk full").is_retryable());
    }

    #[test]
    fn display_messages_include_context() {
        let err = CoreError::plugin("macd_cross", "index out of bounds");
        assert_eq!(err.to_string(), "plugin 'macd_cross' failed: index out of bounds");
    }
}
