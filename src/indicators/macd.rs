// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line = EMA(fast) - EMA(slow)
// Signal    = EMA(signal_period) of the MACD line
// Histogram = MACD line - signal
//
// Reuses `ema::calculate_ema` directly: both are seeded from the first
// value and produce one output per input, matching
// `pandas.Series.ewm(adjust=False)`, which is what the MACD reference
// implementation this is ported from uses.

use crate::indicators::ema::calculate_ema as ewm_mean;

/// `(macd, signal, histogram)` at the most recent close, or `None` if there
/// is not enough data (`closes.len() < slow_period + signal_period`) or any
/// period is zero.
pub fn calculate_macd(
    closes: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<(f64, f64, f64)> {
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || fast_period >= slow_period {
        return None;
    }

    let required = slow_period + signal_period;
    if closes.len() < required {
        return None;
    }

    let fast_ema = ewm_mean(closes, fast_period);
    let slow_ema = ewm_mean(closes, slow_period);

    let macd_line: Vec<f64> = fast_ema.iter().zip(slow_ema.iter()).map(|(f, s)| f - s).collect();
    let signal_line = ewm_mean(&macd_line, signal_period);

    let macd = *macd_line.last()?;
    let signal = *signal_line.last()?;
    let histogram = macd - signal;

    if !macd.is_finite() || !signal.is_finite() || !histogram.is_finite() {
        return None;
    }

    Some((macd, signal, histogram))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data_returns_none() {
        let closes = vec![1.0, 2.0, 3.0];
        assert!(calculate_macd(&closes, 12, 26, 9).is_none());
    }

    #[test]
    fn macd_rejects_fast_period_not_less_than_slow() {
        let closes: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        assert!(calculate_macd(&closes, 26, 26, 9).is_none());
        assert!(calculate_macd(&closes, 30, 26, 9).is_none());
    }

    #[test]
    fn macd_rejects_zero_period() {
        let closes: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        assert!(calculate_macd(&closes, 0, 26, 9).is_none());
    }

    #[test]
    fn macd_produces_finite_values_on_ascending_series() {
        let closes: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let (macd, signal, histogram) = calculate_macd(&closes, 12, 26, 9).expect("should compute");
        assert!(macd.is_finite());
        assert!(signal.is_finite());
        assert!(histogram.is_finite());
        // A steadily ascending series keeps the fast EMA above the slow EMA.
        assert!(macd > 0.0);
    }

    #[test]
    fn macd_flat_series_converges_to_zero() {
        let closes = vec![100.0; 100];
        let (macd, signal, histogram) = calculate_macd(&closes, 12, 26, 9).expect("should compute");
        assert!(macd.abs() < 1e-6);
        assert!(signal.abs() < 1e-6);
        assert!(histogram.abs() < 1e-6);
    }

    #[test]
    fn ewm_mean_seeds_with_first_value() {
        let values = vec![10.0, 10.0, 10.0];
        let result = ewm_mean(&values, 5);
        assert_eq!(result[0], 10.0);
    }
}
