// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Formula:
//   SMA_t = mean(close_{t-period+1} .. close_t)
//
// Unweighted — every close in the window counts equally. Also the seed for
// `calculate_ema`.
// =============================================================================

/// Compute the SMA series for the given `closes` slice and look-back `period`.
///
/// Returns an empty `Vec` when the input is too short or the period is zero.
/// Each output element corresponds to a close starting at index `period - 1`.
pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    let mut window_sum: f64 = closes[..period].iter().sum();
    result.push(window_sum / period as f64);

    for i in period..closes.len() {
        window_sum += closes[i] - closes[i - period];
        result.push(window_sum / period as f64);
    }

    result
}
