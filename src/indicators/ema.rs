// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   alpha = 2 / (period + 1)
//   ema_i = (close_i - ema_{i-1}) * alpha + ema_{i-1}
//
// Seeded from the first close, matching `pandas.Series.ewm(adjust=False)`.
// The seed is unstable relative to the true long-run average, so callers
// must hold back at least `required_history(period)` closes before trusting
// the latest value — the underlying recursion itself only needs `period`
// inputs to produce a result at all.
// =============================================================================

/// Minimum closes a caller should accumulate before trusting `calculate_ema`'s
/// most recent value. Twice `period` gives the recursion enough iterations to
/// wash out the first-close seed.
pub fn required_history(period: usize) -> usize {
    period * 2
}

/// Compute the EMA series for the given `closes` slice and look-back `period`.
///
/// Returns one output per input close once `period` is non-zero and at least
/// one close is present; an empty `Vec` otherwise. The first element is the
/// seed (`closes[0]`), matching `ewm(adjust=False)` rather than an SMA-seeded
/// variant.
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.is_empty() {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);

    let mut result = Vec::with_capacity(closes.len());
    let mut prev = closes[0];
    result.push(prev);

    for &close in &closes[1..] {
        let ema = (close - prev) * alpha + prev;
        if !ema.is_finite() {
            // Non-finite value poisons every subsequent recursive step;
            // stop producing further results rather than propagate it.
            break;
        }
        result.push(ema);
        prev = ema;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_empty_input() {
        assert!(calculate_ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_period_zero() {
        assert!(calculate_ema(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn ema_seeds_with_first_close() {
        let closes = vec![2.0, 4.0, 6.0];
        let ema = calculate_ema(&closes, 3);
        assert_eq!(ema[0], 2.0);
    }

    #[test]
    fn ema_known_values() {
        // period = 5 => alpha = 2/6 = 1/3, seeded from the first close.
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ema = calculate_ema(&closes, 5);
        assert_eq!(ema.len(), 10);

        let alpha = 2.0 / 6.0;
        let mut expected = closes[0];
        let mut expected_vec = vec![expected];
        for &c in &closes[1..] {
            expected = (c - expected) * alpha + expected;
            expected_vec.push(expected);
        }
        for (a, b) in ema.iter().zip(expected_vec.iter()) {
            assert!((a - b).abs() < 1e-10, "got {a}, expected {b}");
        }
    }

    #[test]
    fn ema_handles_nan_in_input() {
        let closes = vec![1.0, 2.0, 3.0, f64::NAN, 5.0];
        let ema = calculate_ema(&closes, 3);
        // Seed is closes[0] = 1.0, second and third values compute fine, the
        // NaN poisons the fourth and the recursion stops there.
        assert_eq!(ema.len(), 3);
    }

    #[test]
    fn required_history_is_twice_the_period() {
        assert_eq!(required_history(14), 28);
        assert_eq!(required_history(1), 2);
    }
}
