//! Post-solve weight cleaning.

use super::projection::{project, Bounds};
use crate::domain::Weights;
use crate::error::ComputeError;

/// Weights with magnitude below this are treated as solver noise.
pub const WEIGHT_EPSILON: f64 = 1e-4;

/// Zero out tiny weights, renormalize to sum 1, and key by ticker.
///
/// Renormalizing can push a surviving weight past `bounds` when shorting is
/// on, so the survivors are projected back onto the bounded simplex. Zeroed
/// tickers stay in the map with weight 0 so every segment reports the full
/// instrument set.
pub fn clean_weights(
    tickers: &[String],
    raw: &[f64],
    bounds: Bounds,
) -> Result<Weights, ComputeError> {
    let kept: Vec<f64> = raw
        .iter()
        .map(|&w| if w.abs() < WEIGHT_EPSILON { 0.0 } else { w })
        .collect();
    let total: f64 = kept.iter().sum();
    if !total.is_finite() || total.abs() < 1e-9 {
        return Err(ComputeError::OptimizationFailed(
            "optimizer returned weights that sum to zero".into(),
        ));
    }

    let live: Vec<usize> = (0..kept.len()).filter(|&i| kept[i] != 0.0).collect();
    let scaled: Vec<f64> = live.iter().map(|&i| kept[i] / total).collect();
    let mut cleaned = vec![0.0; kept.len()];
    for (&i, w) in live.iter().zip(project(&scaled, bounds)) {
        cleaned[i] = w;
    }

    Ok(tickers.iter().cloned().zip(cleaned).collect())
}
