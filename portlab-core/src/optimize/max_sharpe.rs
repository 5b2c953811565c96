//! Tangency (maximum Sharpe ratio) portfolio.
//!
//! The Sharpe ratio `(μᵀw − r_f) / √(wᵀΣw)` is quasi-concave wherever the
//! excess return is positive, so projected gradient ascent started from a
//! portfolio with positive excess return climbs to the global maximum.

use super::estimate::{dot, Estimates};
use super::projection::{max_achievable_return, max_return_portfolio, project, Bounds};
use crate::error::ComputeError;

const MAX_ITERATIONS: usize = 10_000;
const CONVERGENCE_TOL: f64 = 1e-12;
const ARMIJO_C: f64 = 1e-4;
const MIN_VARIANCE: f64 = 1e-18;

fn sharpe(est: &Estimates, w: &[f64], risk_free: f64) -> Option<f64> {
    let var = est.portfolio_variance(w);
    (var > MIN_VARIANCE).then(|| (est.portfolio_return(w) - risk_free) / var.sqrt())
}

/// ∇s = μ/σ − (μᵀw − r_f)·Σw/σ³
fn sharpe_gradient(est: &Estimates, w: &[f64], risk_free: f64) -> Vec<f64> {
    let sigma_w = est.cov_times(w);
    let var = dot(w, &sigma_w);
    let sd = var.sqrt();
    let excess = dot(&est.expected_returns, w) - risk_free;
    est.expected_returns
        .iter()
        .zip(&sigma_w)
        .map(|(m, s)| m / sd - excess * s / (var * sd))
        .collect()
}

pub fn max_sharpe(
    est: &Estimates,
    bounds: Bounds,
    risk_free: f64,
) -> Result<Vec<f64>, ComputeError> {
    let n = est.n();
    let max_ret = max_achievable_return(&est.expected_returns, bounds);
    if max_ret <= risk_free {
        return Err(ComputeError::OptimizationFailed(format!(
            "no portfolio beats the risk-free rate (best expected return {:.2}%)",
            max_ret * 100.0
        )));
    }

    let equal = project(&vec![1.0 / n as f64; n], bounds);
    let mut w = if est.portfolio_return(&equal) > risk_free {
        equal
    } else {
        max_return_portfolio(&est.expected_returns, bounds)
    };
    let mut current = sharpe(est, &w, risk_free).ok_or_else(|| {
        ComputeError::OptimizationFailed("starting portfolio has zero variance".into())
    })?;

    let mut step = 1.0;
    for _ in 0..MAX_ITERATIONS {
        let grad = sharpe_gradient(est, &w, risk_free);

        let mut accepted = None;
        let mut trial = step;
        for _ in 0..60 {
            let candidate: Vec<f64> = w.iter().zip(&grad).map(|(x, g)| x + trial * g).collect();
            let next = project(&candidate, bounds);
            let moved: Vec<f64> = next.iter().zip(&w).map(|(a, b)| a - b).collect();
            if let Some(value) = sharpe(est, &next, risk_free) {
                if value >= current + ARMIJO_C * dot(&grad, &moved) {
                    accepted = Some((next, value, moved));
                    break;
                }
            }
            trial *= 0.5;
        }

        let Some((next, value, moved)) = accepted else {
            break;
        };
        let change = moved.iter().map(|d| d.abs()).fold(0.0, f64::max);
        w = next;
        current = value;
        // let the step grow back after easy iterations
        step = (trial * 2.0).min(1e6);
        if change < CONVERGENCE_TOL {
            break;
        }
    }

    if est.portfolio_variance(&w) <= MIN_VARIANCE {
        return Err(ComputeError::OptimizationFailed(
            "optimal portfolio has zero variance".into(),
        ));
    }
    Ok(w)
}
