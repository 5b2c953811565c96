//! Minimum-variance portfolios, optionally with a return floor.

use tracing::debug;

use super::estimate::{dot, Estimates};
use super::projection::{max_achievable_return, max_return_portfolio, project, Bounds};
use crate::error::ComputeError;

const MAX_ITERATIONS: usize = 20_000;
const CONVERGENCE_TOL: f64 = 1e-13;
const RETURN_TOL: f64 = 1e-9;

/// Accelerated projected gradient (FISTA) on `wᵀΣw − ν·μᵀw`.
///
/// The objective is convex, so the fixed point is the global minimum.
pub(crate) fn solve_penalized(est: &Estimates, nu: f64, bounds: Bounds) -> Vec<f64> {
    let n = est.n();
    // Gershgorin bound on λmax(2Σ)
    let lipschitz = est
        .covariance
        .iter()
        .map(|row| row.iter().map(|c| c.abs()).sum::<f64>())
        .fold(0.0, f64::max)
        * 2.0;
    let step = 1.0 / lipschitz.max(f64::MIN_POSITIVE);

    let mut w = project(&vec![1.0 / n as f64; n], bounds);
    let mut y = w.clone();
    let mut t = 1.0f64;

    for _ in 0..MAX_ITERATIONS {
        let sigma_y = est.cov_times(&y);
        let candidate: Vec<f64> = (0..n)
            .map(|i| y[i] - step * (2.0 * sigma_y[i] - nu * est.expected_returns[i]))
            .collect();
        let next = project(&candidate, bounds);

        let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
        let momentum = (t - 1.0) / t_next;
        let change = next
            .iter()
            .zip(&w)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);

        y = next
            .iter()
            .zip(&w)
            .map(|(a, b)| a + momentum * (a - b))
            .collect();
        w = next;
        t = t_next;

        if change < CONVERGENCE_TOL {
            break;
        }
    }
    w
}

/// Minimize `wᵀΣw`, subject to `μᵀw ≥ target` when a target is given.
///
/// With a binding target the return multiplier ν is found by bisection: the
/// penalized solution's return grows monotonically with ν.
pub fn min_volatility(
    est: &Estimates,
    bounds: Bounds,
    target_return: Option<f64>,
) -> Result<Vec<f64>, ComputeError> {
    let unconstrained = solve_penalized(est, 0.0, bounds);
    let Some(target) = target_return else {
        return Ok(unconstrained);
    };

    let max_ret = max_achievable_return(&est.expected_returns, bounds);
    if target > max_ret + RETURN_TOL {
        return Err(ComputeError::OptimizationFailed(format!(
            "target return {:.2}% is above the maximum achievable {:.2}%",
            target * 100.0,
            max_ret * 100.0
        )));
    }
    if est.portfolio_return(&unconstrained) >= target - RETURN_TOL {
        return Ok(unconstrained);
    }
    if target >= max_ret - RETURN_TOL {
        return Ok(max_return_portfolio(&est.expected_returns, bounds));
    }

    let ret_at = |nu: f64| {
        let w = solve_penalized(est, nu, bounds);
        (dot(&est.expected_returns, &w), w)
    };

    let mut lo = 0.0;
    let mut hi = 1.0;
    let mut best = None;
    for _ in 0..64 {
        let (r, w) = ret_at(hi);
        if r >= target - RETURN_TOL {
            best = Some(w);
            break;
        }
        lo = hi;
        hi *= 2.0;
    }
    let Some(mut best) = best else {
        return Err(ComputeError::OptimizationFailed(format!(
            "could not reach target return {:.2}%",
            target * 100.0
        )));
    };

    for _ in 0..60 {
        let mid = 0.5 * (lo + hi);
        let (r, w) = ret_at(mid);
        if r >= target - RETURN_TOL {
            hi = mid;
            best = w;
        } else {
            lo = mid;
        }
        if hi - lo <= 1e-10 * hi.max(1.0) {
            break;
        }
    }
    debug!(nu = hi, "min volatility target bound");
    Ok(best)
}
