//! Mean-variance optimization engine.
//!
//! All solvers are deterministic: fixed starting points, fixed iteration
//! limits, no random restarts. Identical estimates always give bit-identical
//! weights.

pub mod clean;
pub mod estimate;
pub mod max_sharpe;
pub mod min_volatility;
pub mod projection;

pub use clean::{clean_weights, WEIGHT_EPSILON};
pub use estimate::{estimate, EstimateCache, Estimates};
pub use projection::Bounds;

use crate::domain::{Weights, RISK_FREE_RATE};
use crate::error::ComputeError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Objective {
    MaxSharpe,
    /// `target_return` is annual, as a fraction (0.10 = 10%).
    MinVolatility { target_return: Option<f64> },
}

/// Solve and clean.
pub fn optimize(
    est: &Estimates,
    objective: Objective,
    allow_shorting: bool,
) -> Result<Weights, ComputeError> {
    let bounds = Bounds::for_shorting(allow_shorting);
    if !bounds.feasible_for(est.n()) {
        return Err(ComputeError::OptimizationFailed(format!(
            "no feasible portfolio for {} instrument(s)",
            est.n()
        )));
    }
    let raw = match objective {
        Objective::MaxSharpe => max_sharpe::max_sharpe(est, bounds, RISK_FREE_RATE)?,
        Objective::MinVolatility { target_return } => {
            min_volatility::min_volatility(est, bounds, target_return)?
        }
    };
    if raw.iter().any(|w| !w.is_finite()) {
        return Err(ComputeError::OptimizationFailed(
            "solver produced non-finite weights".into(),
        ));
    }
    clean_weights(&est.tickers, &raw, bounds)
}
