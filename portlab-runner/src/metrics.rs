//! Return-curve statistics — pure functions over a wealth curve.
//!
//! Every metric is a pure function: wealth curve (starting at 1.0) and/or daily
//! returns in, scalar fraction out. No dependencies on sessions, caches, or the
//! optimizer.

use portlab_core::domain::TRADING_DAYS_PER_YEAR;

/// Calendar days per year for CAGR.
pub const DAYS_PER_YEAR: f64 = 365.25;

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(wealth: &[f64]) -> f64 {
    match (wealth.first(), wealth.last()) {
        (Some(&initial), Some(&final_w)) if wealth.len() >= 2 && initial > 0.0 => {
            (final_w - initial) / initial
        }
        _ => 0.0,
    }
}

/// Compound annual growth rate over `days_elapsed` calendar days.
///
/// Returns 0.0 when no time has elapsed or the curve is wiped out.
pub fn cagr(wealth: &[f64], days_elapsed: i64) -> f64 {
    if days_elapsed <= 0 {
        return 0.0;
    }
    let growth = 1.0 + total_return(wealth);
    if growth <= 0.0 {
        return 0.0;
    }
    let years = days_elapsed as f64 / DAYS_PER_YEAR;
    growth.powf(1.0 / years) - 1.0
}

/// Sample standard deviation of daily returns, annualized with √252.
pub fn annualized_volatility(returns: &[f64]) -> f64 {
    std_dev(returns) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// (annualized return − risk-free) / volatility; 0.0 when volatility is zero.
pub fn sharpe_ratio(annualized_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    if volatility < 1e-15 {
        return 0.0;
    }
    (annualized_return - risk_free_rate) / volatility
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
///
/// Returns 0.0 if wealth is constant or monotonically increasing.
pub fn max_drawdown(wealth: &[f64]) -> f64 {
    let Some(&first) = wealth.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;

    for &w in wealth {
        if w > peak {
            peak = w;
        }
        if peak > 0.0 {
            let dd = (w - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Compute daily returns from a wealth curve.
pub fn daily_returns(wealth: &[f64]) -> Vec<f64> {
    wealth
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
