//! Expected returns and shrunk covariance from aligned prices.
//!
//! Covariance uses Ledoit-Wolf shrinkage toward a scaled identity, which keeps
//! the estimate well conditioned when the number of instruments approaches
//! the number of return observations.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::data::AlignedPrices;
use crate::domain::TRADING_DAYS_PER_YEAR;
use crate::error::ComputeError;

/// Annualized inputs for one fit window.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimates {
    pub tickers: Vec<String>,
    /// Mean daily return × 252.
    pub expected_returns: Vec<f64>,
    /// Shrunk daily covariance × 252, row-major `n × n`.
    pub covariance: Vec<Vec<f64>>,
    /// Weight on the identity target, in `[0, 1]`.
    pub shrinkage: f64,
}

impl Estimates {
    pub fn n(&self) -> usize {
        self.tickers.len()
    }

    pub fn portfolio_return(&self, w: &[f64]) -> f64 {
        dot(&self.expected_returns, w)
    }

    pub fn portfolio_variance(&self, w: &[f64]) -> f64 {
        dot(w, &self.cov_times(w))
    }

    /// `Σ w`.
    pub fn cov_times(&self, w: &[f64]) -> Vec<f64> {
        self.covariance.iter().map(|row| dot(row, w)).collect()
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Estimate μ and Σ from a window of aligned prices.
pub fn estimate(prices: &AlignedPrices) -> Result<Estimates, ComputeError> {
    prices.require_observations()?;
    let returns = prices.returns();
    let n = returns.len();
    let t = returns.first().map_or(0, Vec::len);
    if n == 0 || t == 0 {
        return Err(ComputeError::DataInsufficient {
            ticker: prices.tickers.first().cloned().unwrap_or_default(),
            observations: prices.len(),
        });
    }

    let means: Vec<f64> = returns
        .iter()
        .map(|col| col.iter().sum::<f64>() / t as f64)
        .collect();
    let (cov, shrinkage) = ledoit_wolf(&returns, &means);

    let trace: f64 = (0..n).map(|i| cov[i][i]).sum();
    if !(trace > 0.0) || !trace.is_finite() {
        return Err(ComputeError::OptimizationFailed(
            "covariance estimate is degenerate (zero variance across all instruments)".into(),
        ));
    }
    check_psd(&cov)?;

    Ok(Estimates {
        tickers: prices.tickers.clone(),
        expected_returns: means.iter().map(|m| m * TRADING_DAYS_PER_YEAR).collect(),
        covariance: cov
            .into_iter()
            .map(|row| row.into_iter().map(|c| c * TRADING_DAYS_PER_YEAR).collect())
            .collect(),
        shrinkage,
    })
}

/// Daily shrunk covariance and the shrinkage intensity.
///
/// `returns[k]` is the return column of instrument `k`.
fn ledoit_wolf(returns: &[Vec<f64>], means: &[f64]) -> (Vec<Vec<f64>>, f64) {
    let n = returns.len();
    let t = returns[0].len();
    let tf = t as f64;

    // centered observations, row per date
    let x: Vec<Vec<f64>> = (0..t)
        .map(|s| (0..n).map(|k| returns[k][s] - means[k]).collect())
        .collect();

    let mut sample = vec![vec![0.0; n]; n];
    for row in &x {
        for i in 0..n {
            for j in i..n {
                sample[i][j] += row[i] * row[j];
            }
        }
    }
    for i in 0..n {
        for j in i..n {
            sample[i][j] /= tf;
            sample[j][i] = sample[i][j];
        }
    }

    let mu = (0..n).map(|i| sample[i][i]).sum::<f64>() / n as f64;

    // distance of the sample from the target
    let mut delta = 0.0;
    for i in 0..n {
        for j in 0..n {
            let target = if i == j { mu } else { 0.0 };
            delta += (sample[i][j] - target).powi(2);
        }
    }

    // estimation noise of the sample itself
    let mut beta_sum = 0.0;
    for row in &x {
        for i in 0..n {
            for j in 0..n {
                beta_sum += (row[i] * row[j] - sample[i][j]).powi(2);
            }
        }
    }
    let beta = (beta_sum / (tf * tf)).min(delta);

    let shrinkage = if delta > 0.0 && beta > 0.0 {
        (beta / delta).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let shrunk = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    let target = if i == j { mu } else { 0.0 };
                    (1.0 - shrinkage) * sample[i][j] + shrinkage * target
                })
                .collect()
        })
        .collect();
    (shrunk, shrinkage)
}

/// Reject matrices with a negative pivot in an LDLᵀ factorisation.
fn check_psd(cov: &[Vec<f64>]) -> Result<(), ComputeError> {
    let n = cov.len();
    let scale = (0..n).map(|i| cov[i][i].abs()).fold(0.0, f64::max).max(f64::MIN_POSITIVE);
    let tol = 1e-12 * scale;

    let mut l = vec![vec![0.0; n]; n];
    let mut d = vec![0.0; n];
    for j in 0..n {
        let mut dj = cov[j][j];
        for k in 0..j {
            dj -= l[j][k] * l[j][k] * d[k];
        }
        if dj < -tol {
            return Err(ComputeError::OptimizationFailed(format!(
                "covariance is not positive semidefinite (pivot {dj:.3e})"
            )));
        }
        d[j] = dj;
        l[j][j] = 1.0;
        for i in (j + 1)..n {
            let mut v = cov[i][j];
            for k in 0..j {
                v -= l[i][k] * l[j][k] * d[k];
            }
            l[i][j] = if dj > tol { v / dj } else { 0.0 };
        }
    }
    Ok(())
}

/// Connection-scoped memo of estimates keyed by window fingerprint.
#[derive(Default)]
pub struct EstimateCache {
    entries: RwLock<HashMap<String, Arc<Estimates>>>,
}

impl EstimateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Estimates>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn get_or_try_insert(
        &self,
        key: &str,
        compute: impl FnOnce() -> Result<Estimates, ComputeError>,
    ) -> Result<Arc<Estimates>, ComputeError> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let fresh = Arc::new(compute()?);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.entry(key.to_string()).or_insert(fresh).clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
