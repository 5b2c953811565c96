//! Feasible set `{ w : Σw = 1, lo ≤ wᵢ ≤ hi }` and projection onto it.

use super::estimate::dot;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lo: f64,
    pub hi: f64,
}

impl Bounds {
    /// `[0, 1]`, or `[-1, 1]` with shorting.
    pub fn for_shorting(allow_shorting: bool) -> Self {
        if allow_shorting {
            Self { lo: -1.0, hi: 1.0 }
        } else {
            Self { lo: 0.0, hi: 1.0 }
        }
    }

    pub fn feasible_for(&self, n: usize) -> bool {
        let n = n as f64;
        n > 0.0 && n * self.lo <= 1.0 && n * self.hi >= 1.0
    }

    pub fn contains(&self, w: f64, tol: f64) -> bool {
        w >= self.lo - tol && w <= self.hi + tol
    }
}

const BISECTION_STEPS: usize = 200;

/// Euclidean projection of `v` onto the bounded simplex.
///
/// The projection is `clamp(vᵢ − τ, lo, hi)` for the unique τ that makes the
/// weights sum to one; τ is found by bisection.
pub fn project(v: &[f64], bounds: Bounds) -> Vec<f64> {
    let sum_at = |tau: f64| -> f64 {
        v.iter()
            .map(|x| (x - tau).clamp(bounds.lo, bounds.hi))
            .sum()
    };

    let vmin = v.iter().copied().fold(f64::INFINITY, f64::min);
    let vmax = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    // sum_at(a) = n·hi ≥ 1, sum_at(b) = n·lo ≤ 1
    let mut a = vmin - bounds.hi;
    let mut b = vmax - bounds.lo;
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (a + b);
        if mid <= a || mid >= b {
            break;
        }
        if sum_at(mid) > 1.0 {
            a = mid;
        } else {
            b = mid;
        }
    }
    let tau = 0.5 * (a + b);
    v.iter()
        .map(|x| (x - tau).clamp(bounds.lo, bounds.hi))
        .collect()
}

/// Portfolio with the highest `μᵀw` in the feasible set.
///
/// Every weight starts at `lo`; the remaining budget goes to the highest
/// returns first, each capped at `hi`. Ties resolve to the lower index.
pub fn max_return_portfolio(mu: &[f64], bounds: Bounds) -> Vec<f64> {
    let n = mu.len();
    let mut w = vec![bounds.lo; n];
    let mut budget = 1.0 - bounds.lo * n as f64;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| mu[j].total_cmp(&mu[i]).then(i.cmp(&j)));
    for i in order {
        if budget <= 0.0 {
            break;
        }
        let add = (bounds.hi - bounds.lo).min(budget);
        w[i] += add;
        budget -= add;
    }
    w
}

pub fn max_achievable_return(mu: &[f64], bounds: Bounds) -> f64 {
    dot(mu, &max_return_portfolio(mu, bounds))
}
