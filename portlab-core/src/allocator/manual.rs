//! Fixed-weight allocator.

use tracing::warn;

use super::config::ManualConfig;
use crate::domain::{ComputeWindow, Portfolio, PortfolioSegment, Weights};
use crate::error::ComputeError;

/// Manual weights further than this from a full allocation are logged.
const ALLOCATION_SUM_TOLERANCE: f64 = 0.01;

/// One segment over `[fit_end, test_end]` holding the configured weights.
///
/// Weights that do not sum to 1 are accepted as given.
pub(crate) fn compute_manual(
    config: &ManualConfig,
    window: &ComputeWindow,
) -> Result<Portfolio, ComputeError> {
    if config.allocations.is_empty() {
        return Err(ComputeError::Validation(format!(
            "manual allocator '{}' has no allocations",
            config.name
        )));
    }
    if let Some(sum) = off_target_sum(&config.allocations) {
        warn!(
            name = %config.name,
            sum,
            "manual allocations do not sum to 1; using them as given"
        );
    }
    let segment = PortfolioSegment::new(window.fit_end, window.test_end, config.allocations.clone())?;
    Portfolio::from_segments(vec![segment])
}

/// The weight sum, when it is more than the tolerance away from 1.
fn off_target_sum(allocations: &Weights) -> Option<f64> {
    let sum: f64 = allocations.values().sum();
    ((sum - 1.0).abs() > ALLOCATION_SUM_TOLERANCE).then_some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn config(pairs: &[(&str, f64)]) -> ManualConfig {
        ManualConfig {
            name: "m".into(),
            allocations: pairs.iter().map(|(t, w)| (t.to_string(), *w)).collect(),
        }
    }

    fn window() -> ComputeWindow {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        ComputeWindow::new(d(2020, 1, 2), d(2021, 1, 4), d(2022, 1, 3)).unwrap()
    }

    #[test]
    fn sums_near_one_are_on_target() {
        assert_eq!(off_target_sum(&config(&[("A", 0.6), ("B", 0.4)]).allocations), None);
        assert_eq!(off_target_sum(&config(&[("A", 0.6), ("B", 0.395)]).allocations), None);
    }

    #[test]
    fn partial_allocation_is_flagged() {
        let sum = off_target_sum(&config(&[("A", 0.5), ("B", 0.4)]).allocations).unwrap();
        assert!((sum - 0.9).abs() < 1e-12);
    }

    #[test]
    fn partial_allocation_is_still_computed() {
        let portfolio = compute_manual(&config(&[("A", 0.5), ("B", 0.4)]), &window()).unwrap();
        assert_eq!(portfolio.segments().len(), 1);
        assert!((portfolio.segments()[0].weight_sum() - 0.9).abs() < 1e-12);
        assert_eq!(portfolio.start_date(), window().fit_end);
        assert_eq!(portfolio.end_date(), window().test_end);
    }

    #[test]
    fn empty_allocations_are_rejected() {
        let err = compute_manual(&config(&[]), &window()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
