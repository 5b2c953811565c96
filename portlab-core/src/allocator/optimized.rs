//! Optimizing allocators: static or periodically refit.
//!
//! Prices for the whole run are fetched once, then each segment's fit window
//! is sliced out of the aligned matrix. A dynamic segment starting at `b` fits
//! on `[b − L, b − 1 day]` where `L = fit_end − fit_start`, so nothing dated on
//! or after `b` can influence its weights.

use chrono::{Days, NaiveDate};
use tracing::debug;

use super::config::OptimizerSettings;
use super::progress::{CancelToken, Phase, PhaseEvent, ProgressSink};
use crate::data::PriceService;
use crate::domain::{ComputeWindow, Portfolio, PortfolioSegment};
use crate::error::ComputeError;
use crate::fingerprint::estimate_key;
use crate::optimize::{estimate, optimize, Objective};
use crate::schedule::{rebalance_boundaries, segment_ranges};

/// Segment date range plus the inclusive fit window feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub fit_start: NaiveDate,
    pub fit_end: NaiveDate,
}

/// Segments and their fit windows for `settings` over `window`.
pub fn plan_segments(
    settings: &OptimizerSettings,
    window: &ComputeWindow,
) -> Result<Vec<SegmentPlan>, ComputeError> {
    let Some(interval) = settings.update_interval else {
        return Ok(vec![SegmentPlan {
            start: window.fit_end,
            end: window.test_end,
            fit_start: window.fit_start,
            fit_end: window.fit_end,
        }]);
    };

    let length = window.fit_length();
    let boundaries = rebalance_boundaries(window.fit_end, window.test_end, interval)?;
    segment_ranges(&boundaries)
        .into_iter()
        .map(|(start, end)| {
            let fit_end = start.checked_sub_days(Days::new(1));
            let fit_start = start.checked_sub_signed(length);
            match (fit_start, fit_end) {
                (Some(fit_start), Some(fit_end)) => Ok(SegmentPlan {
                    start,
                    end,
                    fit_start,
                    fit_end,
                }),
                _ => Err(ComputeError::Validation(format!(
                    "fit window before {start} is out of calendar range"
                ))),
            }
        })
        .collect()
}

pub(crate) fn compute_optimized(
    settings: &OptimizerSettings,
    objective: Objective,
    window: &ComputeWindow,
    prices: &PriceService,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<Portfolio, ComputeError> {
    let plans = plan_segments(settings, window)?;
    let span_start = plans
        .iter()
        .map(|p| p.fit_start)
        .min()
        .unwrap_or(window.fit_start);
    let adjusted = settings.use_adjusted_close;

    cancel.check()?;
    progress.emit(PhaseEvent::phase(Phase::Fetching));
    let aligned = prices.load_aligned(&settings.instruments, span_start, window.test_end, adjusted)?;

    let total = plans.len();
    let mut segments = Vec::with_capacity(total);
    for (i, plan) in plans.iter().enumerate() {
        cancel.check()?;
        progress.emit(PhaseEvent::optimizing(i + 1, total));

        let key = estimate_key(
            &settings.instruments,
            adjusted,
            span_start,
            plan.fit_start,
            plan.fit_end,
        );
        let est = prices.estimates().get_or_try_insert(&key, || {
            estimate(&aligned.slice(plan.fit_start, plan.fit_end))
        })?;
        let weights = optimize(&est, objective, settings.allow_shorting)?;
        debug!(
            segment = i + 1,
            total_segments = total,
            start = %plan.start,
            shrinkage = est.shrinkage,
            "segment optimized"
        );
        segments.push(PortfolioSegment::new(plan.start, plan.end, weights)?);
    }
    Portfolio::from_segments(segments)
}
