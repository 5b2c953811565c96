//! Single compute pipeline: allocator → analyzer.
//!
//! Synchronous and CPU-bound; the session runs it on the blocking pool.

use portlab_core::allocator::{Allocator, CancelToken, Phase, PhaseEvent, ProgressSink};
use portlab_core::data::PriceService;
use portlab_core::domain::{AllocatorId, ComputeWindow, Portfolio};
use portlab_core::error::ComputeError;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::performance::{analyze, PerformanceReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeResult {
    pub allocator_id: AllocatorId,
    pub segments: Portfolio,
    pub performance: PerformanceReport,
}

/// Compute `allocator` over `window` and measure it out of sample.
///
/// Performance uses dividend-adjusted prices when `include_dividends` is set,
/// independent of the price flavour the optimizer fit on.
pub fn run_compute(
    allocator: &Allocator,
    window: &ComputeWindow,
    include_dividends: bool,
    prices: &PriceService,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ComputeResult, ComputeError> {
    let portfolio = allocator.compute(window, prices, progress, cancel)?;

    cancel.check()?;
    progress.emit(PhaseEvent::phase(Phase::Metrics));
    let held: Vec<String> = portfolio
        .segments()
        .iter()
        .flat_map(|s| s.weights.iter())
        .filter(|(_, w)| **w != 0.0)
        .map(|(t, _)| t.clone())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    let aligned = prices.load_aligned(
        &held,
        portfolio.start_date(),
        portfolio.end_date(),
        include_dividends,
    )?;
    let performance = analyze(&portfolio, &aligned)?;

    cancel.check()?;
    info!(
        allocator_id = %allocator.id,
        segments = portfolio.segments().len(),
        total_return = performance.stats.as_ref().map_or(0.0, |s| s.total_return),
        "compute finished"
    );
    progress.emit(PhaseEvent::phase(Phase::Complete));

    Ok(ComputeResult {
        allocator_id: allocator.id.clone(),
        segments: portfolio,
        performance,
    })
}
