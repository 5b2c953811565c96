//! PortLab Core — domain types, price data, mean-variance optimizer, allocators.
//!
//! This crate contains everything needed to turn an allocator configuration
//! and a fit/test window into a time-segmented portfolio:
//! - Domain types (weights, segments, portfolios, price series, requests)
//! - Point-in-time price data with memory and Parquet cache tiers
//! - Covariance shrinkage and deterministic mean-variance solvers
//! - Rebalance scheduling for periodically refit allocators
//! - Manual, max-Sharpe, and min-volatility allocators

pub mod allocator;
pub mod data;
pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod optimize;
pub mod schedule;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything a compute task carries across threads
    /// is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Portfolio>();
        require_sync::<domain::Portfolio>();
        require_send::<domain::PortfolioSegment>();
        require_sync::<domain::PortfolioSegment>();
        require_send::<domain::PriceSeries>();
        require_sync::<domain::PriceSeries>();
        require_send::<domain::ComputeRequest>();
        require_sync::<domain::ComputeRequest>();
        require_send::<error::ComputeError>();
        require_sync::<error::ComputeError>();

        // Data layer
        require_send::<data::PriceService>();
        require_sync::<data::PriceService>();
        require_send::<data::PriceSource>();
        require_sync::<data::PriceSource>();
        require_send::<data::AlignedPrices>();
        require_sync::<data::AlignedPrices>();
        require_send::<data::ParquetCache>();
        require_sync::<data::ParquetCache>();

        // Optimizer
        require_send::<optimize::Estimates>();
        require_sync::<optimize::Estimates>();
        require_send::<optimize::EstimateCache>();
        require_sync::<optimize::EstimateCache>();

        // Allocators
        require_send::<allocator::Allocator>();
        require_sync::<allocator::Allocator>();
        require_send::<allocator::CancelToken>();
        require_sync::<allocator::CancelToken>();
        require_send::<allocator::RecordingProgress>();
        require_sync::<allocator::RecordingProgress>();
    }

    /// Allocators see prices only through `PriceService`, which hands out
    /// ranges the caller asks for; fit windows end strictly before the
    /// segment they feed.
    #[test]
    fn fit_windows_never_reach_their_segment() {
        use allocator::{plan_segments, OptimizerSettings};
        use chrono::NaiveDate;
        use schedule::{IntervalUnit, UpdateInterval};

        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        let window = domain::ComputeWindow::new(d(2018, 1, 1), d(2019, 1, 1), d(2021, 6, 30)).unwrap();
        for unit in [IntervalUnit::Days, IntervalUnit::Weeks, IntervalUnit::Months] {
            let settings = OptimizerSettings {
                name: "x".into(),
                instruments: vec!["A".into()],
                allow_shorting: false,
                use_adjusted_close: true,
                update_interval: Some(UpdateInterval::new(7, unit).unwrap()),
            };
            for plan in plan_segments(&settings, &window).unwrap() {
                assert!(plan.fit_end < plan.start);
                assert!(plan.fit_start < plan.fit_end);
            }
        }
    }
}
