//! Missing-session handling through the full allocator path.
//!
//! Short gaps are forward-filled from the ticker's own last price; a gap longer
//! than the tolerance fails the compute with `DATA_GAP` naming the ticker.

use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use portlab_core::allocator::{Allocator, AllocatorConfig, AllocatorKind, CancelToken, NoProgress};
use portlab_core::data::{PriceService, PriceSource, StaticProvider};
use portlab_core::domain::{AllocatorId, ComputeWindow};
use portlab_core::error::ComputeError;
use serde_json::json;

const GAP_TOLERANCE: usize = 5;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn weekdays(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut date = from;
    while date <= to {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(date);
        }
        date = date.checked_add_days(Days::new(1)).unwrap();
    }
    out
}

fn wave(n: usize, base: f64, amp: f64, freq: f64) -> Vec<f64> {
    (0..n).map(|i| base + amp * (i as f64 * freq).sin()).collect()
}

/// B loses `missing` consecutive sessions starting at index 40.
fn service_with_gap(missing: usize) -> PriceService {
    let dates = weekdays(d(2021, 1, 4), d(2021, 12, 31));
    let a = wave(dates.len(), 100.0, 3.0, 0.31);
    let b = wave(dates.len(), 40.0, 2.0, 0.17);

    let mut b_dates = dates.clone();
    let mut b_prices = b;
    b_dates.drain(40..40 + missing);
    b_prices.drain(40..40 + missing);

    let provider = StaticProvider::new()
        .with_bars("A", StaticProvider::bars_from_closes(&dates, &a))
        .with_bars("B", StaticProvider::bars_from_closes(&b_dates, &b_prices));
    let source = PriceSource::new(Arc::new(provider), 2, GAP_TOLERANCE).unwrap();
    PriceService::new(Arc::new(source))
}

fn min_vol() -> Allocator {
    let config = AllocatorConfig::from_json(
        AllocatorKind::MinVolatility,
        json!({"name": "gaps", "instruments": ["A", "B"]}),
    )
    .unwrap();
    Allocator::new(AllocatorId::from("gaps"), config)
}

fn window() -> ComputeWindow {
    ComputeWindow::new(d(2021, 1, 4), d(2021, 7, 1), d(2021, 12, 31)).unwrap()
}

#[test]
fn single_missing_session_is_filled() {
    let service = service_with_gap(1);
    let portfolio = min_vol()
        .compute(&window(), &service, &NoProgress, &CancelToken::new())
        .unwrap();
    let sum = portfolio.segments()[0].weight_sum();
    assert!((sum - 1.0).abs() < 1e-3);

    let aligned = service
        .load_aligned(&["A".into(), "B".into()], d(2021, 1, 4), d(2021, 7, 1), true)
        .unwrap();
    let b = aligned.tickers.iter().position(|t| t == "B").unwrap();
    assert_eq!(aligned.filled[b].iter().filter(|f| **f).count(), 1);
    assert_eq!(aligned.prices[b][40], aligned.prices[b][39]);
}

#[test]
fn gap_within_tolerance_is_filled() {
    let service = service_with_gap(GAP_TOLERANCE);
    let portfolio = min_vol().compute(&window(), &service, &NoProgress, &CancelToken::new());
    assert!(portfolio.is_ok(), "{portfolio:?}");
}

#[test]
fn long_gap_fails_with_data_gap() {
    let err = min_vol()
        .compute(&window(), &service_with_gap(10), &NoProgress, &CancelToken::new())
        .unwrap_err();
    match &err {
        ComputeError::DataGap { ticker, missing, .. } => {
            assert_eq!(ticker, "B");
            assert_eq!(*missing, 10);
        }
        other => panic!("expected DataGap, got {other:?}"),
    }
    assert_eq!(err.code(), "DATA_GAP");
    assert!(!err.recoverable());
}

#[test]
fn stale_tail_is_a_gap() {
    let dates = weekdays(d(2021, 1, 4), d(2021, 12, 31));
    let cut = dates.len() - 12;
    let provider = StaticProvider::new()
        .with_bars(
            "A",
            StaticProvider::bars_from_closes(&dates, &wave(dates.len(), 100.0, 3.0, 0.31)),
        )
        .with_bars(
            "B",
            StaticProvider::bars_from_closes(&dates[..cut], &wave(cut, 40.0, 2.0, 0.17)),
        );
    let source = PriceSource::new(Arc::new(provider), 2, GAP_TOLERANCE).unwrap();
    let service = PriceService::new(Arc::new(source));

    let err = min_vol()
        .compute(&window(), &service, &NoProgress, &CancelToken::new())
        .unwrap_err();
    assert_eq!(err.code(), "DATA_GAP");
}
