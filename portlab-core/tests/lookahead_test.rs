//! Look-ahead contamination tests for periodically refit allocators.
//!
//! Invariant: the weights of a segment starting at boundary `b` may not depend
//! on any price dated on or after `b`.
//!
//! Method: run once on baseline prices, then again after rewriting every price
//! dated on or after boundary `b_i`. Segments `0..=i` must be bit-identical
//! between both runs; later segments, whose fit windows see the rewritten
//! prices, must move.

use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use portlab_core::allocator::{Allocator, AllocatorConfig, AllocatorKind, CancelToken, NoProgress};
use portlab_core::data::{PriceService, PriceSource, StaticProvider};
use portlab_core::domain::{AllocatorId, ComputeWindow, Portfolio};
use serde_json::json;

// ── Fixtures ─────────────────────────────────────────────────────────

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

/// Deterministic noise in [-1, 1] from a simple LCG.
fn noise(stream: u64, i: usize) -> f64 {
    let seed = (i as u64)
        .wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    ((seed >> 33) % 2001) as f64 / 1000.0 - 1.0
}

fn compound(returns: &[f64], start: f64) -> Vec<f64> {
    let mut price = start;
    returns
        .iter()
        .map(|r| {
            price *= 1.0 + r;
            price
        })
        .collect()
}

/// Returns for A (calm) and B (volatile). With `shock_from`, A alternates
/// ±5% on and after that date.
fn price_paths(dates: &[NaiveDate], shock_from: Option<NaiveDate>) -> (Vec<f64>, Vec<f64>) {
    let a: Vec<f64> = dates
        .iter()
        .enumerate()
        .map(|(i, date)| match shock_from {
            Some(b) if *date >= b => {
                if i % 2 == 0 {
                    0.05
                } else {
                    -0.05
                }
            }
            _ => 0.0002 + 0.004 * noise(1, i),
        })
        .collect();
    let b: Vec<f64> = (0..dates.len())
        .map(|i| 0.0003 + 0.015 * noise(2, i))
        .collect();
    (compound(&a, 100.0), compound(&b, 50.0))
}

fn service_for(dates: &[NaiveDate], shock_from: Option<NaiveDate>) -> PriceService {
    let (a, b) = price_paths(dates, shock_from);
    let provider = StaticProvider::new()
        .with_bars("A", StaticProvider::bars_from_closes(dates, &a))
        .with_bars("B", StaticProvider::bars_from_closes(dates, &b));
    let source = PriceSource::new(Arc::new(provider), 2, 5).unwrap();
    PriceService::new(Arc::new(source))
}

fn monthly_min_vol() -> Allocator {
    let config = AllocatorConfig::from_json(
        AllocatorKind::MinVolatility,
        json!({
            "name": "monthly min vol",
            "instruments": ["A", "B"],
            "update_interval": {"value": 1, "unit": "months"}
        }),
    )
    .unwrap();
    Allocator::new(AllocatorId::from("lookahead"), config)
}

fn run(service: &PriceService, window: &ComputeWindow) -> Portfolio {
    monthly_min_vol()
        .compute(window, service, &NoProgress, &CancelToken::new())
        .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn rewriting_future_prices_leaves_earlier_segments_untouched() {
    let window = ComputeWindow::new(d(2020, 1, 1), d(2020, 7, 1), d(2021, 7, 1)).unwrap();
    let dates = weekdays(d(2019, 12, 2), d(2021, 7, 2));

    let baseline = run(&service_for(&dates, None), &window);
    let segments = baseline.segments();
    assert_eq!(segments.len(), 12);

    let i = 3;
    let b_i = segments[i].start_date;
    assert_eq!(b_i, d(2020, 10, 1));

    // fresh service: nothing cached from the baseline run
    let shocked = run(&service_for(&dates, Some(b_i)), &window);

    for k in 0..=i {
        assert_eq!(
            segments[k].weights,
            shocked.segments()[k].weights,
            "segment {k} changed after rewriting prices from {b_i}"
        );
    }

    let last = segments.len() - 1;
    let before = segments[last].weights["A"];
    let after = shocked.segments()[last].weights["A"];
    assert!(
        before - after > 0.1,
        "volatile A should lose weight in the last segment: {before} -> {after}"
    );
}

#[test]
fn static_allocator_ignores_test_period_prices() {
    let window = ComputeWindow::new(d(2020, 1, 1), d(2020, 7, 1), d(2021, 7, 1)).unwrap();
    let dates = weekdays(d(2019, 12, 2), d(2021, 7, 2));
    let config = AllocatorConfig::from_json(
        AllocatorKind::MinVolatility,
        json!({"name": "static", "instruments": ["A", "B"]}),
    )
    .unwrap();
    let allocator = Allocator::new(AllocatorId::from("static"), config);

    let baseline = allocator
        .compute(&window, &service_for(&dates, None), &NoProgress, &CancelToken::new())
        .unwrap();
    let shocked = allocator
        .compute(
            &window,
            &service_for(&dates, Some(d(2020, 7, 2))),
            &NoProgress,
            &CancelToken::new(),
        )
        .unwrap();

    assert_eq!(baseline.segments().len(), 1);
    assert_eq!(baseline, shocked);
}
