//! Criterion benchmarks for PortLab hot paths.
//!
//! Benchmarks:
//! 1. Covariance estimation with Ledoit-Wolf shrinkage
//! 2. Minimum variance, unconstrained and with a binding return target
//! 3. Maximum Sharpe
//! 4. A monthly-refit allocator over two years of synthetic prices

use std::sync::Arc;

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use portlab_core::allocator::{Allocator, AllocatorConfig, AllocatorKind, CancelToken, NoProgress};
use portlab_core::data::{AlignedPrices, PriceService, PriceSource, SyntheticProvider};
use portlab_core::domain::{AllocatorId, ComputeWindow};
use portlab_core::optimize::{estimate, optimize, Objective};

// ── Helpers ──────────────────────────────────────────────────────────

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn tickers(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("S{i:02}")).collect()
}

fn service() -> PriceService {
    let source = PriceSource::new(Arc::new(SyntheticProvider::new(7)), 4, 5).unwrap();
    PriceService::new(Arc::new(source))
}

fn aligned(n: usize) -> AlignedPrices {
    service()
        .load_aligned(&tickers(n), d(2019, 1, 2), d(2020, 12, 31), true)
        .unwrap()
}

// ── 1. Estimation ────────────────────────────────────────────────────

fn bench_estimate(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate");
    for n in [5, 20, 50] {
        let prices = aligned(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &prices, |b, prices| {
            b.iter(|| estimate(black_box(prices)).unwrap())
        });
    }
    group.finish();
}

// ── 2 + 3. Solvers ───────────────────────────────────────────────────

fn bench_solvers(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize");
    for n in [5, 20] {
        let est = estimate(&aligned(n)).unwrap();
        let min_ret = est
            .expected_returns
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        let max_ret = est
            .expected_returns
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let target = min_ret + 0.75 * (max_ret - min_ret);

        group.bench_with_input(BenchmarkId::new("min_volatility", n), &est, |b, est| {
            b.iter(|| optimize(black_box(est), Objective::MinVolatility { target_return: None }, false))
        });
        group.bench_with_input(BenchmarkId::new("min_volatility_target", n), &est, |b, est| {
            b.iter(|| {
                optimize(
                    black_box(est),
                    Objective::MinVolatility {
                        target_return: Some(target),
                    },
                    false,
                )
            })
        });
        group.bench_with_input(BenchmarkId::new("max_sharpe", n), &est, |b, est| {
            b.iter(|| optimize(black_box(est), Objective::MaxSharpe, false))
        });
    }
    group.finish();
}

// ── 4. Allocator ─────────────────────────────────────────────────────

fn bench_monthly_allocator(c: &mut Criterion) {
    let config = AllocatorConfig::from_json(
        AllocatorKind::MinVolatility,
        serde_json::json!({
            "name": "bench",
            "instruments": tickers(10),
            "update_interval": {"value": 1, "unit": "months"}
        }),
    )
    .unwrap();
    let allocator = Allocator::new(AllocatorId::from("bench"), config);
    let window = ComputeWindow::new(d(2018, 1, 2), d(2019, 1, 2), d(2020, 12, 31)).unwrap();

    c.bench_function("monthly_min_vol_10x24", |b| {
        b.iter(|| {
            // fresh service so every iteration refits from scratch
            let prices = service();
            allocator
                .compute(black_box(&window), &prices, &NoProgress, &CancelToken::new())
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_estimate, bench_solvers, bench_monthly_allocator);
criterion_main!(benches);
