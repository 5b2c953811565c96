//! Property tests for the mean-variance optimizer.
//!
//! Uses proptest to verify, for random positive-definite inputs:
//! 1. Feasibility — weights sum to 1 and respect the long-only or shorting box
//! 2. Completeness — every instrument appears in the output map
//! 3. Determinism — identical inputs give bit-identical weights
//! 4. Honest failure — anything that is not a feasible portfolio is an
//!    `OPTIMIZATION_FAILED` error, never a silent fallback

use portlab_core::domain::WEIGHT_SUM_TOLERANCE;
use portlab_core::optimize::{optimize, Bounds, Estimates, Objective};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

/// `Σ = A Aᵀ / k + εI` keeps the covariance positive definite.
fn arb_estimates() -> impl Strategy<Value = Estimates> {
    (2usize..7).prop_flat_map(|n| {
        (
            prop::collection::vec(-0.10..0.35_f64, n),
            prop::collection::vec(-0.3..0.3_f64, n * n),
        )
            .prop_map(move |(mu, a)| {
                let mut covariance = vec![vec![0.0; n]; n];
                for i in 0..n {
                    for j in 0..n {
                        let s: f64 = (0..n).map(|k| a[i * n + k] * a[j * n + k]).sum();
                        covariance[i][j] = s / n as f64 + if i == j { 0.01 } else { 0.0 };
                    }
                }
                Estimates {
                    tickers: (0..n).map(|i| format!("T{i}")).collect(),
                    expected_returns: mu,
                    covariance,
                    shrinkage: 0.0,
                }
            })
    })
}

fn arb_objective() -> impl Strategy<Value = Objective> {
    prop_oneof![
        Just(Objective::MaxSharpe),
        Just(Objective::MinVolatility { target_return: None }),
        (0.0..0.40_f64).prop_map(|t| Objective::MinVolatility {
            target_return: Some(t)
        }),
    ]
}

// ── 1 + 2 + 4. Feasible or honestly failed ───────────────────────────

proptest! {
    // each case may run a hundred bisection solves
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn weights_are_feasible_or_the_optimizer_says_why(
        est in arb_estimates(),
        objective in arb_objective(),
        allow_shorting in any::<bool>(),
    ) {
        let bounds = Bounds::for_shorting(allow_shorting);
        match optimize(&est, objective, allow_shorting) {
            Ok(weights) => {
                prop_assert_eq!(weights.len(), est.n());
                for ticker in &est.tickers {
                    prop_assert!(weights.contains_key(ticker));
                }
                let sum: f64 = weights.values().sum();
                prop_assert!((sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE, "sum = {}", sum);
                for (ticker, w) in &weights {
                    prop_assert!(w.is_finite());
                    prop_assert!(bounds.contains(*w, 1e-9), "{} = {}", ticker, w);
                }
            }
            Err(e) => {
                prop_assert_eq!(e.code(), "OPTIMIZATION_FAILED", "{}", e);
            }
        }
    }
}

// ── 3. Determinism ───────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn identical_inputs_give_identical_weights(
        est in arb_estimates(),
        objective in arb_objective(),
    ) {
        let first = optimize(&est, objective, false);
        let second = optimize(&est, objective, false);
        prop_assert_eq!(first, second);
    }
}

// ── Unconstrained minimum variance is always reachable ───────────────

proptest! {
    #[test]
    fn min_volatility_without_target_never_fails(est in arb_estimates()) {
        let weights = optimize(&est, Objective::MinVolatility { target_return: None }, false);
        prop_assert!(weights.is_ok(), "{:?}", weights);
    }
}
