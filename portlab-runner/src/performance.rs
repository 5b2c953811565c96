//! Out-of-sample performance of a computed portfolio.
//!
//! The curve starts at 0% on the first aligned trading date on or after the
//! portfolio's start. Each later date's return is the weighted sum of the
//! instruments' simple returns, using the weights of the segment that owns
//! that date. Weights switch exactly at segment boundaries.

use chrono::NaiveDate;
use portlab_core::data::AlignedPrices;
use portlab_core::domain::{Portfolio, RISK_FREE_RATE};
use portlab_core::error::ComputeError;
use serde::{Deserialize, Serialize};

use crate::metrics;

/// Summary statistics, all in percent except the Sharpe ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    /// Positive percentage (12.5 = a 12.5% peak-to-trough decline).
    pub max_drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub dates: Vec<NaiveDate>,
    /// Cumulative return in percent, `0.0` on the first date.
    pub cumulative_returns: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<PerformanceStats>,
}

/// Weighted daily returns aligned with `prices.dates[1..]`, compounded into
/// the wealth curve.
fn portfolio_returns(portfolio: &Portfolio, prices: &AlignedPrices) -> Result<Vec<f64>, ComputeError> {
    let mut returns = Vec::with_capacity(prices.len().saturating_sub(1));
    for t in 1..prices.len() {
        let date = prices.dates[t];
        let segment = portfolio.segment_for(date).ok_or_else(|| {
            ComputeError::Internal(format!("no portfolio segment covers {date}"))
        })?;
        let mut r = 0.0;
        for (ticker, weight) in &segment.weights {
            if *weight == 0.0 {
                continue;
            }
            let col = prices.column(ticker).ok_or_else(|| {
                ComputeError::Internal(format!("no aligned prices for {ticker}"))
            })?;
            r += weight * (col[t] / col[t - 1] - 1.0);
        }
        returns.push(r);
    }
    Ok(returns)
}

/// Build the cumulative curve and statistics.
///
/// `prices` must hold every ticker with a non-zero weight and start on or
/// after the portfolio's start date.
pub fn analyze(portfolio: &Portfolio, prices: &AlignedPrices) -> Result<PerformanceReport, ComputeError> {
    if prices.is_empty() {
        return Err(ComputeError::DataInsufficient {
            ticker: prices.tickers.first().cloned().unwrap_or_default(),
            observations: 0,
        });
    }

    let daily = portfolio_returns(portfolio, prices)?;
    let mut wealth = Vec::with_capacity(prices.len());
    wealth.push(1.0);
    for r in &daily {
        let prev = wealth.last().copied().unwrap_or(1.0);
        wealth.push(prev * (1.0 + r));
    }
    let cumulative_returns: Vec<f64> = wealth.iter().map(|w| (w - 1.0) * 100.0).collect();

    let stats = (wealth.len() >= 2).then(|| {
        let first = prices.dates[0];
        let last = prices.dates[prices.len() - 1];
        let annualized = metrics::cagr(&wealth, (last - first).num_days());
        let volatility = metrics::annualized_volatility(&metrics::daily_returns(&wealth));
        PerformanceStats {
            total_return: metrics::total_return(&wealth) * 100.0,
            annualized_return: annualized * 100.0,
            volatility: volatility * 100.0,
            sharpe_ratio: metrics::sharpe_ratio(annualized, volatility, RISK_FREE_RATE),
            max_drawdown: metrics::max_drawdown(&wealth).abs() * 100.0,
        }
    });

    Ok(PerformanceReport {
        dates: prices.dates.clone(),
        cumulative_returns,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use portlab_core::domain::{PortfolioSegment, Weights};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn weights(pairs: &[(&str, f64)]) -> Weights {
        pairs.iter().map(|(t, w)| (t.to_string(), *w)).collect()
    }

    fn prices(dates: Vec<NaiveDate>, cols: &[(&str, Vec<f64>)]) -> AlignedPrices {
        AlignedPrices {
            filled: cols.iter().map(|_| vec![false; dates.len()]).collect(),
            tickers: cols.iter().map(|(t, _)| t.to_string()).collect(),
            prices: cols.iter().map(|(_, p)| p.clone()).collect(),
            dates,
        }
    }

    #[test]
    fn curve_starts_at_zero_and_compounds() {
        let portfolio = Portfolio::from_segments(vec![PortfolioSegment::new(
            d(2024, 1, 1),
            d(2024, 1, 4),
            weights(&[("A", 0.5), ("B", 0.5)]),
        )
        .unwrap()])
        .unwrap();
        let p = prices(
            vec![d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4)],
            &[("A", vec![100.0, 110.0, 110.0, 99.0]), ("B", vec![50.0, 50.0, 55.0, 55.0])],
        );

        let report = analyze(&portfolio, &p).unwrap();
        assert_eq!(report.cumulative_returns[0], 0.0);
        // +5%, +5%, -5%
        let expected = (1.05 * 1.05 * 0.95 - 1.0) * 100.0;
        let last = *report.cumulative_returns.last().unwrap();
        assert!((last - expected).abs() < 1e-9);

        let stats = report.stats.unwrap();
        assert!((stats.total_return - expected).abs() < 1e-9);
        assert!((stats.max_drawdown - 5.0).abs() < 1e-9);
    }

    #[test]
    fn weights_switch_exactly_at_boundaries() {
        let portfolio = Portfolio::from_segments(vec![
            PortfolioSegment::new(d(2024, 1, 1), d(2024, 1, 3), weights(&[("A", 1.0), ("B", 0.0)]))
                .unwrap(),
            PortfolioSegment::new(d(2024, 1, 3), d(2024, 1, 4), weights(&[("A", 0.0), ("B", 1.0)]))
                .unwrap(),
        ])
        .unwrap();
        let p = prices(
            vec![d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4)],
            &[("A", vec![10.0, 11.0, 22.0, 22.0]), ("B", vec![10.0, 20.0, 20.0, 30.0])],
        );

        let report = analyze(&portfolio, &p).unwrap();
        // Jan 2 held A (+10%); Jan 3 and Jan 4 (end date owned by the last segment) held B
        let expected = [0.0, 10.0, 10.0, (1.1 * 1.5 - 1.0) * 100.0];
        for (got, want) in report.cumulative_returns.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{got} vs {want}");
        }
    }

    #[test]
    fn volatility_is_sample_std_of_daily_returns() {
        let portfolio = Portfolio::from_segments(vec![PortfolioSegment::new(
            d(2024, 1, 1),
            d(2024, 1, 4),
            weights(&[("A", 0.5), ("B", 0.5)]),
        )
        .unwrap()])
        .unwrap();
        let p = prices(
            vec![d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 3), d(2024, 1, 4)],
            &[("A", vec![100.0, 110.0, 110.0, 99.0]), ("B", vec![50.0, 50.0, 55.0, 55.0])],
        );

        let stats = analyze(&portfolio, &p).unwrap().stats.unwrap();
        let daily = [0.05, 0.05, -0.05];
        let mean = daily.iter().sum::<f64>() / 3.0;
        let var = daily.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 2.0;
        let expected = var.sqrt() * 252f64.sqrt() * 100.0;
        assert!((stats.volatility - expected).abs() < 1e-9, "{}", stats.volatility);
    }

    #[test]
    fn flat_curve_has_zero_sharpe_and_drawdown() {
        let portfolio = Portfolio::from_segments(vec![PortfolioSegment::new(
            d(2024, 1, 1),
            d(2024, 1, 3),
            weights(&[("A", 1.0)]),
        )
        .unwrap()])
        .unwrap();
        let p = prices(
            vec![d(2024, 1, 1), d(2024, 1, 2), d(2024, 1, 3)],
            &[("A", vec![10.0, 10.0, 10.0])],
        );
        let stats = analyze(&portfolio, &p).unwrap().stats.unwrap();
        assert_eq!(stats.volatility, 0.0);
        assert_eq!(stats.sharpe_ratio, 0.0);
        assert_eq!(stats.max_drawdown, 0.0);
        assert_eq!(stats.annualized_return, 0.0);
    }

    #[test]
    fn single_date_has_no_stats() {
        let portfolio = Portfolio::from_segments(vec![PortfolioSegment::new(
            d(2024, 1, 1),
            d(2024, 1, 3),
            weights(&[("A", 1.0)]),
        )
        .unwrap()])
        .unwrap();
        let report = analyze(&portfolio, &prices(vec![d(2024, 1, 1)], &[("A", vec![10.0])])).unwrap();
        assert_eq!(report.cumulative_returns, vec![0.0]);
        assert!(report.stats.is_none());
    }
}
