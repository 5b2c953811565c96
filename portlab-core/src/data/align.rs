//! Gap filling and multi-ticker alignment.
//!
//! Missing weekdays inside one ticker's series are carried forward from that
//! ticker's own previous price, up to `tolerance` consecutive sessions. Values
//! never cross between tickers: alignment only shares the date axis.

use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::domain::{PricePoint, PriceSeries};
use crate::error::ComputeError;

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Weekdays strictly after `from` and up to and including `to`.
fn weekdays_after(from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let mut next = from.checked_add_days(Days::new(1));
    std::iter::from_fn(move || {
        let date = next.filter(|d| *d <= to)?;
        next = date.checked_add_days(Days::new(1));
        Some(date)
    })
    .filter(|d| is_weekday(*d))
}

/// Forward-fill a ticker's own gaps through `end`.
///
/// `series` holds real observations only. A run of more than `tolerance`
/// missing weekdays, including a stale tail before `end`, is a `DataGap`.
pub fn fill_gaps(
    series: &PriceSeries,
    end: NaiveDate,
    tolerance: usize,
) -> Result<PriceSeries, ComputeError> {
    let Some(first) = series.points.first() else {
        return Err(ComputeError::DataInsufficient {
            ticker: series.ticker.clone(),
            observations: 0,
        });
    };

    let mut points = Vec::with_capacity(series.points.len() + 8);
    points.push(*first);

    let mut prev = *first;
    let next_dates = series
        .points
        .iter()
        .skip(1)
        .map(|p| Some(*p))
        .chain(std::iter::once(None));

    for next in next_dates {
        let until = match next {
            Some(p) => p.date.pred_opt().unwrap_or(p.date),
            None => end,
        };
        let missing: Vec<NaiveDate> = weekdays_after(prev.date, until).collect();
        if missing.len() > tolerance {
            return Err(ComputeError::DataGap {
                ticker: series.ticker.clone(),
                after: prev.date,
                missing: missing.len(),
            });
        }
        points.extend(missing.into_iter().map(|date| PricePoint {
            date,
            price: prev.price,
            filled: true,
        }));
        if let Some(p) = next {
            points.push(p);
            prev = p;
        }
    }

    Ok(PriceSeries {
        ticker: series.ticker.clone(),
        adjusted: series.adjusted,
        points,
    })
}

/// Several tickers on one shared date axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPrices {
    pub dates: Vec<NaiveDate>,
    pub tickers: Vec<String>,
    /// `prices[k][t]` is ticker `k` on `dates[t]`.
    pub prices: Vec<Vec<f64>>,
    /// `filled[k][t]` marks carried-forward values.
    pub filled: Vec<Vec<bool>>,
}

impl AlignedPrices {
    /// Align gap-filled series.
    ///
    /// The axis starts at the latest first observation, ends at the earliest
    /// last point, and keeps only dates where at least one ticker traded.
    pub fn align(series: &[PriceSeries]) -> Result<Self, ComputeError> {
        let mut start = None::<NaiveDate>;
        let mut end = None::<NaiveDate>;
        for s in series {
            let (Some(first), Some(last)) = (s.first_date(), s.last_date()) else {
                return Err(ComputeError::DataInsufficient {
                    ticker: s.ticker.clone(),
                    observations: 0,
                });
            };
            start = Some(start.map_or(first, |d| d.max(first)));
            end = Some(end.map_or(last, |d| d.min(last)));
        }
        let (Some(start), Some(end)) = (start, end) else {
            return Ok(Self::empty());
        };

        let mut dates: Vec<NaiveDate> = series
            .iter()
            .flat_map(|s| s.points.iter())
            .filter(|p| !p.filled && p.date >= start && p.date <= end)
            .map(|p| p.date)
            .collect();
        dates.sort();
        dates.dedup();

        let mut prices = Vec::with_capacity(series.len());
        let mut filled = Vec::with_capacity(series.len());
        for s in series {
            let mut col = Vec::with_capacity(dates.len());
            let mut col_filled = Vec::with_capacity(dates.len());
            for &date in &dates {
                // latest own point on or before `date`
                let idx = s.points.partition_point(|p| p.date <= date);
                let point = idx.checked_sub(1).map(|i| s.points[i]).ok_or_else(|| {
                    ComputeError::Internal(format!("{} has no price on or before {date}", s.ticker))
                })?;
                col.push(point.price);
                col_filled.push(point.filled || point.date != date);
            }
            prices.push(col);
            filled.push(col_filled);
        }

        Ok(Self {
            dates,
            tickers: series.iter().map(|s| s.ticker.clone()).collect(),
            prices,
            filled,
        })
    }

    fn empty() -> Self {
        Self {
            dates: Vec::new(),
            tickers: Vec::new(),
            prices: Vec::new(),
            filled: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Rows with `start <= date <= end`.
    pub fn slice(&self, start: NaiveDate, end: NaiveDate) -> AlignedPrices {
        let lo = self.dates.partition_point(|d| *d < start);
        let hi = self.dates.partition_point(|d| *d <= end).max(lo);
        AlignedPrices {
            dates: self.dates[lo..hi].to_vec(),
            tickers: self.tickers.clone(),
            prices: self.prices.iter().map(|c| c[lo..hi].to_vec()).collect(),
            filled: self.filled.iter().map(|c| c[lo..hi].to_vec()).collect(),
        }
    }

    /// Real observations per ticker.
    pub fn observations(&self) -> Vec<usize> {
        self.filled
            .iter()
            .map(|col| col.iter().filter(|f| !**f).count())
            .collect()
    }

    /// `DataInsufficient` for the first ticker with fewer than two real prices.
    pub fn require_observations(&self) -> Result<(), ComputeError> {
        for (ticker, count) in self.tickers.iter().zip(self.observations()) {
            if count < 2 {
                return Err(ComputeError::DataInsufficient {
                    ticker: ticker.clone(),
                    observations: count,
                });
            }
        }
        Ok(())
    }

    /// Simple daily returns per ticker, `returns[k][t-1] = p[t]/p[t-1] - 1`.
    pub fn returns(&self) -> Vec<Vec<f64>> {
        self.prices
            .iter()
            .map(|col| col.windows(2).map(|w| w[1] / w[0] - 1.0).collect())
            .collect()
    }

    pub fn column(&self, ticker: &str) -> Option<&[f64]> {
        self.tickers
            .iter()
            .position(|t| t == ticker)
            .map(|k| self.prices[k].as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn series(ticker: &str, points: &[(NaiveDate, f64)]) -> PriceSeries {
        PriceSeries {
            ticker: ticker.into(),
            adjusted: true,
            points: points
                .iter()
                .map(|&(date, price)| PricePoint {
                    date,
                    price,
                    filled: false,
                })
                .collect(),
        }
    }

    #[test]
    fn weekend_is_not_a_gap() {
        // Fri 2024-01-05 -> Mon 2024-01-08
        let s = series("A", &[(d(2024, 1, 5), 1.0), (d(2024, 1, 8), 2.0)]);
        let filled = fill_gaps(&s, d(2024, 1, 8), 0).unwrap();
        assert_eq!(filled.len(), 2);
        assert_eq!(filled.observations(), 2);
    }

    #[test]
    fn short_gap_is_filled_from_own_price() {
        // Wed 2024-01-10 missing
        let s = series("A", &[(d(2024, 1, 9), 10.0), (d(2024, 1, 11), 12.0)]);
        let filled = fill_gaps(&s, d(2024, 1, 11), 5).unwrap();
        assert_eq!(filled.len(), 3);
        assert_eq!(filled.points[1].date, d(2024, 1, 10));
        assert_eq!(filled.points[1].price, 10.0);
        assert!(filled.points[1].filled);
    }

    #[test]
    fn long_gap_fails() {
        let s = series("A", &[(d(2024, 1, 2), 10.0), (d(2024, 1, 31), 12.0)]);
        let err = fill_gaps(&s, d(2024, 1, 31), 5).unwrap_err();
        match err {
            ComputeError::DataGap { ticker, after, missing } => {
                assert_eq!(ticker, "A");
                assert_eq!(after, d(2024, 1, 2));
                assert_eq!(missing, 20);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stale_tail_counts_as_gap() {
        let s = series("A", &[(d(2024, 1, 2), 10.0), (d(2024, 1, 3), 10.5)]);
        assert!(fill_gaps(&s, d(2024, 1, 5), 5).is_ok());
        assert!(matches!(
            fill_gaps(&s, d(2024, 2, 5), 5),
            Err(ComputeError::DataGap { .. })
        ));
    }

    #[test]
    fn alignment_never_borrows_other_tickers_values() {
        // B starts later; A has a holiday on 01-10 that B traded through.
        let a = fill_gaps(
            &series("A", &[(d(2024, 1, 8), 1.0), (d(2024, 1, 9), 1.1), (d(2024, 1, 11), 1.2)]),
            d(2024, 1, 11),
            5,
        )
        .unwrap();
        let b = fill_gaps(
            &series("B", &[(d(2024, 1, 9), 50.0), (d(2024, 1, 10), 51.0), (d(2024, 1, 11), 52.0)]),
            d(2024, 1, 11),
            5,
        )
        .unwrap();

        let aligned = AlignedPrices::align(&[a, b]).unwrap();
        assert_eq!(aligned.dates, vec![d(2024, 1, 9), d(2024, 1, 10), d(2024, 1, 11)]);
        assert_eq!(aligned.prices[0], vec![1.1, 1.1, 1.2]);
        assert_eq!(aligned.prices[1], vec![50.0, 51.0, 52.0]);
        assert_eq!(aligned.filled[0], vec![false, true, false]);
        assert_eq!(aligned.observations(), vec![2, 3]);
    }

    #[test]
    fn market_holidays_are_dropped_from_axis() {
        let dates = [d(2024, 1, 12), d(2024, 1, 16)]; // Mon 01-15 closed for everyone
        let a = fill_gaps(&series("A", &[(dates[0], 1.0), (dates[1], 2.0)]), dates[1], 5).unwrap();
        let b = fill_gaps(&series("B", &[(dates[0], 3.0), (dates[1], 4.0)]), dates[1], 5).unwrap();
        let aligned = AlignedPrices::align(&[a, b]).unwrap();
        assert_eq!(aligned.dates, dates.to_vec());
        assert_eq!(aligned.returns()[0], vec![1.0]);
    }

    #[test]
    fn slice_and_observation_requirement() {
        let a = fill_gaps(
            &series("A", &[(d(2024, 1, 2), 1.0), (d(2024, 1, 3), 2.0), (d(2024, 1, 4), 4.0)]),
            d(2024, 1, 4),
            5,
        )
        .unwrap();
        let aligned = AlignedPrices::align(&[a]).unwrap();
        assert!(aligned.require_observations().is_ok());

        let one = aligned.slice(d(2024, 1, 4), d(2024, 1, 10));
        assert_eq!(one.len(), 1);
        assert!(matches!(
            one.require_observations(),
            Err(ComputeError::DataInsufficient { observations: 1, .. })
        ));
        assert_eq!(aligned.column("A"), Some(&[1.0, 2.0, 4.0][..]));
    }
}
