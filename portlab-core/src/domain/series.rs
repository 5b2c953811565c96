//! Per-ticker price series.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::provider::RawBar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
    /// True when carried forward from this ticker's previous observation.
    pub filled: bool,
}

/// Date-ordered prices for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub ticker: String,
    pub adjusted: bool,
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Select close or adjusted close from raw bars.
    ///
    /// Bars without a usable positive price are dropped; the gap filler
    /// decides later whether the hole is tolerable.
    pub fn from_bars(ticker: &str, bars: &[RawBar], adjusted: bool) -> Self {
        let mut points: Vec<PricePoint> = bars
            .iter()
            .filter_map(|bar| {
                let price = bar.price(adjusted);
                (price.is_finite() && price > 0.0).then_some(PricePoint {
                    date: bar.date,
                    price,
                    filled: false,
                })
            })
            .collect();
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Self {
            ticker: ticker.to_string(),
            adjusted,
            points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Real (not forward-filled) observations.
    pub fn observations(&self) -> usize {
        self.points.iter().filter(|p| !p.filled).count()
    }

    /// Points with `start <= date <= end`.
    pub fn slice(&self, start: NaiveDate, end: NaiveDate) -> PriceSeries {
        let lo = self.points.partition_point(|p| p.date < start);
        let hi = self.points.partition_point(|p| p.date <= end);
        PriceSeries {
            ticker: self.ticker.clone(),
            adjusted: self.adjusted,
            points: self.points[lo..hi.max(lo)].to_vec(),
        }
    }

    /// Price on `date`, if the series has a point there.
    pub fn price_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|i| self.points[i].price)
    }
}
