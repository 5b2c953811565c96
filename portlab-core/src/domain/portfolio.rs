//! Portfolio segments — time intervals with fixed weights.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

/// Ticker → weight. `BTreeMap` keeps summation order deterministic.
pub type Weights = BTreeMap<String, f64>;

/// Weights must sum to 1 within this tolerance.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

/// A time interval `[start_date, end_date)` over which weights are held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSegment {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub weights: Weights,
}

impl PortfolioSegment {
    pub fn new(
        start_date: NaiveDate,
        end_date: NaiveDate,
        weights: Weights,
    ) -> Result<Self, ComputeError> {
        if start_date >= end_date {
            return Err(ComputeError::Validation(format!(
                "segment end_date ({end_date}) must be after start_date ({start_date})"
            )));
        }
        Ok(Self {
            start_date,
            end_date,
            weights,
        })
    }

    pub fn weight_sum(&self) -> f64 {
        self.weights.values().sum()
    }
}

/// Ordered, non-empty, contiguous list of segments.
///
/// Built once per compute and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Portfolio {
    segments: Vec<PortfolioSegment>,
}

impl Portfolio {
    /// Validate contiguity and wrap the segments.
    pub fn from_segments(segments: Vec<PortfolioSegment>) -> Result<Self, ComputeError> {
        if segments.is_empty() {
            return Err(ComputeError::Internal(
                "portfolio must contain at least one segment".into(),
            ));
        }
        for pair in segments.windows(2) {
            if pair[0].end_date != pair[1].start_date {
                return Err(ComputeError::Internal(format!(
                    "segments are not contiguous: {} then {}",
                    pair[0].end_date, pair[1].start_date
                )));
            }
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PortfolioSegment] {
        &self.segments
    }

    pub fn start_date(&self) -> NaiveDate {
        self.segments[0].start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.segments[self.segments.len() - 1].end_date
    }

    /// Segment holding weights on `date`.
    ///
    /// Segments are half-open; the final segment also owns its end date.
    pub fn segment_for(&self, date: NaiveDate) -> Option<&PortfolioSegment> {
        let last = self.segments.len() - 1;
        self.segments.iter().enumerate().find_map(|(i, seg)| {
            let inside = seg.start_date <= date
                && (date < seg.end_date || (i == last && date == seg.end_date));
            inside.then_some(seg)
        })
    }

    /// Every ticker referenced by any segment.
    pub fn tickers(&self) -> BTreeSet<String> {
        self.segments
            .iter()
            .flat_map(|s| s.weights.keys().cloned())
            .collect()
    }
}
