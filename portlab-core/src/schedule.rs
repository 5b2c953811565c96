//! Rebalance scheduling.
//!
//! Boundaries start at `fit_end` and step by the interval, anchored on
//! `fit_end` (step k is `fit_end + k·interval`, not the previous boundary plus
//! one interval), so month steps never drift when a month is short. The last
//! boundary is `test_end`.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Days,
    Weeks,
    Months,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateInterval {
    pub value: u32,
    pub unit: IntervalUnit,
}

impl UpdateInterval {
    pub fn new(value: u32, unit: IntervalUnit) -> Result<Self, ComputeError> {
        let interval = Self { value, unit };
        interval.validate()?;
        Ok(interval)
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.value == 0 {
            return Err(ComputeError::Validation(
                "update_interval value must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// `anchor + k` intervals; `None` on calendar overflow.
    fn step(&self, anchor: NaiveDate, k: u32) -> Option<NaiveDate> {
        let n = self.value.checked_mul(k)?;
        match self.unit {
            IntervalUnit::Days => anchor.checked_add_days(Days::new(n.into())),
            IntervalUnit::Weeks => anchor.checked_add_days(Days::new(u64::from(n) * 7)),
            IntervalUnit::Months => anchor.checked_add_months(Months::new(n)),
        }
    }
}

/// Strictly increasing boundaries from `fit_end` to `test_end` inclusive.
///
/// Adjacent pairs are segment `[start, end)`; the last segment may be short.
pub fn rebalance_boundaries(
    fit_end: NaiveDate,
    test_end: NaiveDate,
    interval: UpdateInterval,
) -> Result<Vec<NaiveDate>, ComputeError> {
    interval.validate()?;
    if fit_end >= test_end {
        return Err(ComputeError::Validation(format!(
            "fit_end_date ({fit_end}) must be before test_end_date ({test_end})"
        )));
    }

    let mut boundaries = vec![fit_end];
    let mut k = 1;
    loop {
        match interval.step(fit_end, k) {
            Some(next) if next < test_end => boundaries.push(next),
            _ => break,
        }
        k += 1;
    }
    boundaries.push(test_end);
    Ok(boundaries)
}

/// Boundaries as `(start, end)` pairs.
pub fn segment_ranges(boundaries: &[NaiveDate]) -> Vec<(NaiveDate, NaiveDate)> {
    boundaries.windows(2).map(|w| (w[0], w[1])).collect()
}
