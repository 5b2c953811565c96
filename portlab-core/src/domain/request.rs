//! Compute requests and the fit/test window they describe.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::AllocatorId;
use crate::error::ComputeError;

/// Fit on `[fit_start, fit_end]`, evaluate out of sample on `[fit_end, test_end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputeWindow {
    pub fit_start: NaiveDate,
    pub fit_end: NaiveDate,
    pub test_end: NaiveDate,
}

impl ComputeWindow {
    pub fn new(
        fit_start: NaiveDate,
        fit_end: NaiveDate,
        test_end: NaiveDate,
    ) -> Result<Self, ComputeError> {
        let window = Self {
            fit_start,
            fit_end,
            test_end,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.fit_start >= self.fit_end {
            return Err(ComputeError::Validation(format!(
                "fit_start_date ({}) must be before fit_end_date ({})",
                self.fit_start, self.fit_end
            )));
        }
        if self.fit_end >= self.test_end {
            return Err(ComputeError::Validation(format!(
                "fit_end_date ({}) must be before test_end_date ({})",
                self.fit_end, self.test_end
            )));
        }
        Ok(())
    }

    /// Length of the fitting window; dynamic refits reuse it.
    pub fn fit_length(&self) -> chrono::Duration {
        self.fit_end - self.fit_start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRequest {
    pub allocator_id: AllocatorId,
    pub fit_start_date: NaiveDate,
    pub fit_end_date: NaiveDate,
    pub test_end_date: NaiveDate,
    #[serde(default)]
    pub include_dividends: bool,
}

impl ComputeRequest {
    /// Validated window, or a `Validation` error.
    pub fn window(&self) -> Result<ComputeWindow, ComputeError> {
        ComputeWindow::new(self.fit_start_date, self.fit_end_date, self.test_end_date)
    }
}
