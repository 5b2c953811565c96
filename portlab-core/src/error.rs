//! Compute error taxonomy.
//!
//! Every failure a compute request can hit maps onto one `ComputeError`
//! variant. Validation errors are raised before a compute starts; everything
//! else is scoped to the allocator whose compute failed.

use chrono::NaiveDate;
use thiserror::Error;

use crate::data::provider::DataError;

/// Sanitized text shown to callers for internal failures.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error while computing portfolio";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ComputeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("insufficient data for {ticker}: {observations} usable observation(s), need at least 2")]
    DataInsufficient { ticker: String, observations: usize },

    #[error("data gap for {ticker}: {missing} consecutive missing session(s) after {after}")]
    DataGap {
        ticker: String,
        after: NaiveDate,
        missing: usize,
    },

    #[error("optimization failed: {0}")]
    OptimizationFailed(String),

    #[error("rate limited by price source (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("price fetch failed for {ticker}: {reason}")]
    Fetch { ticker: String, reason: String },

    #[error("computation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("computation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ComputeError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ComputeError::Validation(_) => "VALIDATION_ERROR",
            ComputeError::DataInsufficient { .. } => "DATA_INSUFFICIENT",
            ComputeError::DataGap { .. } => "DATA_GAP",
            ComputeError::OptimizationFailed(_) => "OPTIMIZATION_FAILED",
            ComputeError::RateLimited { .. } => "RATE_LIMITED",
            ComputeError::Fetch { .. } => "FETCH_FAILED",
            ComputeError::Timeout { .. } => "TIMEOUT",
            ComputeError::Cancelled => "CANCELLED",
            ComputeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same request later can succeed without changes.
    ///
    /// Data and optimizer failures require a different configuration or
    /// date range, so they are never recoverable.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            ComputeError::RateLimited { .. }
                | ComputeError::Fetch { .. }
                | ComputeError::Timeout { .. }
        )
    }

    /// Message safe to hand to a client.
    pub fn public_message(&self) -> String {
        match self {
            ComputeError::Internal(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    /// Attach the ticker a provider error came from.
    pub fn from_data_error(ticker: &str, err: DataError) -> Self {
        match err {
            DataError::RateLimited { retry_after_secs } => {
                ComputeError::RateLimited { retry_after_secs }
            }
            DataError::CircuitBreakerTripped { remaining_secs } => ComputeError::RateLimited {
                retry_after_secs: remaining_secs,
            },
            DataError::SymbolNotFound { symbol } => {
                ComputeError::Validation(format!("unknown ticker '{symbol}'"))
            }
            DataError::NetworkUnreachable(reason)
            | DataError::ResponseFormatChanged(reason)
            | DataError::AuthenticationRequired(reason) => ComputeError::Fetch {
                ticker: ticker.to_string(),
                reason,
            },
            DataError::CacheError(reason) | DataError::ParquetError(reason) => {
                ComputeError::Internal(format!("cache failure for {ticker}: {reason}"))
            }
            DataError::Other(reason) => ComputeError::Fetch {
                ticker: ticker.to_string(),
                reason,
            },
        }
    }
}
