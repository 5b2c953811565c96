//! Data provider trait and structured error types.
//!
//! `DataProvider` abstracts over price sources (Alpha Vantage, CSV files,
//! synthetic walks, in-memory fixtures). Caching sits above this trait;
//! providers never see the cache.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw daily bar from a provider, before price selection and gap filling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adj_close: f64,
}

impl RawBar {
    /// Dividend-adjusted or plain close, depending on `adjusted`.
    ///
    /// Falls back to the other field when the preferred one is missing.
    pub fn price(&self, adjusted: bool) -> f64 {
        let (preferred, fallback) = if adjusted {
            (self.adj_close, self.close)
        } else {
            (self.close, self.adj_close)
        };
        if preferred.is_finite() && preferred > 0.0 {
            preferred
        } else {
            fallback
        }
    }
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("provider blocked after repeated failures ({remaining_secs}s cooldown left)")]
    CircuitBreakerTripped { remaining_secs: u64 },

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("data error: {0}")]
    Other(String),
}

/// Bars for one symbol plus where they came from.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub bars: Vec<RawBar>,
    pub source: DataSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    AlphaVantage,
    CsvImport,
    Synthetic,
    Static,
    DiskCache,
}

/// A source of daily bars.
///
/// Implementations return bars sorted by date, restricted to `[start, end]`.
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate)
        -> Result<FetchResult, DataError>;

    /// False while the provider is refusing requests (rate limit, breaker open).
    fn is_available(&self) -> bool;
}

/// Sort by date, drop duplicate dates (last wins), and keep `[start, end]`.
pub(crate) fn normalize_bars(mut bars: Vec<RawBar>, start: NaiveDate, end: NaiveDate) -> Vec<RawBar> {
    bars.retain(|b| b.date >= start && b.date <= end);
    bars.sort_by_key(|b| b.date);
    let mut out: Vec<RawBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}
