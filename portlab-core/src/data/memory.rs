//! In-memory price source, used for fixtures and embedding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::NaiveDate;

use super::provider::{normalize_bars, DataError, DataProvider, DataSource, FetchResult, RawBar};

#[derive(Default)]
pub struct StaticProvider {
    bars: RwLock<HashMap<String, Vec<RawBar>>>,
    fetches: AtomicUsize,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_bars(self, symbol: &str, bars: Vec<RawBar>) -> Self {
        self.insert(symbol, bars);
        self
    }

    /// Replace the bars for `symbol`.
    pub fn insert(&self, symbol: &str, bars: Vec<RawBar>) {
        self.bars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.to_string(), bars);
    }

    /// Build flat bars (open = high = low = close = adj_close) from closes.
    pub fn bars_from_closes(dates: &[NaiveDate], closes: &[f64]) -> Vec<RawBar> {
        dates
            .iter()
            .zip(closes)
            .map(|(&date, &close)| RawBar {
                date,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000,
                adj_close: close,
            })
            .collect()
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl DataProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<FetchResult, DataError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let bars = self
            .bars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
            .ok_or_else(|| DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })?;
        Ok(FetchResult {
            symbol: symbol.to_string(),
            bars: normalize_bars(bars, start, end),
            source: DataSource::Static,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}
