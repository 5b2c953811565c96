//! Price data service: memory tier → disk tier → provider.
//!
//! `PriceSource` is process-wide (provider, optional Parquet cache, fetch
//! pool). `PriceService` wraps it with the caches that belong to a single
//! connection, so nothing fetched for one client is visible to another
//! except through the public-data disk tier.

use std::sync::{Arc, PoisonError};

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::align::{fill_gaps, AlignedPrices};
use super::cache::{CacheStats, KeyedLocks, SeriesCache, SeriesKey};
use super::disk::ParquetCache;
use super::provider::{DataError, DataProvider, RawBar};
use crate::domain::PriceSeries;
use crate::error::ComputeError;
use crate::optimize::EstimateCache;

pub struct PriceSource {
    provider: Arc<dyn DataProvider>,
    disk: Option<ParquetCache>,
    disk_locks: KeyedLocks<String>,
    pool: rayon::ThreadPool,
    gap_tolerance: usize,
}

impl PriceSource {
    /// `max_concurrent_fetches` bounds parallel provider calls per request.
    pub fn new(
        provider: Arc<dyn DataProvider>,
        max_concurrent_fetches: usize,
        gap_tolerance: usize,
    ) -> Result<Self, DataError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_concurrent_fetches.max(1))
            .thread_name(|i| format!("portlab-fetch-{i}"))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build fetch pool: {e}")))?;
        Ok(Self {
            provider,
            disk: None,
            disk_locks: KeyedLocks::new(),
            pool,
            gap_tolerance,
        })
    }

    pub fn with_disk_cache(mut self, cache: ParquetCache) -> Self {
        self.disk = Some(cache);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn gap_tolerance(&self) -> usize {
        self.gap_tolerance
    }

    /// Raw bars for `[start, end]` from disk if covered, else the provider.
    ///
    /// Disk failures are logged and bypassed; they never fail a fetch.
    pub fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawBar>, DataError> {
        if let Some(bars) = self.load_cached(symbol, start, end) {
            return Ok(bars);
        }
        let bars = self.fetch_remote(symbol, start, end)?;
        self.store_cached(symbol, start, end, &bars);
        Ok(bars)
    }

    /// Disk tier lookup. Runs polars, so never call it from a fetch-pool job.
    fn load_cached(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Option<Vec<RawBar>> {
        let disk = self.disk.as_ref()?;
        match disk.load_range(symbol, start, end) {
            Ok(Some(bars)) => {
                debug!(symbol, bars = bars.len(), "disk cache hit");
                Some(bars)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(symbol, error = %e, "disk cache read failed");
                None
            }
        }
    }

    fn fetch_remote(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawBar>, DataError> {
        let result = self.provider.fetch(symbol, start, end)?;
        info!(
            symbol,
            provider = self.provider.name(),
            bars = result.bars.len(),
            %start,
            %end,
            "fetched prices"
        );
        Ok(result.bars)
    }

    fn store_cached(&self, symbol: &str, start: NaiveDate, end: NaiveDate, bars: &[RawBar]) {
        let Some(disk) = &self.disk else {
            return;
        };
        let lock = self.disk_locks.lock_for(&symbol.to_string());
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = disk.store(symbol, start, end, bars, self.provider.name()) {
            warn!(symbol, error = %e, "disk cache write failed");
        }
    }
}

pub struct PriceService {
    source: Arc<PriceSource>,
    memory: SeriesCache,
    fetch_locks: KeyedLocks<String>,
    estimates: EstimateCache,
}

impl PriceService {
    pub fn new(source: Arc<PriceSource>) -> Self {
        Self {
            source,
            memory: SeriesCache::new(),
            fetch_locks: KeyedLocks::new(),
            estimates: EstimateCache::new(),
        }
    }

    pub fn source(&self) -> &PriceSource {
        &self.source
    }

    pub fn estimates(&self) -> &EstimateCache {
        &self.estimates
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Real observations for one ticker within `[start, end]`.
    pub fn series(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
        adjusted: bool,
    ) -> Result<PriceSeries, ComputeError> {
        if let Some(hit) = self.memory.get(&SeriesKey::new(ticker, adjusted), start, end) {
            return Ok(hit);
        }
        self.ensure_loaded(&[ticker.to_string()], start, end, adjusted)?;
        self.cached(ticker, start, end, adjusted)
    }

    /// Gap-filled, aligned prices for `tickers` over `[start, end]`.
    ///
    /// Provider calls for missing tickers run in parallel on the bounded
    /// fetch pool.
    pub fn load_aligned(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
        adjusted: bool,
    ) -> Result<AlignedPrices, ComputeError> {
        self.ensure_loaded(tickers, start, end, adjusted)?;
        let tolerance = self.source.gap_tolerance;
        let filled: Vec<PriceSeries> = self.source.pool.install(|| {
            tickers
                .par_iter()
                .map(|ticker| {
                    let series = self.cached(ticker, start, end, adjusted)?;
                    fill_gaps(&series, end, tolerance)
                })
                .collect::<Result<Vec<_>, ComputeError>>()
        })?;
        AlignedPrices::align(&filled)
    }

    fn cached(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
        adjusted: bool,
    ) -> Result<PriceSeries, ComputeError> {
        self.memory
            .get(&SeriesKey::new(ticker, adjusted), start, end)
            .ok_or_else(|| ComputeError::Internal(format!("{ticker} missing from the price cache")))
    }

    /// Bring every ticker's `[start, end]` into the memory tier.
    ///
    /// Fetch locks are taken in sorted ticker order on the calling thread and
    /// held until the memory tier is filled, so two allocators missing the
    /// same ticker trigger one fetch. Disk I/O also stays on the calling
    /// thread; fetch-pool jobs only call the provider and take no locks.
    fn ensure_loaded(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
        adjusted: bool,
    ) -> Result<(), ComputeError> {
        let mut missing: Vec<&String> = tickers
            .iter()
            .filter(|t| !self.memory.covers(&SeriesKey::new(t, adjusted), start, end))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        missing.dedup();

        let locks: Vec<_> = missing
            .iter()
            .map(|t| self.fetch_locks.lock_for(*t))
            .collect();
        let _guards: Vec<_> = locks
            .iter()
            .map(|l| l.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();
        // another allocator may have filled some while we waited
        missing.retain(|t| !self.memory.covers(&SeriesKey::new(t, adjusted), start, end));

        let mut remote = Vec::new();
        for ticker in missing {
            match self.source.load_cached(ticker, start, end) {
                Some(bars) => self.remember(ticker, start, end, &bars),
                None => remote.push(ticker),
            }
        }
        if remote.is_empty() {
            return Ok(());
        }

        let fetched: Vec<(&String, Result<Vec<RawBar>, DataError>)> =
            self.source.pool.install(|| {
                remote
                    .par_iter()
                    .map(|t| (*t, self.source.fetch_remote(t, start, end)))
                    .collect()
            });

        let mut first_error = None;
        for (ticker, result) in fetched {
            match result {
                Ok(bars) => {
                    self.source.store_cached(ticker, start, end, &bars);
                    self.remember(ticker, start, end, &bars);
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(ComputeError::from_data_error(ticker, e));
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Cache both price flavours: one set of raw bars carries close and
    /// adjusted close.
    fn remember(&self, ticker: &str, start: NaiveDate, end: NaiveDate, bars: &[RawBar]) {
        for flavour in [true, false] {
            self.memory.insert(
                SeriesKey::new(ticker, flavour),
                start,
                end,
                PriceSeries::from_bars(ticker, bars, flavour),
            );
        }
    }
}
