//! Connection-scoped in-memory price cache.
//!
//! Keyed by `(ticker, adjusted)`. An entry answers a request only when its
//! covered range contains the requested one. Reads share an `RwLock`; inserts
//! take it exclusively. `KeyedLocks` serializes fetches of one key so two
//! allocators missing the same ticker trigger a single provider call.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::NaiveDate;

use crate::domain::PriceSeries;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub ticker: String,
    pub adjusted: bool,
}

impl SeriesKey {
    pub fn new(ticker: &str, adjusted: bool) -> Self {
        Self {
            ticker: ticker.to_string(),
            adjusted,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    start: NaiveDate,
    end: NaiveDate,
    series: Arc<PriceSeries>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Default)]
pub struct SeriesCache {
    entries: RwLock<HashMap<SeriesKey, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SeriesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observations within `[start, end]`, if the cached range covers it.
    pub fn get(&self, key: &SeriesKey, start: NaiveDate, end: NaiveDate) -> Option<PriceSeries> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.start <= start && entry.end >= end => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.series.slice(start, end))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store observations fetched for `[start, end]`.
    ///
    /// A wider existing entry is kept; otherwise the new one replaces it.
    pub fn insert(&self, key: SeriesKey, start: NaiveDate, end: NaiveDate, series: PriceSeries) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&key) {
            if existing.start <= start && existing.end >= end {
                return;
            }
        }
        entries.insert(
            key,
            Entry {
                start,
                end,
                series: Arc::new(series),
            },
        );
    }

    /// Whether `get` would hit, without counting a lookup.
    pub fn covers(&self, key: &SeriesKey, start: NaiveDate, end: NaiveDate) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .is_some_and(|entry| entry.start <= start && entry.end >= end)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }
}

/// One mutex per key, created on first use.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
