//! Process-wide Parquet cache for raw bars.
//!
//! Layout: `{cache_dir}/symbol={SYMBOL}/{year}.parquet` plus a `meta.json`
//! sidecar recording the date range the files cover. Only public market data
//! lands here, so sharing it across connections leaks nothing user-specific.
//!
//! Year files are written to `.tmp` and renamed into place. A partition that
//! fails to read or validate is renamed to `.quarantined` and the load is
//! treated as a miss, so the next fetch rewrites it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::provider::{normalize_bars, DataError, RawBar};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub symbol: String,
    /// Requested range the cached bars are complete for.
    pub covered_start: NaiveDate,
    pub covered_end: NaiveDate,
    pub bar_count: usize,
    pub data_hash: String,
    pub source: String,
    pub cached_at: chrono::NaiveDateTime,
}

impl CacheMeta {
    pub fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.covered_start <= start && self.covered_end >= end
    }
}

pub struct ParquetCache {
    cache_dir: PathBuf,
}

impl ParquetCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.cache_dir.join(format!("symbol={symbol}"))
    }

    fn year_path(&self, symbol: &str, year: i32) -> PathBuf {
        self.symbol_dir(symbol).join(format!("{year}.parquet"))
    }

    fn meta_path(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join("meta.json")
    }

    pub fn meta(&self, symbol: &str) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(symbol)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Store bars fetched for `[start, end]`.
    ///
    /// When the new range overlaps or touches the cached one the two are
    /// merged (new bars win on shared dates); otherwise the symbol is replaced.
    pub fn store(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        bars: &[RawBar],
        source: &str,
    ) -> Result<CacheMeta, DataError> {
        let (covered_start, covered_end, merged) = match self.meta(symbol) {
            Some(old)
                if old.covered_start <= end.succ_opt().unwrap_or(end)
                    && start <= old.covered_end.succ_opt().unwrap_or(old.covered_end) =>
            {
                let mut by_date: BTreeMap<NaiveDate, RawBar> = self
                    .load_all(symbol)?
                    .unwrap_or_default()
                    .into_iter()
                    .map(|b| (b.date, b))
                    .collect();
                by_date.extend(bars.iter().map(|b| (b.date, b.clone())));
                (
                    old.covered_start.min(start),
                    old.covered_end.max(end),
                    by_date.into_values().collect::<Vec<_>>(),
                )
            }
            Some(_) => {
                self.remove(symbol)?;
                (start, end, normalize_bars(bars.to_vec(), start, end))
            }
            None => (start, end, normalize_bars(bars.to_vec(), start, end)),
        };

        let sym_dir = self.symbol_dir(symbol);
        fs::create_dir_all(&sym_dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let mut by_year: BTreeMap<i32, Vec<&RawBar>> = BTreeMap::new();
        for bar in &merged {
            by_year.entry(bar.date.year()).or_default().push(bar);
        }
        for (year, year_bars) in &by_year {
            let mut df = bars_to_dataframe(year_bars)?;
            let path = self.year_path(symbol, *year);
            let tmp_path = path.with_extension("parquet.tmp");
            write_parquet(&mut df, &tmp_path)?;
            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                DataError::CacheError(format!("atomic rename failed: {e}"))
            })?;
        }

        let meta = CacheMeta {
            symbol: symbol.to_string(),
            covered_start,
            covered_end,
            bar_count: merged.len(),
            data_hash: hash_bars(&merged)?,
            source: source.to_string(),
            cached_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        let meta_tmp = self.meta_path(symbol).with_extension("json.tmp");
        fs::write(&meta_tmp, meta_json)
            .and_then(|_| fs::rename(&meta_tmp, self.meta_path(symbol)))
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;

        debug!(symbol, bars = meta.bar_count, %covered_start, %covered_end, "disk cache updated");
        Ok(meta)
    }

    /// Bars for `[start, end]` if the cache covers that range and every
    /// partition loads cleanly.
    pub fn load_range(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Vec<RawBar>>, DataError> {
        let Some(meta) = self.meta(symbol) else {
            return Ok(None);
        };
        if !meta.covers(start, end) {
            return Ok(None);
        }
        let Some(bars) = self.load_all(symbol)? else {
            return Ok(None);
        };
        if bars.len() != meta.bar_count || hash_bars(&bars)? != meta.data_hash {
            warn!(symbol, "disk cache hash mismatch, ignoring cached bars");
            let _ = fs::remove_file(self.meta_path(symbol));
            return Ok(None);
        }
        Ok(Some(normalize_bars(bars, start, end)))
    }

    /// Every cached bar for a symbol, `None` if nothing usable is on disk.
    fn load_all(&self, symbol: &str) -> Result<Option<Vec<RawBar>>, DataError> {
        let sym_dir = self.symbol_dir(symbol);
        if !sym_dir.exists() {
            return Ok(None);
        }

        let entries =
            fs::read_dir(&sym_dir).map_err(|e| DataError::CacheError(format!("read dir: {e}")))?;

        let mut all_bars = Vec::new();
        let mut quarantined = false;
        for entry in entries {
            let path = entry
                .map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            match load_and_validate_parquet(&path) {
                Ok(bars) => all_bars.extend(bars),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "quarantining corrupt cache file");
                    let _ = fs::rename(&path, path.with_extension("parquet.quarantined"));
                    quarantined = true;
                }
            }
        }

        if quarantined {
            let _ = fs::remove_file(self.meta_path(symbol));
            return Ok(None);
        }
        if all_bars.is_empty() {
            return Ok(None);
        }
        all_bars.sort_by_key(|b| b.date);
        Ok(Some(all_bars))
    }

    fn remove(&self, symbol: &str) -> Result<(), DataError> {
        let dir = self.symbol_dir(symbol);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .map_err(|e| DataError::CacheError(format!("remove {}: {e}", dir.display())))?;
        }
        Ok(())
    }
}

fn hash_bars(bars: &[RawBar]) -> Result<String, DataError> {
    let bytes = serde_json::to_vec(bars)
        .map_err(|e| DataError::CacheError(format!("hash serialization: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn bars_to_dataframe(bars: &[&RawBar]) -> Result<DataFrame, DataError> {
    let dates: Vec<i32> = bars
        .iter()
        .map(|b| (b.date - epoch()).num_days() as i32)
        .collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        Column::new("open".into(), bars.iter().map(|b| b.open).collect::<Vec<f64>>()),
        Column::new("high".into(), bars.iter().map(|b| b.high).collect::<Vec<f64>>()),
        Column::new("low".into(), bars.iter().map(|b| b.low).collect::<Vec<f64>>()),
        Column::new("close".into(), bars.iter().map(|b| b.close).collect::<Vec<f64>>()),
        Column::new("volume".into(), bars.iter().map(|b| b.volume).collect::<Vec<u64>>()),
        Column::new(
            "adj_close".into(),
            bars.iter().map(|b| b.adj_close).collect::<Vec<f64>>(),
        ),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<RawBar>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::CacheError("empty parquet file".into()));
    }

    let col_err = |name: &str, e: PolarsError| DataError::ParquetError(format!("{name}: {e}"));
    let column = |name: &str| df.column(name).map_err(|e| col_err(name, e));

    let date_ca = column("date")?.date().map_err(|e| col_err("date", e))?.clone();
    let open_ca = column("open")?.f64().map_err(|e| col_err("open", e))?.clone();
    let high_ca = column("high")?.f64().map_err(|e| col_err("high", e))?.clone();
    let low_ca = column("low")?.f64().map_err(|e| col_err("low", e))?.clone();
    let close_ca = column("close")?.f64().map_err(|e| col_err("close", e))?.clone();
    let vol_ca = column("volume")?.u64().map_err(|e| col_err("volume", e))?.clone();
    let adj_ca = column("adj_close")?.f64().map_err(|e| col_err("adj_close", e))?.clone();

    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))?;
        bars.push(RawBar {
            date: epoch() + chrono::Duration::days(days as i64),
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            adj_close: adj_ca.get(i).unwrap_or(f64::NAN),
        });
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bar(date: NaiveDate, close: f64) -> RawBar {
        RawBar {
            date,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000,
            adj_close: close * 0.98,
        }
    }

    #[test]
    fn store_and_load_roundtrip_across_years() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let bars = vec![bar(d(2023, 12, 29), 100.0), bar(d(2024, 1, 2), 101.0)];

        cache.store("SPY", d(2023, 12, 1), d(2024, 1, 31), &bars, "static").unwrap();
        assert!(dir.path().join("symbol=SPY/2023.parquet").exists());
        assert!(dir.path().join("symbol=SPY/2024.parquet").exists());

        let loaded = cache.load_range("SPY", d(2023, 12, 1), d(2024, 1, 31)).unwrap().unwrap();
        assert_eq!(loaded, bars);
    }

    #[test]
    fn uncovered_range_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache
            .store("SPY", d(2024, 1, 1), d(2024, 1, 31), &[bar(d(2024, 1, 2), 1.0)], "static")
            .unwrap();

        assert!(cache.load_range("SPY", d(2023, 12, 1), d(2024, 1, 31)).unwrap().is_none());
        assert!(cache.load_range("QQQ", d(2024, 1, 1), d(2024, 1, 2)).unwrap().is_none());
    }

    #[test]
    fn overlapping_store_extends_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache
            .store("SPY", d(2024, 1, 1), d(2024, 1, 31), &[bar(d(2024, 1, 2), 1.0)], "static")
            .unwrap();
        let meta = cache
            .store("SPY", d(2024, 1, 15), d(2024, 2, 29), &[bar(d(2024, 2, 1), 2.0)], "static")
            .unwrap();

        assert_eq!(meta.covered_start, d(2024, 1, 1));
        assert_eq!(meta.covered_end, d(2024, 2, 29));
        assert_eq!(meta.bar_count, 2);
        let loaded = cache.load_range("SPY", d(2024, 1, 1), d(2024, 2, 29)).unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn corrupt_partition_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache
            .store("SPY", d(2024, 1, 1), d(2024, 1, 31), &[bar(d(2024, 1, 2), 1.0)], "static")
            .unwrap();

        let year = dir.path().join("symbol=SPY/2024.parquet");
        fs::write(&year, b"not parquet").unwrap();

        assert!(cache.load_range("SPY", d(2024, 1, 1), d(2024, 1, 31)).unwrap().is_none());
        assert!(dir.path().join("symbol=SPY/2024.parquet.quarantined").exists());
        assert!(cache.meta("SPY").is_none());
    }
}
