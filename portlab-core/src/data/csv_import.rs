//! CSV file price source.
//!
//! Reads `{dir}/{SYMBOL}.csv` with a header row of
//! `date,open,high,low,close,adj_close,volume`. `adj_close` and `volume` may
//! be empty; a missing adjusted close falls back to the close.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use super::provider::{normalize_bars, DataError, DataProvider, DataSource, FetchResult, RawBar};

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    adj_close: Option<f64>,
    #[serde(default)]
    volume: Option<u64>,
}

pub struct CsvProvider {
    dir: PathBuf,
}

impl CsvProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }

    fn read_all(&self, symbol: &str) -> Result<Vec<RawBar>, DataError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| DataError::Other(format!("open {}: {e}", path.display())))?;

        let mut bars = Vec::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| {
                DataError::ResponseFormatChanged(format!(
                    "{}: row {}: {e}",
                    path.display(),
                    line + 2
                ))
            })?;
            bars.push(RawBar {
                date: row.date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume.unwrap_or(0),
                adj_close: row.adj_close.unwrap_or(row.close),
            });
        }
        Ok(bars)
    }
}

impl DataProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<FetchResult, DataError> {
        let bars = self.read_all(symbol)?;
        Ok(FetchResult {
            symbol: symbol.to_string(),
            bars: normalize_bars(bars, start, end),
            source: DataSource::CsvImport,
        })
    }

    fn is_available(&self) -> bool {
        self.dir.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_rows_within_range() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("SPY.csv"),
            "date,open,high,low,close,adj_close,volume\n\
             2024-01-04,3,3,3,3,2.9,10\n\
             2024-01-02,1,1,1,1,,\n\
             2024-01-03,2,2,2,2,1.9,10\n",
        )
        .unwrap();

        let provider = CsvProvider::new(dir.path());
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let result = provider.fetch("SPY", d(2), d(3)).unwrap();

        assert_eq!(result.source, DataSource::CsvImport);
        assert_eq!(result.bars.len(), 2);
        assert_eq!(result.bars[0].date, d(2));
        assert_eq!(result.bars[0].adj_close, 1.0);
        assert_eq!(result.bars[1].adj_close, 1.9);
    }

    #[test]
    fn missing_file_is_unknown_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CsvProvider::new(dir.path());
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(matches!(
            provider.fetch("NOPE", d, d),
            Err(DataError::SymbolNotFound { .. })
        ));
    }

    #[test]
    fn malformed_row_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("BAD.csv"),
            "date,open,high,low,close,adj_close,volume\nnot-a-date,1,1,1,1,1,1\n",
        )
        .unwrap();
        let provider = CsvProvider::new(dir.path());
        let d = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(matches!(
            provider.fetch("BAD", d, d),
            Err(DataError::ResponseFormatChanged(_))
        ));
    }
}
