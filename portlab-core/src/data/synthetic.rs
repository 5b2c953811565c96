//! Deterministic synthetic price source for offline runs and demos.
//!
//! Each symbol gets a geometric random walk on weekdays starting from a fixed
//! anchor date. The walk is seeded from the master seed and the symbol via
//! BLAKE3, so a given `(seed, symbol, date)` always maps to the same price no
//! matter which range was requested.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::provider::{DataError, DataProvider, DataSource, FetchResult, RawBar};

pub struct SyntheticProvider {
    master_seed: u64,
    anchor: NaiveDate,
}

/// Per-symbol walk parameters, drawn once from the symbol's RNG.
struct WalkParams {
    start_price: f64,
    daily_drift: f64,
    daily_vol: f64,
    daily_yield: f64,
}

impl SyntheticProvider {
    pub fn new(master_seed: u64) -> Self {
        Self {
            master_seed,
            anchor: NaiveDate::from_ymd_opt(2000, 1, 3).unwrap_or_default(),
        }
    }

    fn sub_seed(&self, symbol: &str) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(symbol.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    fn walk(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<RawBar> {
        let mut rng = StdRng::seed_from_u64(self.sub_seed(symbol));
        let params = WalkParams {
            start_price: rng.gen_range(20.0..400.0),
            daily_drift: rng.gen_range(-0.05..0.20) / 252.0,
            daily_vol: rng.gen_range(0.10..0.40) / 252f64.sqrt(),
            daily_yield: rng.gen_range(0.0..0.03) / 252.0,
        };

        let mut bars = Vec::new();
        let mut close = params.start_price;
        let mut adj_factor = 1.0;
        let mut date = self.anchor;
        while date <= end {
            if is_weekday(date) {
                let z = standard_normal(&mut rng);
                let log_ret = params.daily_drift - 0.5 * params.daily_vol.powi(2) + params.daily_vol * z;
                let open = close;
                close *= log_ret.exp();
                adj_factor *= 1.0 + params.daily_yield;
                if date >= start {
                    bars.push(RawBar {
                        date,
                        open,
                        high: open.max(close),
                        low: open.min(close),
                        close,
                        volume: rng.gen_range(100_000..5_000_000),
                        adj_close: close * adj_factor,
                    });
                } else {
                    // keep the RNG stream aligned with dates
                    let _: u64 = rng.gen_range(100_000..5_000_000);
                }
            }
            date = match date.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => break,
            };
        }
        bars
    }
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Box-Muller transform.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

impl DataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<FetchResult, DataError> {
        if symbol.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        Ok(FetchResult {
            symbol: symbol.to_string(),
            bars: self.walk(symbol, start, end),
            source: DataSource::Synthetic,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}
