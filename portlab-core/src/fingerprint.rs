//! Cache keys.
//!
//! BLAKE3 over a canonical byte encoding. Ticker sets are sorted so the key
//! does not depend on configuration order.

use chrono::NaiveDate;

use crate::allocator::AllocatorConfig;
use crate::domain::ComputeWindow;

fn update_date(hasher: &mut blake3::Hasher, date: NaiveDate) {
    hasher.update(date.to_string().as_bytes());
    hasher.update(b"|");
}

/// Key for annualized estimates of one fit window.
///
/// `load_start` is where the aligned matrix the window was sliced from begins.
pub fn estimate_key(
    tickers: &[String],
    adjusted: bool,
    load_start: NaiveDate,
    fit_start: NaiveDate,
    fit_end: NaiveDate,
) -> String {
    let mut sorted: Vec<&str> = tickers.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"estimate|");
    for t in sorted {
        hasher.update(t.as_bytes());
        hasher.update(b",");
    }
    hasher.update(if adjusted { b"|adj|" } else { b"|raw|" });
    update_date(&mut hasher, load_start);
    update_date(&mut hasher, fit_start);
    update_date(&mut hasher, fit_end);
    hasher.finalize().to_hex().to_string()
}

/// Key for a full compute result.
pub fn result_key(config: &AllocatorConfig, window: &ComputeWindow, include_dividends: bool) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"result|");
    hasher.update(config.kind().as_str().as_bytes());
    hasher.update(b"|");
    // BTreeMap-backed JSON has a stable key order
    hasher.update(config.to_json().to_string().as_bytes());
    hasher.update(b"|");
    update_date(&mut hasher, window.fit_start);
    update_date(&mut hasher, window.fit_end);
    update_date(&mut hasher, window.test_end);
    hasher.update(if include_dividends { b"div" } else { b"nod" });
    hasher.finalize().to_hex().to_string()
}
