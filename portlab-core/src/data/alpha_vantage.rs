//! Alpha Vantage price source.
//!
//! Pulls the full `TIME_SERIES_DAILY_ADJUSTED` history for a symbol and trims
//! it to the requested range. Throttling is reported in the JSON body (`Note`
//! or `Information`) as often as through HTTP 429, so both paths count as a
//! rate limit. Transient failures are retried with exponential backoff and
//! feed the shared circuit breaker.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::provider::{normalize_bars, DataError, DataProvider, DataSource, FetchResult, RawBar};

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

/// Seconds suggested to callers after a body-level throttle message.
const THROTTLE_RETRY_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct DailyAdjustedResponse {
    #[serde(rename = "Time Series (Daily)")]
    series: Option<BTreeMap<String, DailyEntry>>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyEntry {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. adjusted close")]
    adjusted_close: String,
    #[serde(rename = "6. volume")]
    volume: String,
}

pub struct AlphaVantageProvider {
    client: reqwest::blocking::Client,
    api_key: Option<String>,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl AlphaVantageProvider {
    pub fn new(
        api_key: Option<String>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
            circuit_breaker,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    fn parse_response(symbol: &str, resp: DailyAdjustedResponse) -> Result<Vec<RawBar>, DataError> {
        if let Some(msg) = resp.error_message {
            debug!(symbol, message = %msg, "alpha vantage rejected symbol");
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        if resp.note.is_some() || resp.information.is_some() {
            return Err(DataError::RateLimited {
                retry_after_secs: THROTTLE_RETRY_SECS,
            });
        }
        let series = resp.series.ok_or_else(|| {
            DataError::ResponseFormatChanged(format!("no daily series in response for {symbol}"))
        })?;

        let mut bars = Vec::with_capacity(series.len());
        for (date_str, entry) in series {
            match parse_entry(&date_str, &entry) {
                Some(bar) => bars.push(bar),
                None => warn!(symbol, date = %date_str, "skipping unparseable row"),
            }
        }
        if bars.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        Ok(bars)
    }

    fn fetch_with_retry(&self, symbol: &str) -> Result<Vec<RawBar>, DataError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            DataError::AuthenticationRequired("Alpha Vantage API key is not configured".into())
        })?;
        self.circuit_breaker.check()?;

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                debug!(symbol, attempt, delay_ms = delay.as_millis() as u64, "retrying fetch");
                std::thread::sleep(delay);
            }
            self.circuit_breaker.check()?;

            let request = self.client.get(&self.base_url).query(&[
                ("function", "TIME_SERIES_DAILY_ADJUSTED"),
                ("symbol", symbol),
                ("apikey", api_key),
                ("outputsize", "full"),
                ("datatype", "json"),
            ]);

            let resp = match request.send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(DataError::CircuitBreakerTripped {
                    remaining_secs: self.circuit_breaker.remaining_cooldown().as_secs(),
                });
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(THROTTLE_RETRY_SECS);
                last_error = Some(DataError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(DataError::AuthenticationRequired(
                    "Alpha Vantage rejected the API key".into(),
                ));
            }
            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(DataError::Other(format!("HTTP {status} for {symbol}")));
                continue;
            }

            let body: DailyAdjustedResponse = resp.json().map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
            })?;

            match Self::parse_response(symbol, body) {
                Ok(bars) => {
                    self.circuit_breaker.record_success();
                    return Ok(bars);
                }
                Err(err @ DataError::RateLimited { .. }) => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

fn parse_entry(date_str: &str, entry: &DailyEntry) -> Option<RawBar> {
    let num = |s: &str| s.trim().parse::<f64>().ok();
    Some(RawBar {
        date: NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?,
        open: num(&entry.open)?,
        high: num(&entry.high)?,
        low: num(&entry.low)?,
        close: num(&entry.close)?,
        adj_close: num(&entry.adjusted_close)?,
        volume: entry.volume.trim().parse::<u64>().ok()?,
    })
}

impl DataProvider for AlphaVantageProvider {
    fn name(&self) -> &str {
        "alpha_vantage"
    }

    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<FetchResult, DataError> {
        let bars = self.fetch_with_retry(symbol)?;
        Ok(FetchResult {
            symbol: symbol.to_string(),
            bars: normalize_bars(bars, start, end),
            source: DataSource::AlphaVantage,
        })
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some() && self.circuit_breaker.is_allowed()
    }
}
