//! Service configuration loaded from TOML.
//!
//! ```toml
//! [session]
//! compute_timeout_secs = 300
//!
//! [data]
//! provider = "alpha_vantage"   # or "csv", "synthetic"
//! api_key_env = "ALPHA_KEY"
//! cache_dir = "data"
//! gap_tolerance = 5
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use portlab_core::data::{
    AlphaVantageProvider, CircuitBreaker, CsvProvider, DataError, DataProvider, ParquetCache,
    PriceSource, SyntheticProvider,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to set up price data: {0}")]
    Data(#[from] DataError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    AlphaVantage,
    Csv,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub compute_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            compute_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub provider: ProviderKind,
    /// Environment variable holding the Alpha Vantage key.
    pub api_key_env: String,
    pub csv_dir: Option<PathBuf>,
    /// Optional Parquet disk cache shared by all connections.
    pub cache_dir: Option<PathBuf>,
    /// Longest run of missing weekdays that is forward-filled.
    pub gap_tolerance: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub breaker_cooldown_secs: u64,
    pub max_concurrent_fetches: usize,
    pub synthetic_seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::AlphaVantage,
            api_key_env: "ALPHA_KEY".into(),
            csv_dir: None,
            cache_dir: None,
            gap_tolerance: 5,
            max_retries: 3,
            base_delay_ms: 500,
            breaker_cooldown_secs: 1800,
            max_concurrent_fetches: 5,
            synthetic_seed: 42,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub session: SessionConfig,
    pub data: DataConfig,
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.compute_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.compute_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.data.max_concurrent_fetches == 0 {
            return Err(ConfigError::Invalid(
                "data.max_concurrent_fetches must be at least 1".into(),
            ));
        }
        if self.data.provider == ProviderKind::Csv && self.data.csv_dir.is_none() {
            return Err(ConfigError::Invalid(
                "data.csv_dir is required when data.provider = \"csv\"".into(),
            ));
        }
        Ok(())
    }

    pub fn compute_timeout(&self) -> Duration {
        Duration::from_secs(self.session.compute_timeout_secs)
    }

    /// Provider named by `data.provider`.
    ///
    /// The Alpha Vantage key is read from the environment here, never stored
    /// in the config.
    pub fn build_provider(&self) -> Result<Arc<dyn DataProvider>, ConfigError> {
        let data = &self.data;
        Ok(match data.provider {
            ProviderKind::AlphaVantage => {
                let key = std::env::var(&data.api_key_env).ok();
                let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(
                    data.breaker_cooldown_secs,
                )));
                Arc::new(
                    AlphaVantageProvider::new(key, breaker)?.with_retry_policy(
                        data.max_retries,
                        Duration::from_millis(data.base_delay_ms),
                    ),
                )
            }
            ProviderKind::Csv => {
                let dir = data.csv_dir.clone().ok_or_else(|| {
                    ConfigError::Invalid("data.csv_dir is required for the csv provider".into())
                })?;
                Arc::new(CsvProvider::new(dir))
            }
            ProviderKind::Synthetic => Arc::new(SyntheticProvider::new(data.synthetic_seed)),
        })
    }

    /// Process-wide price source: provider, fetch pool, optional disk cache.
    pub fn build_price_source(&self) -> Result<PriceSource, ConfigError> {
        let source = PriceSource::new(
            self.build_provider()?,
            self.data.max_concurrent_fetches,
            self.data.gap_tolerance,
        )?;
        Ok(match &self.data.cache_dir {
            Some(dir) => source.with_disk_cache(ParquetCache::new(dir)),
            None => source,
        })
    }
}
