//! Price data: providers, gap handling, and the two cache tiers.

pub mod align;
pub mod alpha_vantage;
pub mod cache;
pub mod circuit_breaker;
pub mod csv_import;
pub mod disk;
pub mod memory;
pub mod provider;
pub mod service;
pub mod synthetic;

pub use align::{fill_gaps, AlignedPrices};
pub use alpha_vantage::AlphaVantageProvider;
pub use cache::{CacheStats, SeriesCache, SeriesKey};
pub use circuit_breaker::CircuitBreaker;
pub use csv_import::CsvProvider;
pub use disk::{CacheMeta, ParquetCache};
pub use memory::StaticProvider;
pub use provider::{DataError, DataProvider, DataSource, FetchResult, RawBar};
pub use service::{PriceService, PriceSource};
pub use synthetic::SyntheticProvider;
