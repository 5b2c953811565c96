//! Domain types shared by the data layer, optimizer, and allocators.

pub mod ids;
pub mod portfolio;
pub mod request;
pub mod series;

pub use ids::AllocatorId;
pub use portfolio::{Portfolio, PortfolioSegment, Weights, WEIGHT_SUM_TOLERANCE};
pub use request::{ComputeRequest, ComputeWindow};
pub use series::{PricePoint, PriceSeries};

/// Annual risk-free rate, shared by the Sharpe optimizer and the analyzer.
pub const RISK_FREE_RATE: f64 = 0.02;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
