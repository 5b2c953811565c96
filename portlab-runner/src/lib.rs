//! PortLab Runner — compute orchestration, performance analysis, protocol.
//!
//! This crate builds on `portlab-core` to provide:
//! - The compute pipeline (allocator → out-of-sample performance)
//! - Performance metrics and the cumulative-return analyzer
//! - Transport-agnostic client/server message shapes
//! - Per-connection sessions with pending-compute tracking, timeouts,
//!   cancellation, and a result cache
//! - The durable allocator store boundary
//! - Service configuration

pub mod compute;
pub mod config;
pub mod metrics;
pub mod performance;
pub mod protocol;
pub mod session;
pub mod state;
pub mod store;

pub use compute::{run_compute, ComputeResult};
pub use config::{ConfigError, DataConfig, ProviderKind, ServiceConfig, SessionConfig};
pub use performance::{analyze, PerformanceReport, PerformanceStats};
pub use protocol::{
    ClientMessage, ComputeMessage, ErrorCategory, ErrorEvent, ProgressEvent, ServerEvent,
    Severity,
};
pub use session::{Session, SessionOptions, DEFAULT_COMPUTE_TIMEOUT};
pub use state::ConnectionState;
pub use store::{AllocatorStore, MemoryStore, StoreError};
