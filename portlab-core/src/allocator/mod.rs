//! Allocators: strategies that turn a fit/test window into a `Portfolio`.
//!
//! The variant set is closed (manual, max Sharpe, min volatility), so dispatch
//! is a `match` on `AllocatorConfig` rather than a trait object.

pub mod config;
pub mod manual;
pub mod optimized;
pub mod progress;

pub use config::{
    AllocatorConfig, AllocatorKind, ManualConfig, MinVolatilityConfig, OptimizerSettings,
};
pub use optimized::{plan_segments, SegmentPlan};
pub use progress::{CancelToken, NoProgress, Phase, PhaseEvent, ProgressSink, RecordingProgress};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::PriceService;
use crate::domain::{AllocatorId, ComputeWindow, Portfolio};
use crate::error::ComputeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AllocatorRecord", into = "AllocatorRecord")]
pub struct Allocator {
    pub id: AllocatorId,
    pub config: AllocatorConfig,
    pub enabled: bool,
}

/// Wire/storage shape: the config body travels untyped next to its tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorRecord {
    pub id: AllocatorId,
    pub allocator_type: AllocatorKind,
    pub config: serde_json::Value,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl TryFrom<AllocatorRecord> for Allocator {
    type Error = ComputeError;

    fn try_from(record: AllocatorRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: record.id,
            config: AllocatorConfig::from_json(record.allocator_type, record.config)?,
            enabled: record.enabled,
        })
    }
}

impl From<Allocator> for AllocatorRecord {
    fn from(a: Allocator) -> Self {
        Self {
            allocator_type: a.config.kind(),
            config: a.config.to_json(),
            id: a.id,
            enabled: a.enabled,
        }
    }
}

impl Allocator {
    pub fn new(id: AllocatorId, config: AllocatorConfig) -> Self {
        Self {
            id,
            config,
            enabled: true,
        }
    }

    pub fn kind(&self) -> AllocatorKind {
        self.config.kind()
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Produce the portfolio for `window`.
    ///
    /// Optimizing variants emit `fetching` once and `optimizing` per segment.
    /// Failures propagate; no fallback portfolio is ever substituted.
    pub fn compute(
        &self,
        window: &ComputeWindow,
        prices: &PriceService,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Portfolio, ComputeError> {
        window.validate()?;
        if !self.enabled {
            return Err(ComputeError::Validation(format!(
                "allocator '{}' is disabled",
                self.name()
            )));
        }
        info!(
            allocator_id = %self.id,
            kind = self.kind().as_str(),
            fit_start = %window.fit_start,
            fit_end = %window.fit_end,
            test_end = %window.test_end,
            "computing allocator"
        );
        match (&self.config, self.config.optimizer()) {
            (AllocatorConfig::Manual(config), _) => manual::compute_manual(config, window),
            (_, Some((settings, objective))) => {
                optimized::compute_optimized(settings, objective, window, prices, progress, cancel)
            }
            (_, None) => Err(ComputeError::Internal("optimizer settings missing".into())),
        }
    }
}
