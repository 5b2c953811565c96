//! Allocator configuration: parsing, normalization, validation.
//!
//! Configs arrive as JSON next to an `allocator_type`, so the variant is chosen
//! by the type tag and the body is parsed into that variant's shape.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::domain::Weights;
use crate::error::ComputeError;
use crate::optimize::Objective;
use crate::schedule::UpdateInterval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorKind {
    Manual,
    MaxSharpe,
    MinVolatility,
}

impl AllocatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocatorKind::Manual => "manual",
            AllocatorKind::MaxSharpe => "max_sharpe",
            AllocatorKind::MinVolatility => "min_volatility",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualConfig {
    pub name: String,
    #[serde(default)]
    pub allocations: Weights,
}

fn default_true() -> bool {
    true
}

/// Settings shared by the optimizing allocators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub name: String,
    pub instruments: Vec<String>,
    #[serde(default)]
    pub allow_shorting: bool,
    #[serde(default = "default_true", alias = "use_adj_close")]
    pub use_adjusted_close: bool,
    #[serde(default)]
    pub update_interval: Option<UpdateInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinVolatilityConfig {
    #[serde(flatten)]
    pub settings: OptimizerSettings,
    /// Annual return floor in percent (10.0 = 10%).
    #[serde(default)]
    pub target_return: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AllocatorConfig {
    Manual(ManualConfig),
    MaxSharpe(OptimizerSettings),
    MinVolatility(MinVolatilityConfig),
}

fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_uppercase()
}

impl AllocatorConfig {
    /// Parse, normalize, and validate a config body for `kind`.
    pub fn from_json(kind: AllocatorKind, value: serde_json::Value) -> Result<Self, ComputeError> {
        let invalid = |e: serde_json::Error| {
            ComputeError::Validation(format!("invalid {} config: {e}", kind.as_str()))
        };
        let config = match kind {
            AllocatorKind::Manual => {
                AllocatorConfig::Manual(serde_json::from_value(value).map_err(invalid)?)
            }
            AllocatorKind::MaxSharpe => {
                AllocatorConfig::MaxSharpe(serde_json::from_value(value).map_err(invalid)?)
            }
            AllocatorKind::MinVolatility => {
                AllocatorConfig::MinVolatility(serde_json::from_value(value).map_err(invalid)?)
            }
        };
        let config = config.normalized()?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> serde_json::Value {
        // plain structs of strings, numbers, and maps always serialize
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn kind(&self) -> AllocatorKind {
        match self {
            AllocatorConfig::Manual(_) => AllocatorKind::Manual,
            AllocatorConfig::MaxSharpe(_) => AllocatorKind::MaxSharpe,
            AllocatorConfig::MinVolatility(_) => AllocatorKind::MinVolatility,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AllocatorConfig::Manual(c) => &c.name,
            AllocatorConfig::MaxSharpe(s) => &s.name,
            AllocatorConfig::MinVolatility(c) => &c.settings.name,
        }
    }

    /// Optimizer settings and objective, `None` for manual allocators.
    pub fn optimizer(&self) -> Option<(&OptimizerSettings, Objective)> {
        match self {
            AllocatorConfig::Manual(_) => None,
            AllocatorConfig::MaxSharpe(s) => Some((s, Objective::MaxSharpe)),
            AllocatorConfig::MinVolatility(c) => Some((
                &c.settings,
                Objective::MinVolatility {
                    target_return: c.target_return.map(|pct| pct / 100.0),
                },
            )),
        }
    }

    /// Trim names, upper-case tickers, and drop repeated instruments.
    fn normalized(self) -> Result<Self, ComputeError> {
        fn settings(mut s: OptimizerSettings) -> OptimizerSettings {
            s.name = s.name.trim().to_string();
            let mut seen = HashSet::new();
            s.instruments = s
                .instruments
                .iter()
                .map(|t| normalize_ticker(t))
                .filter(|t| seen.insert(t.clone()))
                .collect();
            s
        }

        Ok(match self {
            AllocatorConfig::Manual(c) => {
                let mut allocations = Weights::new();
                for (ticker, weight) in c.allocations {
                    let key = normalize_ticker(&ticker);
                    if allocations.insert(key.clone(), weight).is_some() {
                        return Err(ComputeError::Validation(format!(
                            "ticker '{key}' appears more than once in allocations"
                        )));
                    }
                }
                AllocatorConfig::Manual(ManualConfig {
                    name: c.name.trim().to_string(),
                    allocations,
                })
            }
            AllocatorConfig::MaxSharpe(s) => AllocatorConfig::MaxSharpe(settings(s)),
            AllocatorConfig::MinVolatility(c) => AllocatorConfig::MinVolatility(MinVolatilityConfig {
                settings: settings(c.settings),
                target_return: c.target_return,
            }),
        })
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.name().trim().is_empty() {
            return Err(ComputeError::Validation("allocator name must not be empty".into()));
        }
        match self {
            AllocatorConfig::Manual(c) => {
                for (ticker, weight) in &c.allocations {
                    if ticker.is_empty() {
                        return Err(ComputeError::Validation("empty ticker in allocations".into()));
                    }
                    if !weight.is_finite() || !(-1.0..=1.0).contains(weight) {
                        return Err(ComputeError::Validation(format!(
                            "weight for {ticker} must be between -1 and 1, got {weight}"
                        )));
                    }
                }
                Ok(())
            }
            AllocatorConfig::MaxSharpe(s) => validate_settings(s),
            AllocatorConfig::MinVolatility(c) => {
                validate_settings(&c.settings)?;
                if let Some(target) = c.target_return {
                    if !target.is_finite() || !(0.0..=100.0).contains(&target) {
                        return Err(ComputeError::Validation(format!(
                            "target_return must be between 0 and 100 (percent), got {target}"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

fn validate_settings(s: &OptimizerSettings) -> Result<(), ComputeError> {
    if s.instruments.is_empty() {
        return Err(ComputeError::Validation(
            "at least one instrument is required".into(),
        ));
    }
    if s.instruments.iter().any(String::is_empty) {
        return Err(ComputeError::Validation("empty ticker in instruments".into()));
    }
    if let Some(interval) = &s.update_interval {
        interval.validate()?;
    }
    Ok(())
}
