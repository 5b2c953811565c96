//! Client/server message shapes.
//!
//! Transport-agnostic: every message is a JSON object tagged by `type`.

use portlab_core::allocator::{Allocator, AllocatorKind, Phase};
use portlab_core::domain::{AllocatorId, ComputeRequest};
use portlab_core::error::ComputeError;
use serde::{Deserialize, Serialize};

use crate::compute::ComputeResult;
use crate::store::StoreError;

fn one() -> usize {
    1
}

/// Compute request plus 1-indexed batch hints echoed in progress events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeMessage {
    #[serde(flatten)]
    pub request: ComputeRequest,
    #[serde(default = "one")]
    pub current_allocator: usize,
    #[serde(default = "one")]
    pub total_allocators: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateAllocator {
        allocator_type: AllocatorKind,
        config: serde_json::Value,
    },
    UpdateAllocator {
        id: AllocatorId,
        /// Keeps the current type when omitted.
        #[serde(default)]
        allocator_type: Option<AllocatorKind>,
        config: serde_json::Value,
        #[serde(default)]
        enabled: Option<bool>,
    },
    DeleteAllocator {
        id: AllocatorId,
    },
    ListAllocators,
    Compute(ComputeMessage),
    /// Cancel one pending compute, or all of them when `allocator_id` is omitted.
    Cancel {
        #[serde(default)]
        allocator_id: Option<AllocatorId>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub allocator_id: AllocatorId,
    pub allocator_name: String,
    pub phase: Phase,
    pub current: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_segments: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Network,
    Compute,
    Auth,
    Database,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    pub code: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocator_id: Option<AllocatorId>,
    pub recoverable: bool,
}

impl ErrorEvent {
    /// Client-facing event for a compute failure, scoped to `allocator_id`.
    pub fn from_compute(err: &ComputeError, allocator_id: Option<AllocatorId>) -> Self {
        let (category, severity) = match err {
            ComputeError::Validation(_) => (ErrorCategory::Validation, Severity::Error),
            ComputeError::DataInsufficient { .. }
            | ComputeError::DataGap { .. }
            | ComputeError::OptimizationFailed(_) => (ErrorCategory::Compute, Severity::Error),
            ComputeError::RateLimited { .. } => (ErrorCategory::Network, Severity::Warning),
            ComputeError::Fetch { .. } => (ErrorCategory::Network, Severity::Error),
            ComputeError::Timeout { .. } | ComputeError::Cancelled => {
                (ErrorCategory::System, Severity::Warning)
            }
            ComputeError::Internal(_) => (ErrorCategory::System, Severity::Error),
        };
        Self {
            message: err.public_message(),
            code: err.code().to_string(),
            category,
            severity,
            allocator_id,
            recoverable: err.recoverable(),
        }
    }

    pub fn from_store(err: &StoreError, allocator_id: Option<AllocatorId>) -> Self {
        let category = match err {
            StoreError::Unauthorized(_) => ErrorCategory::Auth,
            _ => ErrorCategory::Database,
        };
        Self {
            message: err.to_string(),
            code: err.code().to_string(),
            category,
            severity: Severity::Error,
            allocator_id,
            recoverable: matches!(err, StoreError::Backend(_)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    AllocatorCreated(Allocator),
    AllocatorUpdated(Allocator),
    AllocatorDeleted { id: AllocatorId },
    AllocatorsList { allocators: Vec<Allocator> },
    Progress(ProgressEvent),
    Result(ComputeResult),
    Error(ErrorEvent),
}

impl ServerEvent {
    /// Allocator the event belongs to, if any.
    pub fn allocator_id(&self) -> Option<&AllocatorId> {
        match self {
            ServerEvent::AllocatorCreated(a) | ServerEvent::AllocatorUpdated(a) => Some(&a.id),
            ServerEvent::AllocatorDeleted { id } => Some(id),
            ServerEvent::AllocatorsList { .. } => None,
            ServerEvent::Progress(p) => Some(&p.allocator_id),
            ServerEvent::Result(r) => Some(&r.allocator_id),
            ServerEvent::Error(e) => e.allocator_id.as_ref(),
        }
    }
}
