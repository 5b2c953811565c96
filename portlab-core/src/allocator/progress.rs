//! Progress events and cooperative cancellation for allocator runs.
//!
//! Allocators never hold a callback into the orchestrator; they push
//! `PhaseEvent`s into a `ProgressSink`, which the runner backs with a channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Fetching,
    Optimizing,
    Metrics,
    Complete,
    Cached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseEvent {
    pub phase: Phase,
    /// 1-indexed rebalance segment, set while optimizing.
    pub segment: Option<usize>,
    pub total_segments: Option<usize>,
}

impl PhaseEvent {
    pub fn phase(phase: Phase) -> Self {
        Self {
            phase,
            segment: None,
            total_segments: None,
        }
    }

    pub fn optimizing(segment: usize, total_segments: usize) -> Self {
        Self {
            phase: Phase::Optimizing,
            segment: Some(segment),
            total_segments: Some(total_segments),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: PhaseEvent);
}

/// Discards everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: PhaseEvent) {}
}

/// Records events in order; handy for tests and batch runs.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<PhaseEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PhaseEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: PhaseEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Shared cancellation flag, checked between phases and segments.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), ComputeError> {
        if self.is_cancelled() {
            Err(ComputeError::Cancelled)
        } else {
            Ok(())
        }
    }
}
