//! Connection-scoped state: allocators, cached results, pending computes.
//!
//! Owned by one `Session` behind a mutex and never shared across connections.

use std::collections::HashMap;
use std::sync::Arc;

use portlab_core::allocator::{Allocator, CancelToken};
use portlab_core::domain::AllocatorId;
use portlab_core::error::ComputeError;
use tokio::task::AbortHandle;

use crate::compute::ComputeResult;

/// In-flight compute marker.
struct Pending {
    generation: u64,
    cancel: CancelToken,
    abort: Option<AbortHandle>,
}

impl Pending {
    fn release(self) {
        self.cancel.cancel();
        if let Some(handle) = self.abort {
            handle.abort();
        }
    }
}

struct CachedResult {
    allocator_id: AllocatorId,
    result: Arc<ComputeResult>,
}

#[derive(Default)]
pub struct ConnectionState {
    allocators: HashMap<AllocatorId, (u64, Allocator)>,
    next_seq: u64,
    results: HashMap<String, CachedResult>,
    pending: HashMap<AllocatorId, Pending>,
    next_generation: u64,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Allocators ───────────────────────────────────────────────────

    /// Insert or replace; a replaced allocator keeps its list position.
    pub fn put_allocator(&mut self, allocator: Allocator) {
        let seq = match self.allocators.get(&allocator.id) {
            Some((seq, _)) => *seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.allocators.insert(allocator.id.clone(), (seq, allocator));
    }

    pub fn allocator(&self, id: &AllocatorId) -> Option<&Allocator> {
        self.allocators.get(id).map(|(_, a)| a)
    }

    pub fn remove_allocator(&mut self, id: &AllocatorId) -> Option<Allocator> {
        self.allocators.remove(id).map(|(_, a)| a)
    }

    /// Allocators in creation order.
    pub fn allocators(&self) -> Vec<Allocator> {
        let mut all: Vec<&(u64, Allocator)> = self.allocators.values().collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, a)| a.clone()).collect()
    }

    // ── Result cache ─────────────────────────────────────────────────

    pub fn cached_result(&self, key: &str) -> Option<Arc<ComputeResult>> {
        self.results.get(key).map(|c| c.result.clone())
    }

    pub fn store_result(&mut self, key: String, result: Arc<ComputeResult>) {
        let allocator_id = result.allocator_id.clone();
        self.results.insert(key, CachedResult { allocator_id, result });
    }

    /// Drop every cached result computed for `id`.
    pub fn invalidate(&mut self, id: &AllocatorId) -> usize {
        let before = self.results.len();
        self.results.retain(|_, c| &c.allocator_id != id);
        before - self.results.len()
    }

    // ── Pending computes ─────────────────────────────────────────────

    /// Mark `id` as computing. At most one compute per allocator at a time.
    pub fn begin(&mut self, id: &AllocatorId) -> Result<(u64, CancelToken), ComputeError> {
        if self.pending.contains_key(id) {
            return Err(ComputeError::Validation(format!(
                "a computation is already pending for allocator {id}"
            )));
        }
        self.next_generation += 1;
        let cancel = CancelToken::new();
        self.pending.insert(
            id.clone(),
            Pending {
                generation: self.next_generation,
                cancel: cancel.clone(),
                abort: None,
            },
        );
        Ok((self.next_generation, cancel))
    }

    /// Attach the task handle once spawned. No-op if the marker is gone.
    pub fn attach(&mut self, id: &AllocatorId, generation: u64, abort: AbortHandle) {
        match self.pending.get_mut(id) {
            Some(p) if p.generation == generation => p.abort = Some(abort),
            _ => abort.abort(),
        }
    }

    /// Clear the marker if it still belongs to `generation`.
    ///
    /// Returns false when the compute was cancelled or superseded, in which
    /// case its outcome must not be reported.
    pub fn finish(&mut self, id: &AllocatorId, generation: u64) -> bool {
        match self.pending.get(id) {
            Some(p) if p.generation == generation => {
                self.pending.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Release one marker: cancel its work and abort its task.
    pub fn cancel(&mut self, id: &AllocatorId) -> bool {
        match self.pending.remove(id) {
            Some(p) => {
                p.release();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, p) in self.pending.drain() {
            p.release();
        }
        count
    }

    pub fn is_pending(&self, id: &AllocatorId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
