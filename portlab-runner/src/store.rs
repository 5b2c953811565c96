//! Durable allocator storage boundary.
//!
//! Sessions write through to an `AllocatorStore` on create, update, and
//! delete, and restore a user's allocators from it on reconnect. Records are
//! kept in their wire shape and revalidated when read back.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use portlab_core::allocator::{Allocator, AllocatorRecord};
use portlab_core::domain::AllocatorId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("allocator {0} not found")]
    NotFound(AllocatorId),

    #[error("allocator {0} already exists")]
    Conflict(AllocatorId),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("stored allocator is invalid: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::Conflict(_) => "CONFLICT",
            StoreError::Unauthorized(_) => "UNAUTHORIZED",
            StoreError::Corrupt(_) => "CORRUPT_RECORD",
            StoreError::Backend(_) => "DATABASE_ERROR",
        }
    }
}

/// Create/read/update/delete allocators by id, scoped to a user.
pub trait AllocatorStore: Send + Sync {
    fn list(&self, user_id: &str) -> Result<Vec<Allocator>, StoreError>;
    fn create(&self, user_id: &str, allocator: &Allocator) -> Result<(), StoreError>;
    fn update(&self, user_id: &str, allocator: &Allocator) -> Result<(), StoreError>;
    fn delete(&self, user_id: &str, id: &AllocatorId) -> Result<(), StoreError>;
}

/// Process-local store; records keep insertion order per user.
#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, Vec<AllocatorRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_user<T>(&self, user_id: &str, f: impl FnOnce(&mut Vec<AllocatorRecord>) -> T) -> T {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        f(users.entry(user_id.to_string()).or_default())
    }
}

impl AllocatorStore for MemoryStore {
    fn list(&self, user_id: &str) -> Result<Vec<Allocator>, StoreError> {
        let records = self.with_user(user_id, |records| records.clone());
        records
            .into_iter()
            .map(|r| {
                let id = r.id.clone();
                Allocator::try_from(r).map_err(|e| StoreError::Corrupt(format!("{id}: {e}")))
            })
            .collect()
    }

    fn create(&self, user_id: &str, allocator: &Allocator) -> Result<(), StoreError> {
        self.with_user(user_id, |records| {
            if records.iter().any(|r| r.id == allocator.id) {
                return Err(StoreError::Conflict(allocator.id.clone()));
            }
            records.push(AllocatorRecord::from(allocator.clone()));
            Ok(())
        })
    }

    fn update(&self, user_id: &str, allocator: &Allocator) -> Result<(), StoreError> {
        self.with_user(user_id, |records| {
            let slot = records
                .iter_mut()
                .find(|r| r.id == allocator.id)
                .ok_or_else(|| StoreError::NotFound(allocator.id.clone()))?;
            *slot = AllocatorRecord::from(allocator.clone());
            Ok(())
        })
    }

    fn delete(&self, user_id: &str, id: &AllocatorId) -> Result<(), StoreError> {
        self.with_user(user_id, |records| {
            let before = records.len();
            records.retain(|r| &r.id != id);
            if records.len() == before {
                Err(StoreError::NotFound(id.clone()))
            } else {
                Ok(())
            }
        })
    }
}
