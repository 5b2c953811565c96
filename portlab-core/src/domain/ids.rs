//! Identifier newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque allocator identifier, unique within a user's allocator set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocatorId(pub String);

impl AllocatorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AllocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AllocatorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AllocatorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
