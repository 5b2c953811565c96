//! Circuit breaker for the remote price source.
//!
//! Trips after repeated failures (or immediately on HTTP 403) and refuses all
//! requests for a cooldown window, so a throttled API key is not hammered by
//! every allocator on every connection.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

use super::provider::DataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { tripped_at: Instant },
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

    pub fn new(cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
            }),
            cooldown,
            failure_threshold: Self::DEFAULT_FAILURE_THRESHOLD,
        }
    }

    /// 30-minute cooldown, trips after 3 consecutive failures.
    pub fn default_provider() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }

    // Breaker state stays meaningful even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_allowed(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open { tripped_at } => {
                if tripped_at.elapsed() >= self.cooldown {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// `Ok` when requests may go out, otherwise the error carrying the
    /// remaining cooldown.
    pub fn check(&self) -> Result<(), DataError> {
        if self.is_allowed() {
            Ok(())
        } else {
            Err(DataError::CircuitBreakerTripped {
                remaining_secs: self.remaining_cooldown().as_secs().max(1),
            })
        }
    }

    pub fn record_success(&self) {
        self.lock().consecutive_failures = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold
            && inner.state == BreakerState::Closed
        {
            warn!(
                failures = inner.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "price source circuit breaker tripped"
            );
            inner.state = BreakerState::Open {
                tripped_at: Instant::now(),
            };
        }
    }

    /// Trip immediately (HTTP 403 / banned key).
    pub fn trip(&self) {
        warn!(cooldown_secs = self.cooldown.as_secs(), "price source blocked, tripping breaker");
        self.lock().state = BreakerState::Open {
            tripped_at: Instant::now(),
        };
    }

    pub fn remaining_cooldown(&self) -> Duration {
        match self.lock().state {
            BreakerState::Closed => Duration::ZERO,
            BreakerState::Open { tripped_at } => {
                self.cooldown.saturating_sub(tripped_at.elapsed())
            }
        }
    }
}
