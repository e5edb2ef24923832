//! Bounded pool of capture permits.
//!
//! Each running capture session holds one permit for as long as its decoder
//! and encoder are open; the pool size is the number of concurrent pipelines
//! the host can sustain. `try_acquire` never blocks: when the pool is
//! exhausted the caller gets a capacity error instead of queueing, so
//! backpressure is visible at the call site rather than degrading every
//! session's frame rate.
//!
//! The limiter is an explicit process-scoped object handed to each session,
//! not a module-level global; tests get isolation with a fresh instance.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};

pub struct SessionLimiter {
    capacity: usize,
    in_use: AtomicUsize,
}

impl SessionLimiter {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            in_use: AtomicUsize::new(0),
        })
    }

    /// Take a permit without blocking.
    ///
    /// Fails with `CapacityExceeded` when every permit is already held.
    pub fn try_acquire(self: &Arc<Self>) -> PipelineResult<SessionPermit> {
        let mut current = self.in_use.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return Err(PipelineError::CapacityExceeded {
                    capacity: self.capacity,
                });
            }
            match self.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(SessionPermit {
                        limiter: self.clone(),
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits currently held, for operational monitoring.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_use())
    }
}

/// One unit of capture capacity. Released on drop.
pub struct SessionPermit {
    limiter: Arc<SessionLimiter>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.limiter.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}
