//! Concurrency limiter with generation-based cancellation
//!
//! A counting semaphore bounds how many fetch+parse operations run at once.
//! Every scheduler tick bumps the generation; a request that was issued for
//! an older generation gives up once it gets a slot, before doing any I/O.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Semaphore,
    generation: AtomicU64,
    capacity: usize,
}

impl RateLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Semaphore::new(capacity),
            generation: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Supersede every request still waiting for a slot. Returns the new
    /// generation.
    pub fn clear_pending(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Wait for a slot. Returns `None` if `generation` was superseded before
    /// or while waiting; the slot is handed back immediately in that case.
    pub async fn acquire(&self, generation: u64) -> Option<SemaphorePermit<'_>> {
        if !self.is_current(generation) {
            return None;
        }
        let permit = self.semaphore.acquire().await.ok()?;
        if !self.is_current(generation) {
            return None;
        }
        Some(permit)
    }
}
