//! Shared memory ceiling with blocking reservations

use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{ParallelError, Result};

/// Byte budget shared by all workers of a job.
///
/// A worker reserves the estimated size of its raster window before reading
/// and holds the [`Reservation`] until the data is dropped. When the budget
/// is exhausted, `reserve` blocks until other reservations are released.
/// Requests larger than the whole ceiling fail immediately.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: usize,
    used: Mutex<usize>,
    released: Condvar,
}

impl MemoryBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes currently reserved
    pub fn used(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        // A panicking holder cannot leave the counter inconsistent
        self.used.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail fast when `bytes` can never fit
    pub fn check(&self, bytes: usize) -> Result<()> {
        if bytes > self.limit {
            return Err(ParallelError::ResourceExhausted {
                requested: bytes,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Reserve `bytes`, waiting while the budget is exhausted
    pub fn reserve(&self, bytes: usize) -> Result<Reservation<'_>> {
        self.check(bytes)?;
        let mut used = self.lock();
        if *used + bytes > self.limit {
            debug!(bytes, used = *used, limit = self.limit, "waiting for memory budget");
        }
        while *used + bytes > self.limit {
            used = self
                .released
                .wait(used)
                .unwrap_or_else(|e| e.into_inner());
        }
        *used += bytes;
        Ok(Reservation { budget: self, bytes })
    }

    /// Reserve without waiting; `None` when the budget is currently full
    pub fn try_reserve(&self, bytes: usize) -> Result<Option<Reservation<'_>>> {
        self.check(bytes)?;
        let mut used = self.lock();
        if *used + bytes > self.limit {
            return Ok(None);
        }
        *used += bytes;
        Ok(Some(Reservation { budget: self, bytes }))
    }

    fn release(&self, bytes: usize) {
        let mut used = self.lock();
        *used = used.saturating_sub(bytes);
        drop(used);
        self.released.notify_all();
    }
}

/// Reserved bytes, returned to the budget on drop
#[derive(Debug)]
pub struct Reservation<'a> {
    budget: &'a MemoryBudget,
    bytes: usize,
}

impl Reservation<'_> {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}
