//! Bounded-concurrency gate around supplier calls.
//!
//! A counting semaphore: at most `slots` permits exist at a time. Permits are
//! returned when the [`GatePermit`] is dropped, so a panicking or failing
//! supplier never leaks a slot.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Counting semaphore limiting how many refreshes run at once.
#[derive(Debug)]
pub struct ComputeGate {
    available: Mutex<usize>,
    released: Condvar,
    slots: usize,
}

/// A held refresh slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit<'a> {
    gate: &'a ComputeGate,
}

impl ComputeGate {
    pub fn new(slots: usize) -> Self {
        Self {
            available: Mutex::new(slots),
            released: Condvar::new(),
            slots,
        }
    }

    /// Blocks until a slot is free.
    pub fn acquire(&self) -> GatePermit<'_> {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        while *available == 0 {
            available = self
                .released
                .wait(available)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *available -= 1;
        GatePermit { gate: self }
    }

    /// Takes a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit<'_>> {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(GatePermit { gate: self })
    }

    /// Waits up to `timeout` for a slot.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<GatePermit<'_>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        while *available == 0 {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                // Timeout too large to represent: wait as if unbounded.
                None => Duration::from_secs(u64::from(u32::MAX)),
            };
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self
                .released
                .wait_timeout(available, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            available = guard;
        }
        *available -= 1;
        Some(GatePermit { gate: self })
    }

    /// Free slots at this moment. Only a snapshot under contention.
    pub fn available(&self) -> usize {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total number of slots.
    pub fn slots(&self) -> usize {
        self.slots
    }

    fn release(&self) {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        *available += 1;
        drop(available);
        self.released.notify_one();
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
