//! Admission gate: a bounded count of idle workers.
//!
//! The gate starts empty. Each worker adds a token when it is about to wait for
//! work, and `submit` takes one without blocking. The count never leaves
//! `[0, capacity]`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::InitError;

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("release would exceed gate capacity {capacity}")]
    Overflow { capacity: usize },
}

#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    available: AtomicUsize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Result<Self, InitError> {
        if capacity == 0 {
            return Err(InitError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            available: AtomicUsize::new(0),
        })
    }

    /// Take one token.
    ///
    /// With `Duration::ZERO` this never blocks. A non-zero timeout parks the
    /// calling thread between attempts until the deadline passes. A timeout too
    /// large to represent as a deadline waits indefinitely.
    pub fn try_acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.take_one() {
                return true;
            }
            if timeout.is_zero() || deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            std::thread::sleep(ACQUIRE_POLL_INTERVAL);
        }
    }

    /// Return one token.
    ///
    /// Must be called once per worker readiness announcement. A release that
    /// would push the count past capacity is refused.
    pub fn release(&self) -> Result<(), GateError> {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| GateError::Overflow {
                capacity: self.capacity,
            })
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn take_one(&self) -> bool {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}
