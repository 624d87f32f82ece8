//! Bounded admission of cell jobs.
//!
//! Wraps a Tokio semaphore sized to the run's simultaneous-generation cap.
//! A [`GatePermit`] is owned, so it can move into the spawned job task and
//! frees its slot when the job ends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use gridgen_core::error::{GridError, GridResult};

#[derive(Debug, Default)]
struct GateCounters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl GateCounters {
    fn update_peak(&self, current: usize) {
        let mut peak = self.peak_in_flight.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_in_flight.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }
}

/// Limits how many cells of one run are in flight at once.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    counters: Arc<GateCounters>,
}

impl ConcurrencyGate {
    /// A `max_concurrent` of 0 is treated as 1.
    pub fn new(max_concurrent: usize) -> Self {
        let max_permits = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            counters: Arc::new(GateCounters::default()),
        }
    }

    /// Wait until a slot is free and take it.
    pub async fn admit(&self) -> GridResult<GatePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GridError::Internal("concurrency gate closed".to_string()))?;

        let current = self.counters.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.update_peak(current);

        Ok(GatePermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Take a slot only if one is free right now.
    pub fn try_admit(&self) -> Option<GatePermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        let current = self.counters.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.update_peak(current);
        Some(GatePermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_permits
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Relaxed)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<GateCounters>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
