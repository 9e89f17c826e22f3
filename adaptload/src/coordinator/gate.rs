//! Resizable FIFO concurrency gate.
//!
//! One `tokio::sync::Semaphore` lives for the whole coordinator lifetime so
//! every in-flight load counts against the same pool, across any number of
//! strategy changes.
//!
//! ```text
//! grow   ──► pay off retirement debt first, add_permits(rest)
//! shrink ──► forget_permits(idle), remaining shortfall becomes debt
//! release──► debt > 0 ? forget the permit : return it to the pool
//! ```
//!
//! Invariant (held under the state lock): `available + held - debt ==
//! capacity`. New loads only start when `available > 0`, which implies
//! `debt == 0`, so a load never starts while `held >= capacity`.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use crate::error::LoadError;

#[derive(Debug)]
struct GateState {
    capacity: usize,
    /// Permits to retire as their holders release them.
    debt: usize,
}

/// Bounded-concurrency gate whose capacity can change while permits are held.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Semaphore,
    state: Mutex<GateState>,
    in_flight: AtomicUsize,
}

/// A held slot. Releasing it either frees the slot or retires it.
#[must_use = "the slot is released when the permit is dropped"]
pub struct GatePermit<'a> {
    permit: Option<SemaphorePermit<'a>>,
    gate: &'a ConcurrencyGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(permit) = self.permit.take() {
            let mut state = self.gate.state.lock();
            if state.debt > 0 {
                state.debt -= 1;
                permit.forget();
            } else {
                drop(permit);
            }
        }
    }
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Semaphore::new(capacity),
            state: Mutex::new(GateState { capacity, debt: 0 }),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for a slot, first come first served.
    pub async fn acquire(&self) -> Result<GatePermit<'_>, LoadError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| LoadError::NetworkAbort)?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(GatePermit {
            permit: Some(permit),
            gate: self,
        })
    }

    /// Change the capacity. Returns whether it changed.
    ///
    /// Held permits are never revoked; a shrink below the number in flight
    /// takes effect as those loads finish.
    pub fn resize(&self, capacity: usize) -> bool {
        let mut state = self.state.lock();
        if state.capacity == capacity {
            return false;
        }

        if capacity > state.capacity {
            let grow = capacity - state.capacity;
            let paid = state.debt.min(grow);
            state.debt -= paid;
            self.semaphore.add_permits(grow - paid);
        } else {
            let shrink = state.capacity - capacity;
            let forgotten = self.semaphore.forget_permits(shrink);
            state.debt += shrink - forgotten;
        }

        debug!(
            from = state.capacity,
            to = capacity,
            pending_retirements = state.debt,
            "Concurrency gate resized"
        );
        state.capacity = capacity;
        true
    }
}
