//! Execution concurrency gate with a periodic quiescence barrier.
//!
//! Caps the number of in-flight executions at `2 * proc_count`, and every
//! `barrier_every` completions drains to zero, runs a caller-supplied leak
//! scan synchronously, then reopens. Built on `Mutex`/`Condvar` rather than
//! a counting semaphore type since the barrier needs to observe and mutate
//! the count as one atomic step that a plain semaphore can't express.

use std::sync::{Condvar, Mutex};

struct GateState {
    in_flight: usize,
    limit: usize,
    barrier_pending: bool,
    completions_since_barrier: usize,
    barrier_every: usize,
}

/// An RAII permit; dropping it releases the gate slot.
pub struct Permit<'a> {
    gate: &'a Gate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.leave();
    }
}

pub struct Gate {
    state: Mutex<GateState>,
    condvar: Condvar,
}

impl Gate {
    #[must_use]
    pub fn new(proc_count: usize, barrier_every: usize) -> Self {
        Gate {
            state: Mutex::new(GateState {
                in_flight: 0,
                limit: (2 * proc_count).max(1),
                barrier_pending: false,
                completions_since_barrier: 0,
                barrier_every: barrier_every.max(1),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Block until a slot is free and no barrier is in progress, then take it.
    pub fn enter(&self) -> Permit<'_> {
        let mut state = self.state.lock().expect("gate lock poisoned");
        loop {
            if !state.barrier_pending && state.in_flight < state.limit {
                state.in_flight += 1;
                return Permit { gate: self };
            }
            state = self.condvar.wait(state).expect("gate lock poisoned");
        }
    }

    fn leave(&self) {
        let mut state = self.state.lock().expect("gate lock poisoned");
        state.in_flight -= 1;
        state.completions_since_barrier += 1;
        if state.completions_since_barrier >= state.barrier_every && !state.barrier_pending {
            state.barrier_pending = true;
        }
        self.condvar.notify_all();
    }

    /// Run `leak_scan` once all in-flight executions have drained, holding
    /// out new entrants until it returns. No-op if no barrier is due.
    pub fn run_barrier_if_due(&self, leak_scan: impl FnOnce()) {
        {
            let mut state = self.state.lock().expect("gate lock poisoned");
            if !state.barrier_pending {
                return;
            }
            while state.in_flight > 0 {
                state = self.condvar.wait(state).expect("gate lock poisoned");
            }
        }
        leak_scan();
        let mut state = self.state.lock().expect("gate lock poisoned");
        state.barrier_pending = false;
        state.completions_since_barrier = 0;
        self.condvar.notify_all();
    }

    /// Force a barrier regardless of whether one is due yet, draining
    /// in-flight executions and running `leak_scan` synchronously. Used to
    /// establish a baseline leak scan the moment the corpus is fully
    /// triaged, rather than waiting for the next scheduled barrier.
    pub fn force_barrier(&self, leak_scan: impl FnOnce()) {
        {
            let mut state = self.state.lock().expect("gate lock poisoned");
            state.barrier_pending = true;
        }
        self.run_barrier_if_due(leak_scan);
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().expect("gate lock poisoned").in_flight
    }
}
