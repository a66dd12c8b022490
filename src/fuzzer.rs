//! `Fuzzer`: the passive owner of a worker's Procs, Gate, queue, and shared
//! state.
//!
//! `Fuzzer` itself does no work — it holds the `Arc`s the Procs and the
//! Pollster share, spawns the OS threads, and joins them on shutdown. All
//! the interesting behavior lives in [`crate::proc::Proc`] and
//! [`crate::pollster::Pollster`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::info;

use crate::calltable::ChoiceTable;
use crate::executor::ExecutorHandle;
use crate::gate::Gate;
use crate::proc::{Proc, ProcConfig};
use crate::queue::WorkQueue;
use crate::stats::Stats;
use crate::state::SharedState;

pub struct Fuzzer {
    queue: Arc<WorkQueue>,
    gate: Arc<Gate>,
    state: Arc<SharedState>,
    stats: Arc<Stats>,
    table: Arc<ChoiceTable>,
    stop: Arc<AtomicBool>,
    proc_threads: Vec<JoinHandle<()>>,
}

impl Fuzzer {
    #[must_use]
    pub fn new(table: ChoiceTable, proc_count: usize, leak_check_every: usize) -> Self {
        Fuzzer {
            queue: Arc::new(WorkQueue::new()),
            gate: Arc::new(Gate::new(proc_count, leak_check_every)),
            state: Arc::new(SharedState::new()),
            stats: Arc::new(Stats::new()),
            table: Arc::new(table),
            stop: Arc::new(AtomicBool::new(false)),
            proc_threads: Vec::new(),
        }
    }

    #[must_use]
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    #[must_use]
    pub fn gate(&self) -> Arc<Gate> {
        Arc::clone(&self.gate)
    }

    #[must_use]
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    #[must_use]
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Spawn one OS thread per executor factory result, each running a
    /// `Proc` until `stop()` is called.
    pub fn spawn_procs<E, F>(&mut self, proc_count: usize, config: ProcConfig, mut make_executor: F)
    where
        E: ExecutorHandle + Send + 'static,
        F: FnMut(usize) -> E,
    {
        for id in 0..proc_count {
            let executor = make_executor(id);
            let queue = Arc::clone(&self.queue);
            let gate = Arc::clone(&self.gate);
            let state = Arc::clone(&self.state);
            let table = Arc::clone(&self.table);
            let stats = Arc::clone(&self.stats);
            let stop = Arc::clone(&self.stop);
            let handle = std::thread::Builder::new()
                .name(format!("vmfuzz-proc-{id}"))
                .spawn(move || {
                    let mut proc = Proc::new(id, executor, queue, gate, state, table, stats, config);
                    proc.run_until_stopped(&stop);
                })
                .expect("failed to spawn proc thread");
            self.proc_threads.push(handle);
        }
        info!("spawned {proc_count} proc threads");
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn join(&mut self) {
        for handle in self.proc_threads.drain(..) {
            let _ = handle.join();
        }
    }
}
