//! The per-worker work queue.
//!
//! Three item classes with strict priority (Triage drains before Candidate,
//! which drains before Smash) and FIFO order within a class. Non-blocking:
//! `dequeue` returns `None` rather than parking a caller, since Procs fall
//! back to generating fresh candidates when the queue is empty.

use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::sync::Mutex;

use crate::program::Program;
use crate::signal::Signal;

/// One unit of work for a Proc to pick up.
#[derive(Debug, Clone)]
pub enum WorkItem {
    /// A seed to triage for the first time. `source_proc` identifies who
    /// found it; `flags` carries minimize/smash-eligibility hints.
    Triage {
        program: Program,
        source_proc: usize,
        signal: Signal,
        flags: TriageFlags,
    },
    /// A manager-supplied or self-generated candidate to execute and triage.
    /// `minimized` reports whether the program is already known-minimal
    /// (true for manager candidates that say so); `origin` distinguishes
    /// self-generated fuzzing from manager-pushed candidates for stats and
    /// triage-noise purposes.
    Candidate { program: Program, minimized: bool, origin: CandidateOrigin },
    /// A corpus entry selected for a mutation burst.
    Smash { program: Program, budget: usize },
}

/// Where a Candidate work item came from. Fuzz-origin candidates are this
/// proc's own generate/mutate output; Manager-origin candidates arrived
/// through a Poll response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrigin {
    Fuzz,
    Manager,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TriageFlags {
    pub minimize: bool,
    pub smash_after: bool,
    /// True when the originating operation was self-generated fuzzing
    /// (noisier coverage) rather than a manager-supplied candidate;
    /// determines the triage reexecution count.
    pub noise: bool,
}

#[derive(Default)]
struct Lanes {
    triage: VecDeque<WorkItem>,
    candidate: VecDeque<WorkItem>,
    smash: VecDeque<WorkItem>,
}

/// Thread-safe, non-blocking, unbounded priority queue plus a coalesced
/// "something changed" pulse for the Pollster to wait on.
pub struct WorkQueue {
    lanes: Mutex<Lanes>,
    poll_tx: SyncSender<()>,
    poll_rx: Mutex<Receiver<()>>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    #[must_use]
    pub fn new() -> Self {
        let (poll_tx, poll_rx) = sync_channel(1);
        WorkQueue {
            lanes: Mutex::new(Lanes::default()),
            poll_tx,
            poll_rx: Mutex::new(poll_rx),
        }
    }

    pub fn enqueue(&self, item: WorkItem) {
        let mut lanes = self.lanes.lock().expect("queue lock poisoned");
        match &item {
            WorkItem::Triage { .. } => lanes.triage.push_back(item),
            WorkItem::Candidate { .. } => lanes.candidate.push_back(item),
            WorkItem::Smash { .. } => lanes.smash.push_back(item),
        }
        drop(lanes);
        // best-effort: a full channel means a pulse is already pending
        let _ = self.poll_tx.try_send(());
    }

    /// Pop the highest-priority item, FIFO within its class. Non-blocking.
    pub fn dequeue(&self) -> Option<WorkItem> {
        let mut lanes = self.lanes.lock().expect("queue lock poisoned");
        lanes
            .triage
            .pop_front()
            .or_else(|| lanes.candidate.pop_front())
            .or_else(|| lanes.smash.pop_front())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        let lanes = self.lanes.lock().expect("queue lock poisoned");
        lanes.triage.is_empty() && lanes.candidate.is_empty() && lanes.smash.is_empty()
    }

    /// How many more candidates the queue would like before it is "full
    /// enough" to stop requesting more from the manager.
    #[must_use]
    pub fn want_candidates(&self, proc_count: usize) -> usize {
        let lanes = self.lanes.lock().expect("queue lock poisoned");
        proc_count.saturating_sub(lanes.candidate.len())
    }

    /// Block until a pulse arrives or `timeout` elapses; coalesces any
    /// number of `enqueue` calls made since the last drain into one wakeup.
    pub fn wait_for_activity(&self, timeout: std::time::Duration) {
        let rx = self.poll_rx.lock().expect("poll receiver lock poisoned");
        match rx.recv_timeout(timeout) {
            Ok(()) | Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {}
        }
    }

    /// Drain any pending pulse without blocking (used after a batch enqueue
    /// that the caller is about to act on directly).
    pub fn clear_pulse(&self) {
        let rx = self.poll_rx.lock().expect("poll receiver lock poisoned");
        match rx.try_recv() {
            Ok(()) | Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }
    }
}
