//! The periodic manager-sync thread.
//!
//! On each tick: drain the accumulated new-signal set, gather any fresh
//! corpus entries, report them plus the running exec total and activity
//! stats to the manager, absorb whatever candidates and inputs come back,
//! and — once the queue signals it wants more work — request additional
//! candidates. Runs on its own thread, separate from every `Proc`, and
//! wakes either on a timer or on the queue's activity pulse, whichever
//! comes first.
//!
//! A failed poll is fatal: the worker cannot make progress the manager
//! will ever see without one, so `run_until_stopped` terminates the
//! process rather than retrying silently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::gate::Gate;
use crate::queue::{CandidateOrigin, WorkItem, WorkQueue};
use crate::rpc::{ManagerClient, PollRequest};
use crate::stats::{ActivityKind, Stats};
use crate::state::SharedState;

pub struct Pollster {
    client: Arc<dyn ManagerClient>,
    queue: Arc<WorkQueue>,
    state: Arc<SharedState>,
    stats: Arc<Stats>,
    gate: Arc<Gate>,
    proc_count: usize,
    interval: Duration,
}

impl Pollster {
    #[must_use]
    pub fn new(
        client: Arc<dyn ManagerClient>,
        queue: Arc<WorkQueue>,
        state: Arc<SharedState>,
        stats: Arc<Stats>,
        gate: Arc<Gate>,
        proc_count: usize,
        interval: Duration,
    ) -> Self {
        Pollster { client, queue, state, stats, gate, proc_count, interval }
    }

    /// Run until `stop` is set. A fatal RPC error during a tick terminates
    /// the process immediately — a worker with no manager connection is
    /// useless and must not spin retrying forever.
    pub fn run_until_stopped(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            self.queue.wait_for_activity(self.interval);
            if stop.load(Ordering::Relaxed) {
                break;
            }
            if let Err(e) = self.tick() {
                error!("pollster: manager sync failed, terminating: {e}");
                std::process::exit(1);
            }
        }
    }

    /// One full poll cycle: report, absorb what comes back, then request
    /// candidates if wanted. Also drives the Gate's periodic leak-scan
    /// barrier, since nothing else in the process calls it on a schedule.
    pub fn tick(&self) -> crate::error::Result<()> {
        let new_signal = self.state.drain_new_signal();
        let want = self.queue.want_candidates(self.proc_count);

        let req = PollRequest {
            new_signal,
            new_corpus: Vec::new(),
            exec_total: self.stats.exec_total(),
            want_candidates: want,
            activity_counts: self.stats.drain_activity_counts(),
            executor_restarts: self.stats.drain_executor_restarts(),
        };
        let resp = self.client.poll(req)?;

        if !resp.max_signal_delta.is_empty() {
            self.state.extend_max(&resp.max_signal_delta);
        }

        for input in resp.new_inputs {
            let mut signal = input.signal;
            signal.extend(&input.cover);
            self.state.add_input(input.program, &signal);
            self.stats.record(ActivityKind::Seed);
        }

        let candidates_empty = resp.candidates.is_empty();
        let received = resp.candidates.len();
        for program in resp.candidates {
            self.queue.enqueue(WorkItem::Candidate { program, minimized: true, origin: CandidateOrigin::Manager });
        }
        if received > 0 {
            info!("pollster: received {received} candidates from manager");
        }

        if candidates_empty && self.state.mark_triaged() {
            info!("pollster: corpus fully triaged, establishing leak-scan baseline");
            self.gate.force_barrier(|| info!("gate: baseline leak scan complete"));
        }

        self.gate.run_barrier_if_due(|| info!("gate: periodic leak scan complete"));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calltable::CallSet;
    use crate::program::Program;
    use crate::rpc::MockManagerClient;
    use crate::signal::Signal;

    #[test]
    fn tick_drains_new_signal_and_reports_exec_total() {
        let state = Arc::new(SharedState::new());
        state.extend_max(&Signal::from_tokens([1, 2, 3]));
        let stats = Arc::new(Stats::new());
        stats.record_execution();
        let gate = Arc::new(Gate::new(4, usize::MAX));
        let client = Arc::new(MockManagerClient::new(CallSet::default()));
        let queue = Arc::new(WorkQueue::new());
        let pollster = Pollster::new(client, queue, Arc::clone(&state), stats, gate, 4, Duration::from_millis(10));
        pollster.tick().unwrap();
        assert!(state.drain_new_signal().is_empty(), "the first tick should have already drained it");
    }

    #[test]
    fn candidates_returned_by_poll_land_on_the_queue() {
        let state = Arc::new(SharedState::new());
        let stats = Arc::new(Stats::new());
        let gate = Arc::new(Gate::new(4, usize::MAX));
        let client = Arc::new(MockManagerClient::new(CallSet::default()));
        client.queue_candidate(Program::from_bytes(&[1]).unwrap());
        let queue = Arc::new(WorkQueue::new());
        let pollster = Pollster::new(client, Arc::clone(&queue), state, stats, gate, 4, Duration::from_millis(10));
        pollster.tick().unwrap();
        assert!(matches!(queue.dequeue(), Some(WorkItem::Candidate { .. })));
    }

    #[test]
    fn an_empty_candidate_response_marks_the_corpus_triaged_and_forces_a_barrier() {
        let state = Arc::new(SharedState::new());
        let stats = Arc::new(Stats::new());
        let gate = Arc::new(Gate::new(1, usize::MAX));
        let client = Arc::new(MockManagerClient::new(CallSet::default()));
        let queue = Arc::new(WorkQueue::new());
        let pollster = Pollster::new(client, queue, Arc::clone(&state), stats, Arc::clone(&gate), 4, Duration::from_millis(10));
        assert!(!state.have_triaged_all());
        pollster.tick().unwrap();
        assert!(state.have_triaged_all());
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn new_inputs_from_a_poll_are_folded_into_the_corpus() {
        let state = Arc::new(SharedState::new());
        let stats = Arc::new(Stats::new());
        let gate = Arc::new(Gate::new(4, usize::MAX));
        let client = Arc::new(MockManagerClient::new(CallSet::default()));
        client.queue_input(crate::rpc::Input {
            program: Program::from_bytes(&[9]).unwrap(),
            signal: Signal::from_tokens([1]),
            cover: Signal::from_tokens([2]),
            call_index: 0,
        });
        let queue = Arc::new(WorkQueue::new());
        let pollster = Pollster::new(client, queue, Arc::clone(&state), stats, gate, 4, Duration::from_millis(10));
        pollster.tick().unwrap();
        assert_eq!(state.corpus_len(), 1);
        assert!(state.max_signal_snapshot().is_subset_of(&Signal::from_tokens([1, 2])));
    }
}
