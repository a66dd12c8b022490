//! The per-thread fuzz loop.
//!
//! Each `Proc` owns one executor connection and repeatedly: pulls a work
//! item (or falls back to generating a fresh candidate when the queue is
//! empty), executes it behind the shared [`crate::gate::Gate`], and reacts
//! to what it sees — new coverage promotes a candidate to triage, triage
//! stabilizes the signal and minimizes the program before adding it to the
//! corpus, and corpus entries periodically get a mutation burst ("smash").
//! Transport failures talking to the executor trigger a respawn rather than
//! propagating, since a dead child is routine, not fatal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::calltable::ChoiceTable;
use crate::error::Result;
use crate::executor::ExecutorHandle;
use crate::gate::Gate;
use crate::program::{minimize, Program};
use crate::queue::{CandidateOrigin, TriageFlags, WorkItem, WorkQueue};
use crate::signal::Signal;
use crate::stats::{ActivityKind, Stats};
use crate::state::SharedState;

/// Tuning knobs that would otherwise be scattered magic numbers.
#[derive(Debug, Clone, Copy)]
pub struct ProcConfig {
    pub max_calls: usize,
    /// Triage reexecutions for self-generated (noisier) fuzz finds.
    pub triage_reexecutions_noisy: usize,
    /// Triage reexecutions for manager-supplied (already-vetted) candidates.
    pub triage_reexecutions_clean: usize,
    pub smash_mutations: usize,
}

impl Default for ProcConfig {
    fn default() -> Self {
        ProcConfig {
            max_calls: 16,
            triage_reexecutions_noisy: 3,
            triage_reexecutions_clean: 2,
            smash_mutations: 20,
        }
    }
}

pub struct Proc<E: ExecutorHandle> {
    id: usize,
    executor: E,
    queue: Arc<WorkQueue>,
    gate: Arc<Gate>,
    state: Arc<SharedState>,
    table: Arc<ChoiceTable>,
    stats: Arc<Stats>,
    config: ProcConfig,
    rng: StdRng,
}

impl<E: ExecutorHandle> Proc<E> {
    pub fn new(
        id: usize,
        executor: E,
        queue: Arc<WorkQueue>,
        gate: Arc<Gate>,
        state: Arc<SharedState>,
        table: Arc<ChoiceTable>,
        stats: Arc<Stats>,
        config: ProcConfig,
    ) -> Self {
        Proc {
            id,
            executor,
            queue,
            gate,
            state,
            table,
            stats,
            config,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Run until `stop` is set, processing one work item (or generated
    /// candidate) per iteration.
    pub fn run_until_stopped(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = self.step() {
                warn!("proc {}: {e}", self.id);
            }
        }
    }

    /// Process exactly one unit of work; public for tests that want
    /// deterministic single-stepping instead of a background thread.
    pub fn step(&mut self) -> Result<()> {
        let item = self.queue.dequeue().unwrap_or_else(|| self.generate_candidate());
        match item {
            WorkItem::Candidate { program, minimized, origin } => self.handle_candidate(program, minimized, origin),
            WorkItem::Triage { program, source_proc, signal, flags } => {
                self.handle_triage(program, source_proc, signal, flags)
            }
            WorkItem::Smash { program, budget } => self.handle_smash(program, budget),
        }
    }

    fn generate_candidate(&mut self) -> WorkItem {
        let corpus = self.state.corpus_snapshot();
        let program = if corpus.is_empty() {
            self.stats.record(ActivityKind::Generate);
            Program::generate(&self.table, &mut self.rng, self.config.max_calls)
        } else {
            let base = &corpus[self.rng.random_range(0..corpus.len())];
            base.mutate(&self.table, &mut self.rng)
        };
        WorkItem::Candidate { program, minimized: false, origin: CandidateOrigin::Fuzz }
    }

    fn execute(&mut self, program: &Program) -> Result<crate::executor::ExecResult> {
        let _permit = self.gate.enter();
        self.stats.record_execution();
        match self.executor.run(program) {
            Ok(result) => {
                if result.crashed {
                    warn!("proc {}: executor reported a crash", self.id);
                }
                Ok(result)
            }
            Err(e) => {
                warn!("proc {}: executor transport failure, respawning: {e}", self.id);
                self.stats.record_executor_restart();
                self.executor.respawn()?;
                Err(e)
            }
        }
    }

    fn handle_candidate(&mut self, program: Program, minimized: bool, origin: CandidateOrigin) -> Result<()> {
        self.stats.record(match origin {
            CandidateOrigin::Fuzz => ActivityKind::Fuzz,
            CandidateOrigin::Manager => ActivityKind::Candidate,
        });
        let result = self.execute(&program)?;
        let novel = self.state.signal_diff_vs_max(&result.signal);
        if novel.is_empty() {
            return Ok(());
        }
        debug!("proc {}: candidate found {} new coverage tokens", self.id, novel.len());

        let (program, flags) = match origin {
            CandidateOrigin::Fuzz => (program, TriageFlags { minimize: true, smash_after: true, noise: true }),
            CandidateOrigin::Manager => {
                let program = if minimized {
                    program
                } else {
                    self.stats.record(ActivityKind::Minimize);
                    self.minimize_against(&program, &result.signal)?
                };
                (program, TriageFlags { minimize: false, smash_after: true, noise: false })
            }
        };

        self.queue.enqueue(WorkItem::Triage {
            program,
            source_proc: self.id,
            signal: result.signal,
            flags,
        });
        Ok(())
    }

    fn handle_triage(
        &mut self,
        program: Program,
        source_proc: usize,
        first_signal: Signal,
        flags: TriageFlags,
    ) -> Result<()> {
        self.stats.record(ActivityKind::Triage);
        let reexecutions = if flags.noise {
            self.config.triage_reexecutions_noisy
        } else {
            self.config.triage_reexecutions_clean
        };
        let mut runs = vec![first_signal];
        for _ in 1..reexecutions.max(1) {
            let result = self.execute(&program)?;
            runs.push(result.signal);
        }
        let stable = Signal::intersect_all(runs.iter());
        let still_novel = self.state.signal_diff_vs_max(&stable);
        if still_novel.is_empty() {
            debug!(
                "proc {}: candidate from proc {} did not stabilize into new coverage",
                self.id, source_proc
            );
            return Ok(());
        }

        let minimized = if flags.minimize {
            self.stats.record(ActivityKind::Minimize);
            self.minimize_against(&program, &stable)?
        } else {
            program
        };

        let added = self.state.add_input(minimized.clone(), &stable);
        if added.is_empty() {
            return Ok(());
        }
        info!(
            "proc {}: corpus grew, +{} coverage tokens (corpus size {})",
            self.id,
            added.len(),
            self.state.corpus_len()
        );
        if flags.smash_after {
            self.queue.enqueue(WorkItem::Smash {
                program: minimized,
                budget: self.config.smash_mutations,
            });
        }
        Ok(())
    }

    /// Shrink `program` while re-executing to confirm the stabilized
    /// signal still holds, per the minimize predicate contract.
    fn minimize_against(&mut self, program: &Program, target: &Signal) -> Result<Program> {
        let mut last_err = None;
        let minimized = minimize(program, |candidate| match self.execute(candidate) {
            Ok(result) => target.is_subset_of(&result.signal),
            Err(e) => {
                last_err = Some(e);
                false
            }
        });
        if let Some(e) = last_err {
            warn!("proc {}: executor error during minimization, keeping best effort: {e}", self.id);
        }
        Ok(minimized)
    }

    fn handle_smash(&mut self, program: Program, budget: usize) -> Result<()> {
        self.stats.record(ActivityKind::Smash);
        let mut current = program;
        for _ in 0..budget {
            current = current.mutate(&self.table, &mut self.rng);
            self.stats.record(ActivityKind::Fuzz);
            let result = self.execute(&current)?;
            let novel = self.state.signal_diff_vs_max(&result.signal);
            if !novel.is_empty() {
                self.queue.enqueue(WorkItem::Triage {
                    program: current.clone(),
                    source_proc: self.id,
                    signal: result.signal,
                    flags: TriageFlags { minimize: true, smash_after: true, noise: true },
                });
            }
        }
        self.stats.record(ActivityKind::Hint);
        let _ = self.executor.request_hints(&current);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calltable::CallSet;
    use crate::executor::MockExecutor;

    fn fresh_proc(id: usize) -> Proc<MockExecutor> {
        let table = Arc::new(ChoiceTable::new(CallSet::from_names(["read", "write", "open", "close"])));
        Proc::new(
            id,
            MockExecutor::new(),
            Arc::new(WorkQueue::new()),
            Arc::new(Gate::new(2, usize::MAX)),
            Arc::new(SharedState::new()),
            table,
            Arc::new(Stats::new()),
            ProcConfig::default(),
        )
    }

    #[test]
    fn stepping_with_an_empty_queue_generates_and_executes_a_candidate() {
        let mut proc = fresh_proc(0);
        proc.step().unwrap();
        assert!(proc.stats.exec_total() >= 1);
    }

    #[test]
    fn a_candidate_with_novel_coverage_is_promoted_to_triage_and_joins_the_corpus() {
        let mut proc = fresh_proc(0);
        let program = Program::from_bytes(&[1, 2, 3]).unwrap();
        proc.handle_candidate(program, false, CandidateOrigin::Fuzz).unwrap();
        // triage item should now be queued
        assert!(matches!(proc.queue.dequeue(), Some(WorkItem::Triage { .. })));
    }

    #[test]
    fn a_manager_candidate_reported_as_minimized_skips_re_minimization() {
        let mut proc = fresh_proc(0);
        let program = Program::from_bytes(&[4, 5, 6]).unwrap();
        proc.handle_candidate(program, true, CandidateOrigin::Manager).unwrap();
        match proc.queue.dequeue() {
            Some(WorkItem::Triage { flags, .. }) => {
                assert!(!flags.minimize, "a manager-reported minimized candidate must not be re-minimized");
                assert!(!flags.noise, "manager candidates are not noisy");
            }
            other => panic!("expected a queued Triage item, got {other:?}"),
        }
    }

    #[test]
    fn triage_of_a_genuinely_novel_signal_grows_the_corpus() {
        let mut proc = fresh_proc(0);
        let program = Program::from_bytes(&[7, 8]).unwrap();
        let result = proc.execute(&program).unwrap();
        proc.handle_triage(
            program,
            0,
            result.signal,
            TriageFlags { minimize: true, smash_after: true, noise: true },
        )
        .unwrap();
        assert_eq!(proc.state.corpus_len(), 1);
    }

    #[test]
    fn triage_of_an_already_known_signal_does_not_grow_the_corpus() {
        let mut proc = fresh_proc(0);
        let program = Program::from_bytes(&[1]).unwrap();
        let result = proc.execute(&program).unwrap();
        proc.state.add_input(program.clone(), &result.signal);
        assert_eq!(proc.state.corpus_len(), 1);

        let result2 = proc.execute(&program).unwrap();
        proc.handle_triage(program, 0, result2.signal, TriageFlags::default()).unwrap();
        assert_eq!(proc.state.corpus_len(), 1, "re-triaging a known signal must not duplicate the corpus");
    }

    #[test]
    fn executor_failure_triggers_a_respawn_rather_than_propagating_unrecovered() {
        let mut proc = fresh_proc(0);
        proc.executor.fail_next_run();
        let program = Program::from_bytes(&[1]).unwrap();
        let err = proc.execute(&program);
        assert!(err.is_err());
        assert_eq!(proc.executor.respawn_count(), 1);
        // the executor is usable again immediately after
        assert!(proc.execute(&program).is_ok());
    }
}
