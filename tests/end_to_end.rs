//! End-to-end scenarios against the in-memory mock manager and mock
//! executor: bootstrap through to a running fuzzer, feed it known-novel
//! and known-stale programs, and check the corpus/signal/stats reflect
//! what should have happened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vmfuzz_worker::bootstrap::bootstrap;
use vmfuzz_worker::calltable::CallSet;
use vmfuzz_worker::cli::Config;
use vmfuzz_worker::executor::MockExecutor;
use vmfuzz_worker::program::Program;
use vmfuzz_worker::proc::{Proc, ProcConfig};
use vmfuzz_worker::queue::{CandidateOrigin, TriageFlags, WorkItem, WorkQueue};
use vmfuzz_worker::rpc::{ManagerClient, MockManagerClient};
use vmfuzz_worker::signal::Signal;
use vmfuzz_worker::gate::Gate;
use vmfuzz_worker::pollster::Pollster;
use vmfuzz_worker::state::SharedState;
use vmfuzz_worker::stats::Stats;

fn test_config(procs: usize) -> Config {
    Config {
        name: "worker-test".into(),
        arch: "amd64".into(),
        manager: String::new(),
        procs,
        leak_check_every: 1_000,
        output: "stdout".into(),
        executor_path: "unused-in-tests".into(),
        pprof: None,
        test: true,
    }
}

/// Scenario: a worker bootstraps against a manager that hands it an
/// initial corpus, runs for a short while, and makes progress (some
/// executions happen) without ever deadlocking on shutdown.
#[test]
fn bootstrap_seeds_corpus_and_runs_to_a_clean_shutdown() {
    let seed = Program::from_bytes(&[1, 2, 3]).unwrap();
    let client: Arc<dyn ManagerClient> = Arc::new(
        MockManagerClient::new(CallSet::from_names(["read", "write", "open"]))
            .with_initial_corpus(vec![seed.clone()]),
    );
    let config = test_config(2);
    let running = bootstrap(&config, client, |_id| MockExecutor::new()).unwrap();

    std::thread::sleep(Duration::from_millis(30));
    let exec_total = running.fuzzer.stats().exec_total();
    assert!(exec_total > 0, "the fuzzer should have executed at least one program");
    assert!(running.fuzzer.state().corpus_len() >= 1, "the seed corpus should be present");

    running.shutdown();
}

/// Scenario: the manager rejects our capability check; bootstrap must
/// fail cleanly with no threads left running.
#[test]
fn capability_mismatch_aborts_bootstrap() {
    let client: Arc<dyn ManagerClient> = Arc::new(
        MockManagerClient::new(CallSet::from_names(["read"])).rejecting_check(true),
    );
    let config = test_config(2);
    let result = bootstrap(&config, client, |_id| MockExecutor::new());
    assert!(result.is_err());
}

/// Scenario: a single proc, stepped manually, takes a program with known
/// novel coverage all the way from candidate through triage into the
/// corpus, and a second run of the same program does not duplicate it.
#[test]
fn a_novel_program_survives_triage_into_the_corpus_exactly_once() {
    let table = Arc::new(vmfuzz_worker::calltable::ChoiceTable::new(CallSet::from_names([
        "read", "write", "open", "close",
    ])));
    let queue = Arc::new(WorkQueue::new());
    let gate = Arc::new(vmfuzz_worker::gate::Gate::new(2, usize::MAX));
    let state = Arc::new(SharedState::new());
    let stats = Arc::new(Stats::new());
    let mut proc = Proc::new(
        0,
        MockExecutor::new(),
        Arc::clone(&queue),
        gate,
        Arc::clone(&state),
        table,
        stats,
        ProcConfig::default(),
    );

    let program = Program::from_bytes(&[9, 9, 9]).unwrap();
    queue.enqueue(WorkItem::Candidate { program: program.clone(), minimized: false, origin: CandidateOrigin::Fuzz });
    proc.step().unwrap(); // candidate -> triage enqueued
    proc.step().unwrap(); // triage -> corpus grows, smash enqueued

    assert_eq!(state.corpus_len(), 1);

    // re-submitting the same program as a fresh candidate must not grow
    // the corpus a second time, since its signal is already in `max`.
    queue.enqueue(WorkItem::Candidate { program, minimized: false, origin: CandidateOrigin::Fuzz });
    proc.step().unwrap();
    assert_eq!(state.corpus_len(), 1, "a program whose signal is already known must not re-enter the corpus");
}

/// Scenario: the queue's strict priority ordering holds even when all
/// three lanes are populated at once.
#[test]
fn queue_drains_triage_before_candidate_before_smash() {
    let queue = WorkQueue::new();
    let p = || Program::from_bytes(&[1]).unwrap();
    queue.enqueue(WorkItem::Smash { program: p(), budget: 1 });
    queue.enqueue(WorkItem::Candidate { program: p(), minimized: false, origin: CandidateOrigin::Fuzz });
    queue.enqueue(WorkItem::Triage {
        program: p(),
        source_proc: 0,
        signal: Signal::new(),
        flags: TriageFlags::default(),
    });

    assert!(matches!(queue.dequeue(), Some(WorkItem::Triage { .. })));
    assert!(matches!(queue.dequeue(), Some(WorkItem::Candidate { .. })));
    assert!(matches!(queue.dequeue(), Some(WorkItem::Smash { .. })));
}

/// Scenario: an executor that fails once is respawned and the proc keeps
/// making progress afterward rather than getting stuck.
#[test]
fn a_single_executor_failure_does_not_stall_the_proc() {
    let table = Arc::new(vmfuzz_worker::calltable::ChoiceTable::new(CallSet::from_names(["read", "write"])));
    let queue = Arc::new(WorkQueue::new());
    let gate = Arc::new(vmfuzz_worker::gate::Gate::new(1, usize::MAX));
    let state = Arc::new(SharedState::new());
    let stats = Arc::new(Stats::new());
    let mut executor = MockExecutor::new();
    executor.fail_next_run();
    let mut proc = Proc::new(0, executor, Arc::clone(&queue), gate, state, table, Arc::clone(&stats), ProcConfig::default());

    // first step hits the induced failure and must not panic
    let _ = proc.step();
    // second step should succeed and record an execution
    proc.step().unwrap();
    assert!(stats.exec_total() >= 1);
}

/// Scenario: stopping a fuzzer mid-flight joins every proc thread without
/// hanging, confirming the stop flag is observed promptly by all of them.
#[test]
fn stopping_a_multi_proc_fuzzer_joins_promptly() {
    let table = vmfuzz_worker::calltable::ChoiceTable::new(CallSet::from_names(["read", "write", "open"]));
    let mut fuzzer = vmfuzz_worker::fuzzer::Fuzzer::new(table, 4, 500);
    fuzzer.spawn_procs(4, ProcConfig::default(), |_id| MockExecutor::new());
    std::thread::sleep(Duration::from_millis(20));
    fuzzer.stop();

    let stopped = Arc::new(AtomicBool::new(false));
    let stopped_clone = Arc::clone(&stopped);
    let handle = std::thread::spawn(move || {
        fuzzer.join();
        stopped_clone.store(true, Ordering::SeqCst);
    });
    handle.join().unwrap();
    assert!(stopped.load(Ordering::SeqCst));
}

/// Scenario: a poll that returns no candidates for the first time flips
/// `allTriaged` from false to true and forces an immediate leak-scan
/// baseline through the gate, rather than waiting for the next scheduled
/// barrier.
#[test]
fn first_empty_candidate_poll_marks_all_triaged_and_forces_a_baseline_scan() {
    let state = Arc::new(SharedState::new());
    let stats = Arc::new(Stats::new());
    let gate = Arc::new(Gate::new(4, usize::MAX));
    let client: Arc<dyn ManagerClient> = Arc::new(MockManagerClient::new(CallSet::default()));
    let queue = Arc::new(WorkQueue::new());
    let pollster = Pollster::new(client, queue, Arc::clone(&state), stats, Arc::clone(&gate), 4, Duration::from_millis(10));

    assert!(!state.have_triaged_all());
    pollster.tick().unwrap();
    assert!(state.have_triaged_all(), "an empty candidates response must flip allTriaged");
    assert_eq!(gate.in_flight(), 0, "the forced baseline barrier must have drained and released");

    // a second tick must not re-trigger anything observable; allTriaged stays latched.
    pollster.tick().unwrap();
    assert!(state.have_triaged_all());
}
