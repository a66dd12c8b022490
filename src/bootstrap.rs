//! The ordered startup handshake that brings a worker from a validated
//! config to a running [`crate::fuzzer::Fuzzer`].
//!
//! Each step depends on state the previous one produced, so this is a
//! straight-line function rather than a builder: connect to the manager,
//! reconcile call sets, seed the corpus, then hand off to the Fuzzer and
//! Pollster threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal as UnixSignal};

use crate::calltable::{CallSet, ChoiceTable};
use crate::cli::Config;
use crate::error::{Error, Result};
use crate::executor::ExecutorHandle;
use crate::fuzzer::Fuzzer;
use crate::pollster::Pollster;
use crate::proc::ProcConfig;
use crate::rpc::{CheckRequest, ConnectRequest, ManagerClient};
use crate::stats::{ActivityKind, Stats};
use crate::state::SharedState;

/// Set by the SIGINT/SIGTERM handler; `install_shutdown_handler` installs
/// it once, at most, and subsequent bootstraps reuse the same flag since
/// `sigaction` is process-global.
static PREEMPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_preemption_signal(_: nix::libc::c_int) {
    PREEMPTED.store(true, Ordering::SeqCst);
}

/// Install a handler that flips [`PREEMPTED`] on SIGINT/SIGTERM. The actual
/// preemption-marker log and non-zero exit happen on the watcher thread
/// spawned alongside it, since logging from a signal handler is unsound.
fn install_shutdown_handler() -> Result<std::thread::JoinHandle<()>> {
    let handler = SigHandler::Handler(on_preemption_signal);
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // Safety: `on_preemption_signal` only stores to an atomic, which is
    // async-signal-safe.
    unsafe {
        signal::sigaction(UnixSignal::SIGINT, &action)
            .map_err(|e| Error::config(format!("failed to install SIGINT handler: {e}")))?;
        signal::sigaction(UnixSignal::SIGTERM, &action)
            .map_err(|e| Error::config(format!("failed to install SIGTERM handler: {e}")))?;
    }
    Ok(std::thread::Builder::new()
        .name("vmfuzz-shutdown-watcher".into())
        .spawn(|| {
            while !PREEMPTED.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
            }
            error!("preempted by signal, exiting");
            std::process::exit(1);
        })
        .expect("failed to spawn shutdown watcher thread"))
}

/// Everything that falls out of a successful bootstrap: a running fuzzer
/// and its pollster, both already seeded and threaded.
pub struct Running {
    pub fuzzer: Fuzzer,
    pub pollster_stop: Arc<std::sync::atomic::AtomicBool>,
    pub pollster_thread: std::thread::JoinHandle<()>,
}

/// Host-side syscalls this worker can actually invoke. Real probing (which
/// syscalls exist, which are blocked by seccomp, etc) is out of scope; this
/// stand-in reports every call the manager claims to support.
fn probe_host_supported_calls(manager_enabled: &CallSet) -> CallSet {
    manager_enabled.clone()
}

/// Calls reachable given resource-dependency constraints. Out of scope;
/// this stand-in is the identity over the manager's enabled set.
fn compute_reachable_calls(manager_enabled: &CallSet) -> CallSet {
    manager_enabled.clone()
}

pub fn bootstrap<E, F>(
    config: &Config,
    client: Arc<dyn ManagerClient>,
    mut make_executor: F,
) -> Result<Running>
where
    E: ExecutorHandle + Send + 'static,
    F: FnMut(usize) -> E,
{
    // 1. parse configuration; validate enumerated options.
    config.validate()?;

    // 2. install shutdown handler: on signal, log a preemption marker and
    //    exit non-zero.
    let _shutdown_watcher = install_shutdown_handler()?;

    // 3. connect: exchange identity for the manager's enabled call set and
    //    any corpus it already has on file.
    info!("connecting to manager as {}", config.name);
    let connect_resp = client.connect(ConnectRequest {
        name: config.name.clone(),
        arch: config.arch.clone(),
    })?;

    // 4. probe what this host can actually run.
    let host_supported = probe_host_supported_calls(&connect_resp.manager_enabled_calls);

    // 5. check: the manager must accept our host's call set before we
    //    start spending cycles on calls it doesn't expect from us.
    let check_resp = client.check(CheckRequest { host_supported_calls: host_supported.clone() })?;
    if !check_resp.accepted {
        return Err(Error::capability_mismatch(
            check_resp.reason.unwrap_or_else(|| "manager rejected host call set".into()),
        ));
    }

    // 6. resolve dependency reachability over the agreed call set.
    let reachable = compute_reachable_calls(&connect_resp.manager_enabled_calls);

    // 7. build the immutable choice table every Proc will sample from.
    let call_set = CallSet::intersect(&connect_resp.manager_enabled_calls, &host_supported, &reachable);
    if call_set.is_empty() {
        return Err(Error::capability_mismatch("intersection of enabled/supported/reachable calls is empty"));
    }
    let table = ChoiceTable::new(call_set);

    // 8. construct the fuzzer's shared state and seed the corpus the
    //    manager handed us at connect time.
    let mut fuzzer = Fuzzer::new(table, config.procs, config.leak_check_every);
    let state = fuzzer.state();
    let stats = fuzzer.stats();
    seed_corpus(&state, &stats, connect_resp.initial_corpus);

    // 9. spawn the proc threads.
    fuzzer.spawn_procs(config.procs, ProcConfig::default(), &mut make_executor);

    // 10. spawn the pollster thread, decoupled from the procs so a slow
    //     manager never blocks fuzzing progress.
    let pollster_stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let pollster = Pollster::new(
        Arc::clone(&client),
        fuzzer.queue(),
        fuzzer.state(),
        fuzzer.stats(),
        fuzzer.gate(),
        config.procs,
        Duration::from_secs(1),
    );
    let stop_for_thread = Arc::clone(&pollster_stop);
    let pollster_thread = std::thread::Builder::new()
        .name("vmfuzz-pollster".into())
        .spawn(move || pollster.run_until_stopped(&stop_for_thread))
        .expect("failed to spawn pollster thread");

    info!("worker {} bootstrapped with {} procs", config.name, config.procs);
    Ok(Running { fuzzer, pollster_stop, pollster_thread })
}

fn seed_corpus(state: &Arc<SharedState>, stats: &Arc<Stats>, initial_corpus: Vec<crate::program::Program>) {
    for program in initial_corpus {
        // seeds arrive with no known signal; they earn their place in
        // max/corpus signal only once a proc triages them from the queue.
        state.add_input(program, &crate::signal::Signal::new());
        stats.record(ActivityKind::Seed);
    }
}

impl Running {
    pub fn shutdown(mut self) {
        self.fuzzer.stop();
        self.fuzzer.join();
        self.pollster_stop.store(true, std::sync::atomic::Ordering::Relaxed);
        let _ = self.pollster_thread.join();
    }
}
