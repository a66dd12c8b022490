use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::error;
use mimalloc::MiMalloc;

use vmfuzz_worker::bootstrap::bootstrap;
use vmfuzz_worker::calltable::CallSet;
use vmfuzz_worker::cli::Config;
use vmfuzz_worker::executor::{ChildExecutor, MockExecutor};
use vmfuzz_worker::rpc::{ManagerClient, MockManagerClient};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> ExitCode {
    env_logger::init();
    let config = Config::parse();

    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    let result = if config.test {
        run_self_test(&config)
    } else {
        run_against_manager(&config)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            if e.is_fatal() {
                ExitCode::FAILURE
            } else {
                ExitCode::from(2)
            }
        }
    }
}

fn run_self_test(config: &Config) -> vmfuzz_worker::Result<()> {
    let client: Arc<dyn ManagerClient> =
        Arc::new(MockManagerClient::new(CallSet::from_names(["read", "write", "open", "close"])));
    let running = bootstrap(config, client, |_id| MockExecutor::new())?;
    std::thread::sleep(std::time::Duration::from_secs(2));
    running.shutdown();
    Ok(())
}

fn run_against_manager(config: &Config) -> vmfuzz_worker::Result<()> {
    let client: Arc<dyn ManagerClient> = Arc::new(NotYetConnectedClient);
    let executor_path = config.executor_path.clone();
    let running = bootstrap(config, client, move |_id| {
        ChildExecutor::spawn(&executor_path, &[]).expect("failed to spawn executor")
    })?;
    // runs until the pollster thread exits: either the process receives
    // SIGINT/SIGTERM (bootstrap's shutdown handler exits directly) or a
    // poll call fails fatally.
    running.pollster_thread.join().ok();
    Ok(())
}

/// Placeholder transport used until a real manager connection is wired in;
/// always reports the manager as unreachable.
struct NotYetConnectedClient;

impl ManagerClient for NotYetConnectedClient {
    fn connect(
        &self,
        _req: vmfuzz_worker::rpc::ConnectRequest,
    ) -> vmfuzz_worker::Result<vmfuzz_worker::rpc::ConnectResponse> {
        Err(vmfuzz_worker::Error::rpc("no manager transport configured"))
    }

    fn check(
        &self,
        _req: vmfuzz_worker::rpc::CheckRequest,
    ) -> vmfuzz_worker::Result<vmfuzz_worker::rpc::CheckResponse> {
        Err(vmfuzz_worker::Error::rpc("no manager transport configured"))
    }

    fn poll(
        &self,
        _req: vmfuzz_worker::rpc::PollRequest,
    ) -> vmfuzz_worker::Result<vmfuzz_worker::rpc::PollResponse> {
        Err(vmfuzz_worker::Error::rpc("no manager transport configured"))
    }
}
