//! The in-VM execution channel: run a program, collect its signal, request
//! comparison hints.
//!
//! The real wire protocol between worker and executor (a length-prefixed
//! binary frame describing shared-memory coverage layout) is out of scope;
//! this module defines the trait the rest of the pipeline calls through,
//! a `ChildExecutor` that spawns a subprocess and talks a serde_json
//! envelope over its stdio pipes, and a `MockExecutor` for deterministic
//! tests.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::program::Program;
use crate::signal::Signal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub signal: Signal,
    pub crashed: bool,
    pub crash_report: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Envelope {
    Run { program: Vec<u8> },
    RequestHints { program: Vec<u8> },
    Version,
    RunResult(ExecResultWire),
    HintsResult { signal: Signal },
    VersionResult { version: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExecResultWire {
    signal: Signal,
    crashed: bool,
    crash_report: Option<String>,
}

/// What a Proc needs from its executor, independent of transport.
pub trait ExecutorHandle {
    fn run(&mut self, program: &Program) -> Result<ExecResult>;
    fn request_hints(&mut self, program: &Program) -> Result<Signal>;
    fn version(&mut self) -> Result<u32>;
    /// Tear down and relaunch the child after a transport failure.
    fn respawn(&mut self) -> Result<()>;
}

/// Executor reached by spawning a child process and exchanging
/// newline-delimited JSON envelopes over its stdio.
pub struct ChildExecutor {
    command: Command,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ChildExecutor {
    pub fn spawn(program_path: &str, args: &[String]) -> Result<Self> {
        let mut command = Command::new(program_path);
        command.args(args);
        let child = Self::spawn_child(&mut command)?;
        let (stdin, stdout) = Self::pipes(&child)?;
        Ok(ChildExecutor { command, child, stdin, stdout })
    }

    fn spawn_child(command: &mut Command) -> Result<Child> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::executor(format!("failed to spawn executor child: {e}")))
    }

    fn pipes(child: &Child) -> Result<(ChildStdin, BufReader<ChildStdout>)> {
        // taken from the live child at spawn time; re-derived on respawn
        let stdin = child
            .stdin
            .as_ref()
            .ok_or_else(|| Error::executor("executor child has no stdin"))?
            .try_clone()
            .map_err(|e| Error::executor(format!("failed to clone stdin: {e}")))?;
        let stdout = child
            .stdout
            .as_ref()
            .ok_or_else(|| Error::executor("executor child has no stdout"))?
            .try_clone()
            .map_err(|e| Error::executor(format!("failed to clone stdout: {e}")))?;
        Ok((stdin, BufReader::new(stdout)))
    }

    fn exchange(&mut self, req: &Envelope) -> Result<Envelope> {
        let mut line = serde_json::to_string(req)
            .map_err(|e| Error::executor(format!("failed to encode request: {e}")))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .map_err(|e| Error::executor(format!("failed to write to executor: {e}")))?;
        let mut resp_line = String::new();
        let n = self
            .stdout
            .read_line(&mut resp_line)
            .map_err(|e| Error::executor(format!("failed to read from executor: {e}")))?;
        if n == 0 {
            return Err(Error::executor("executor closed its stdout"));
        }
        serde_json::from_str(&resp_line)
            .map_err(|e| Error::executor(format!("failed to decode response: {e}")))
    }
}

impl ExecutorHandle for ChildExecutor {
    fn run(&mut self, program: &Program) -> Result<ExecResult> {
        let req = Envelope::Run { program: program.to_bytes() };
        match self.exchange(&req)? {
            Envelope::RunResult(wire) => Ok(ExecResult {
                signal: wire.signal,
                crashed: wire.crashed,
                crash_report: wire.crash_report,
            }),
            other => Err(Error::executor(format!("unexpected reply to run: {other:?}"))),
        }
    }

    fn request_hints(&mut self, program: &Program) -> Result<Signal> {
        let req = Envelope::RequestHints { program: program.to_bytes() };
        match self.exchange(&req)? {
            Envelope::HintsResult { signal } => Ok(signal),
            other => Err(Error::executor(format!("unexpected reply to request_hints: {other:?}"))),
        }
    }

    fn version(&mut self) -> Result<u32> {
        match self.exchange(&Envelope::Version)? {
            Envelope::VersionResult { version } => Ok(version),
            other => Err(Error::executor(format!("unexpected reply to version: {other:?}"))),
        }
    }

    fn respawn(&mut self) -> Result<()> {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.child = Self::spawn_child(&mut self.command)?;
        let (stdin, stdout) = Self::pipes(&self.child)?;
        self.stdin = stdin;
        self.stdout = stdout;
        Ok(())
    }
}

/// Deterministic stand-in for tests: maps each distinct program to a
/// signal derived from its content hash, with no subprocess involved.
pub struct MockExecutor {
    version: u32,
    respawn_count: u32,
    fail_next_run: bool,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    #[must_use]
    pub fn new() -> Self {
        MockExecutor { version: 1, respawn_count: 0, fail_next_run: false }
    }

    pub fn fail_next_run(&mut self) {
        self.fail_next_run = true;
    }

    #[must_use]
    pub fn respawn_count(&self) -> u32 {
        self.respawn_count
    }

    fn signal_for(program: &Program) -> Signal {
        let hash = program.content_hash();
        // stable pseudo-coverage: a handful of tokens derived from the hash
        // and the program length, so distinct inputs get distinct signal
        // and truncating a program changes its signal deterministically.
        Signal::from_tokens((0..program.len() as u32).map(|i| (hash as u32) ^ i))
    }
}

impl ExecutorHandle for MockExecutor {
    fn run(&mut self, program: &Program) -> Result<ExecResult> {
        if self.fail_next_run {
            self.fail_next_run = false;
            return Err(Error::executor("mock executor transport failure"));
        }
        Ok(ExecResult {
            signal: Self::signal_for(program),
            crashed: false,
            crash_report: None,
        })
    }

    fn request_hints(&mut self, program: &Program) -> Result<Signal> {
        Ok(Self::signal_for(program))
    }

    fn version(&mut self) -> Result<u32> {
        Ok(self.version)
    }

    fn respawn(&mut self) -> Result<()> {
        self.respawn_count += 1;
        self.version += 1;
        Ok(())
    }
}
