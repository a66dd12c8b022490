//! Command-line configuration.

use clap::Parser;

use crate::error::{Error, Result};

/// In-VM execution worker for a coverage-guided kernel system-call fuzzer.
#[derive(Debug, Clone, Parser)]
#[command(name = "vmfuzz-worker", version, about)]
pub struct Config {
    /// Identifier this worker reports to the manager.
    #[arg(long)]
    pub name: String,

    /// Target architecture, e.g. "amd64" or "arm64".
    #[arg(long)]
    pub arch: String,

    /// Manager address to connect to, "host:port".
    #[arg(long)]
    pub manager: String,

    /// Number of parallel fuzzing Procs to run.
    #[arg(long, default_value_t = 4)]
    pub procs: usize,

    /// Run a periodic leak scan after this many executions per proc.
    #[arg(long, default_value_t = 10_000)]
    pub leak_check_every: usize,

    /// Where crash reports and logs are written: "none", "stdout", "dmesg", or "file".
    #[arg(long, default_value = "stdout")]
    pub output: String,

    /// Path to the executor binary spawned per proc.
    #[arg(long, default_value = "vmfuzz-executor")]
    pub executor_path: String,

    /// Path to a pprof profile to write on exit, if set.
    #[arg(long)]
    pub pprof: Option<String>,

    /// Run in self-test mode against an in-process mock manager and
    /// executor instead of connecting out.
    #[arg(long, default_value_t = false)]
    pub test: bool,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("--name must not be empty"));
        }
        if self.arch.trim().is_empty() {
            return Err(Error::config("--arch must not be empty"));
        }
        if !self.test && self.manager.trim().is_empty() {
            return Err(Error::config("--manager must not be empty unless --test is set"));
        }
        if self.procs == 0 {
            return Err(Error::config("--procs must be at least 1"));
        }
        if self.leak_check_every == 0 {
            return Err(Error::config("--leak-check-every must be at least 1"));
        }
        if !matches!(self.output.as_str(), "none" | "stdout" | "dmesg" | "file") {
            return Err(Error::config("--output must be one of none|stdout|dmesg|file"));
        }
        Ok(())
    }
}
