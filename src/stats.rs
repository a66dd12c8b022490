//! Lock-free activity counters.
//!
//! Every Proc increments these as it works; the Pollster drains the
//! "per-poll" subset with a swap-to-zero read so each tick's report only
//! carries that tick's activity, while `exec_total` stays monotone for the
//! lifetime of the process.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// The activity kinds a Proc reports as it cycles through the fuzz loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Generate,
    Fuzz,
    Candidate,
    Triage,
    Minimize,
    Smash,
    Hint,
    Seed,
}

const KIND_COUNT: usize = 8;

fn kind_index(kind: ActivityKind) -> usize {
    match kind {
        ActivityKind::Generate => 0,
        ActivityKind::Fuzz => 1,
        ActivityKind::Candidate => 2,
        ActivityKind::Triage => 3,
        ActivityKind::Minimize => 4,
        ActivityKind::Smash => 5,
        ActivityKind::Hint => 6,
        ActivityKind::Seed => 7,
    }
}

/// The eight per-kind counters in wire form, ready to ship to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivityCounts {
    pub generate: u64,
    pub fuzz: u64,
    pub candidate: u64,
    pub triage: u64,
    pub minimize: u64,
    pub smash: u64,
    pub hint: u64,
    pub seed: u64,
}

impl From<[u64; KIND_COUNT]> for ActivityCounts {
    fn from(raw: [u64; KIND_COUNT]) -> Self {
        ActivityCounts {
            generate: raw[0],
            fuzz: raw[1],
            candidate: raw[2],
            triage: raw[3],
            minimize: raw[4],
            smash: raw[5],
            hint: raw[6],
            seed: raw[7],
        }
    }
}

/// Process-wide counters, safe to share by reference across Procs.
pub struct Stats {
    by_kind: [AtomicU64; KIND_COUNT],
    exec_total: AtomicU64,
    executor_restarts: AtomicU64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    #[must_use]
    pub fn new() -> Self {
        Stats {
            by_kind: std::array::from_fn(|_| AtomicU64::new(0)),
            exec_total: AtomicU64::new(0),
            executor_restarts: AtomicU64::new(0),
        }
    }

    pub fn record(&self, kind: ActivityKind) {
        self.by_kind[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    /// Every execution, regardless of what kind of work it served.
    pub fn record_execution(&self) {
        self.exec_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executor_restart(&self) {
        self.executor_restarts.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn exec_total(&self) -> u64 {
        self.exec_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn executor_restarts(&self) -> u64 {
        self.executor_restarts.load(Ordering::Relaxed)
    }

    /// Drain and return the per-kind counts accumulated since the last
    /// drain. `exec_total` stays untouched since it is cumulative for the
    /// life of the process.
    pub fn drain_per_kind(&self) -> [u64; KIND_COUNT] {
        let mut out = [0u64; KIND_COUNT];
        for (i, counter) in self.by_kind.iter().enumerate() {
            out[i] = counter.swap(0, Ordering::Relaxed);
        }
        out
    }

    /// The eight per-kind counters, drained, as the struct the Pollster
    /// ships to the manager.
    pub fn drain_activity_counts(&self) -> ActivityCounts {
        self.drain_per_kind().into()
    }

    /// Swap `executor_restarts` to zero, returning what had accumulated.
    pub fn drain_executor_restarts(&self) -> u64 {
        self.executor_restarts.swap(0, Ordering::Relaxed)
    }
}
