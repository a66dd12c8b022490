//! Shared corpus and coverage-signal state.
//!
//! Two independent rwlocks: one guards the corpus plus its hash set, the
//! other guards all three signal sets together. `add_input` is the only
//! operation that needs both, and always takes them corpus-then-signal to
//! rule out lock-order cycles.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::program::{Program, ProgramHash};
use crate::signal::Signal;

#[derive(Default)]
struct Corpus {
    programs: Vec<Program>,
    hashes: HashSet<ProgramHash>,
}

#[derive(Default)]
struct Signals {
    max: Signal,
    corpus: Signal,
    new: Signal,
}

/// The worker's shared, process-wide state: corpus and coverage signals.
///
/// Owned by [`crate::fuzzer::Fuzzer`] behind an `Arc` and shared by
/// reference with every [`crate::proc::Proc`]: an explicit value, not an
/// ambient global.
pub struct SharedState {
    corpus: RwLock<Corpus>,
    signals: RwLock<Signals>,
    all_triaged: AtomicBool,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    #[must_use]
    pub fn new() -> Self {
        SharedState {
            corpus: RwLock::new(Corpus::default()),
            signals: RwLock::new(Signals::default()),
            all_triaged: AtomicBool::new(false),
        }
    }

    /// Add `program` to the corpus and extend `corpus_signal`/`max` by
    /// `signal`. Duplicate hashes are a silent no-op.
    ///
    /// Returns the subset of `signal` that was genuinely new to `max`, so
    /// callers can extend `new_signal` with exactly that (the report payload
    /// the Pollster ships to the manager).
    pub fn add_input(&self, program: Program, signal: &Signal) -> Signal {
        let hash = program.content_hash();
        let mut corpus = self.corpus.write().expect("corpus lock poisoned");
        if !corpus.hashes.insert(hash) {
            return Signal::new();
        }
        corpus.programs.push(program);
        drop(corpus);

        let mut signals = self.signals.write().expect("signal lock poisoned");
        let added_to_max = signals.max.extend(signal);
        signals.corpus.extend(signal);
        signals.new.extend(&added_to_max);
        added_to_max
    }

    /// An immutable snapshot of the corpus, usable without holding the lock.
    #[must_use]
    pub fn corpus_snapshot(&self) -> Vec<Program> {
        self.corpus
            .read()
            .expect("corpus lock poisoned")
            .programs
            .clone()
    }

    #[must_use]
    pub fn corpus_len(&self) -> usize {
        self.corpus.read().expect("corpus lock poisoned").programs.len()
    }

    /// Tokens in `signal` not yet present in `max`. Read-only.
    #[must_use]
    pub fn signal_diff_vs_max(&self, signal: &Signal) -> Signal {
        let signals = self.signals.read().expect("signal lock poisoned");
        signal.diff(&signals.max)
    }

    /// Extend `max` with `signal`, returning the tokens that were new.
    pub fn extend_max(&self, signal: &Signal) -> Signal {
        let mut signals = self.signals.write().expect("signal lock poisoned");
        let added = signals.max.extend(signal);
        signals.new.extend(&added);
        added
    }

    pub fn extend_corpus_signal(&self, signal: &Signal) {
        let mut signals = self.signals.write().expect("signal lock poisoned");
        signals.corpus.extend(signal);
    }

    #[must_use]
    pub fn max_signal_snapshot(&self) -> Signal {
        self.signals.read().expect("signal lock poisoned").max.clone()
    }

    #[must_use]
    pub fn corpus_signal_snapshot(&self) -> Signal {
        self.signals.read().expect("signal lock poisoned").corpus.clone()
    }

    /// Drain and return the accumulated new-signal set.
    pub fn drain_new_signal(&self) -> Signal {
        let mut signals = self.signals.write().expect("signal lock poisoned");
        signals.new.take()
    }

    #[must_use]
    pub fn have_triaged_all(&self) -> bool {
        self.all_triaged.load(Ordering::Acquire)
    }

    /// Latch the all-triaged flag. Idempotent; returns whether this call
    /// was the one that flipped it.
    pub fn mark_triaged(&self) -> bool {
        self.all_triaged
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    fn prog(bytes: &[u8]) -> Program {
        Program::from_bytes(bytes).unwrap()
    }

    #[test]
    fn duplicate_hash_is_a_silent_noop() {
        let state = SharedState::new();
        let signal = Signal::from_tokens([1, 2]);
        state.add_input(prog(&[1, 2, 3]), &signal);
        assert_eq!(state.corpus_len(), 1);
        let added_second_time = state.add_input(prog(&[1, 2, 3]), &signal);
        assert_eq!(state.corpus_len(), 1, "dedup by hash must not grow the corpus");
        assert!(added_second_time.is_empty());
    }

    #[test]
    fn corpus_signal_is_always_subset_of_max() {
        let state = SharedState::new();
        state.add_input(prog(&[1]), &Signal::from_tokens([10]));
        state.add_input(prog(&[2]), &Signal::from_tokens([10, 20]));
        let max = state.max_signal_snapshot();
        let corpus_sig = state.corpus_signal_snapshot();
        assert!(corpus_sig.is_subset_of(&max));
        assert_eq!(max, Signal::from_tokens([10, 20]));
    }

    #[test]
    fn max_signal_is_monotone_non_decreasing() {
        let state = SharedState::new();
        state.add_input(prog(&[1]), &Signal::from_tokens([1, 2]));
        let first = state.max_signal_snapshot();
        state.add_input(prog(&[2]), &Signal::from_tokens([2, 3]));
        let second = state.max_signal_snapshot();
        assert!(first.is_subset_of(&second));
    }

    #[test]
    fn drain_then_redrain_yields_empty() {
        let state = SharedState::new();
        state.add_input(prog(&[1]), &Signal::from_tokens([5]));
        let first = state.drain_new_signal();
        assert_eq!(first, Signal::from_tokens([5]));
        let second = state.drain_new_signal();
        assert!(second.is_empty());
    }

    #[test]
    fn tokens_published_between_two_drains_land_in_the_first_drain_only() {
        let state = SharedState::new();
        state.extend_max(&Signal::from_tokens([1]));
        state.extend_max(&Signal::from_tokens([2]));
        let first = state.drain_new_signal();
        assert_eq!(first, Signal::from_tokens([1, 2]));
        state.extend_max(&Signal::from_tokens([3]));
        let second = state.drain_new_signal();
        assert_eq!(second, Signal::from_tokens([3]));
    }

    #[test]
    fn mark_triaged_is_idempotent_and_reports_the_transition() {
        let state = SharedState::new();
        assert!(!state.have_triaged_all());
        assert!(state.mark_triaged());
        assert!(state.have_triaged_all());
        assert!(!state.mark_triaged(), "second call must not re-report the transition");
    }
}
