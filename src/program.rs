//! The opaque `Program` type.
//!
//! The real system represents a program as an ordered sequence of typed
//! system-call invocations, generated and mutated by a dedicated library.
//! That library is out of scope here; this module provides the minimal
//! stand-in the rest of the pipeline needs: content hashing, serialization,
//! and the two entry points (`generate`, `mutate`) the generation/mutation
//! engine would expose. Everything downstream only ever calls `len`,
//! `truncated`, `without_call`, and `content_hash` — it does not know or care
//! that the payload is "just bytes" underneath.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::calltable::ChoiceTable;
use crate::error::{Error, Result};

/// Stable identifier for a program, derived from its serialized bytes.
pub type ProgramHash = u64;

/// An ordered sequence of system-call invocations.
///
/// Opaque to every component except this module: other components treat the
/// payload as an indivisible blob and only call the methods below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    calls: Vec<u8>,
}

impl Program {
    /// Generate a fresh program by sampling calls from the choice table.
    ///
    /// Stand-in for the real generation engine: samples weighted indices out
    /// of the table and encodes them as a byte string of call markers.
    pub fn generate(table: &ChoiceTable, rng: &mut impl Rng, max_calls: usize) -> Self {
        let n = rng.random_range(1..=max_calls.max(1));
        let calls = (0..n).map(|_| table.sample(rng)).collect();
        Program { calls }
    }

    /// Produce a mutated copy of `self`.
    ///
    /// Stand-in for the real mutation engine: applies a handful of
    /// byte-level operations (flip, insert, splice, truncate).
    #[must_use]
    pub fn mutate(&self, table: &ChoiceTable, rng: &mut impl Rng) -> Self {
        let mut calls = self.calls.clone();
        if calls.is_empty() {
            calls.push(table.sample(rng));
        }
        match rng.random_range(0..4) {
            0 => {
                // flip a call to another one the table knows about
                let idx = rng.random_range(0..calls.len());
                calls[idx] = table.sample(rng);
            }
            1 => {
                // insert a new call
                let idx = rng.random_range(0..=calls.len());
                calls.insert(idx, table.sample(rng));
            }
            2 if calls.len() > 1 => {
                // splice out a call
                let idx = rng.random_range(0..calls.len());
                calls.remove(idx);
            }
            _ => {
                // append a call
                calls.push(table.sample(rng));
            }
        }
        Program { calls }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The program truncated to its first `n` calls, for minimization.
    #[must_use]
    pub fn truncated(&self, n: usize) -> Self {
        Program {
            calls: self.calls[..n.min(self.calls.len())].to_vec(),
        }
    }

    /// The program with the call at `idx` removed, for minimization.
    #[must_use]
    pub fn without_call(&self, idx: usize) -> Self {
        let mut calls = self.calls.clone();
        if idx < calls.len() {
            calls.remove(idx);
        }
        Program { calls }
    }

    #[must_use]
    pub fn content_hash(&self) -> ProgramHash {
        let mut hasher = DefaultHasher::new();
        self.calls.hash(&mut hasher);
        hasher.finish()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.calls.clone()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::invariant("program with zero calls is not well-formed"));
        }
        Ok(Program {
            calls: bytes.to_vec(),
        })
    }
}

/// Minimize `prog` toward the shortest prefix/subset that still satisfies
/// `signal_equal`. The caller supplies the predicate; this function only
/// knows about structural reduction.
pub fn minimize(prog: &Program, mut signal_equal: impl FnMut(&Program) -> bool) -> Program {
    let mut current = prog.clone();

    // Shrink from the back first: the real minimizer prefers shorter
    // prefixes, since later calls are more likely to be filler.
    let mut len = current.len();
    while len > 1 {
        let candidate = current.truncated(len - 1);
        if signal_equal(&candidate) {
            current = candidate;
            len = current.len();
        } else {
            break;
        }
    }

    // Then try dropping individual calls out of what remains.
    let mut idx = 0;
    while idx < current.len() && current.len() > 1 {
        let candidate = current.without_call(idx);
        if signal_equal(&candidate) {
            current = candidate;
        } else {
            idx += 1;
        }
    }

    current
}
