//! `CallSet` and `ChoiceTable`.
//!
//! `CallSet` is computed once at bootstrap by intersecting the manager's
//! enabled set, the host-supported syscalls, and resource-dependency
//! reachability; all three of those inputs are themselves out of scope
//! (host probing, the manager's set, and dependency resolution all live in
//! external collaborators), so this module only implements the intersection
//! itself plus the generation/mutation priority table built on top of it.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The set of system calls enabled for this worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSet {
    names: Vec<String>,
}

impl CallSet {
    pub fn from_names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        CallSet {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Intersect the manager-enabled set, the host-supported set, and the
    /// reachable set.
    #[must_use]
    pub fn intersect(manager_enabled: &CallSet, host_supported: &CallSet, reachable: &CallSet) -> Self {
        let names = manager_enabled
            .names
            .iter()
            .filter(|n| host_supported.names.contains(n) && reachable.names.contains(n))
            .cloned()
            .collect();
        CallSet { names }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Precomputed generation/mutation priorities over a [`CallSet`].
///
/// Immutable after construction; priorities are represented as a flat
/// cumulative-weight table so sampling is O(log n).
#[derive(Debug, Clone)]
pub struct ChoiceTable {
    calls: Vec<String>,
    cumulative_weights: Vec<u32>,
}

impl ChoiceTable {
    /// Build a table with uniform priority per call. A real implementation
    /// would weight by resource-dependency fan-out (out of scope here).
    #[must_use]
    pub fn new(calls: CallSet) -> Self {
        Self::with_weights(calls, None)
    }

    #[must_use]
    pub fn with_weights(calls: CallSet, weights: Option<Vec<u32>>) -> Self {
        let weights = weights.unwrap_or_else(|| vec![1; calls.names.len()]);
        assert_eq!(weights.len(), calls.names.len());
        let mut running = 0u32;
        let cumulative_weights = weights
            .iter()
            .map(|w| {
                running += (*w).max(1);
                running
            })
            .collect();
        ChoiceTable {
            calls: calls.names,
            cumulative_weights,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn call_name(&self, idx: u8) -> Option<&str> {
        self.calls.get(idx as usize).map(String::as_str)
    }

    /// Sample a call index weighted by priority, encoded as a single byte
    /// "call marker" consumed by [`crate::program::Program`].
    pub fn sample(&self, rng: &mut impl Rng) -> u8 {
        if self.calls.is_empty() {
            return 0;
        }
        let total = *self.cumulative_weights.last().unwrap();
        let pick = rng.random_range(0..total);
        let idx = self
            .cumulative_weights
            .partition_point(|&cum| cum <= pick);
        idx.min(self.calls.len() - 1) as u8
    }
}
