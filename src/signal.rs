//! Coverage signal sets.
//!
//! A [`Signal`] is just a set of opaque 32-bit coverage tokens. The three
//! global sets (`max`, `corpus`, `new`) are all plain `Signal` values; the
//! invariants between them (`corpus ⊆ max`, `new ⊆ max`) are enforced by
//! [`crate::state::SharedState`], not by this type.

use std::collections::HashSet;

/// A set of coverage tokens observed from one or more executions.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Signal(HashSet<u32>);

impl Signal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tokens(tokens: impl IntoIterator<Item = u32>) -> Self {
        Self(tokens.into_iter().collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, token: u32) -> bool {
        self.0.contains(&token)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    /// Tokens in `self` that are not in `other`.
    #[must_use]
    pub fn diff(&self, other: &Signal) -> Signal {
        Signal(self.0.difference(&other.0).copied().collect())
    }

    /// Tokens present in every one of `runs`. Empty input yields the empty set.
    #[must_use]
    pub fn intersect_all<'a>(runs: impl IntoIterator<Item = &'a Signal>) -> Signal {
        let mut iter = runs.into_iter();
        let Some(first) = iter.next() else {
            return Signal::new();
        };
        let mut acc = first.0.clone();
        for run in iter {
            acc.retain(|t| run.0.contains(t));
        }
        Signal(acc)
    }

    /// Merge `other` into `self` in place, returning the tokens that were new.
    pub fn extend(&mut self, other: &Signal) -> Signal {
        let added: HashSet<u32> = other.0.difference(&self.0).copied().collect();
        self.0.extend(added.iter().copied());
        Signal(added)
    }

    /// Swap out the set for an empty one, returning what was drained.
    #[must_use]
    pub fn take(&mut self) -> Signal {
        std::mem::take(self)
    }

    #[must_use]
    pub fn is_subset_of(&self, other: &Signal) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl FromIterator<u32> for Signal {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Signal(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_only_reports_novel_tokens() {
        let max = Signal::from_tokens([1, 2, 3]);
        let run = Signal::from_tokens([2, 3, 4, 5]);
        let diff = run.diff(&max);
        assert_eq!(diff, Signal::from_tokens([4, 5]));
    }

    #[test]
    fn intersect_all_of_noisy_runs_is_subset_of_each() {
        let a = Signal::from_tokens([1, 2, 3]);
        let b = Signal::from_tokens([2, 3, 4]);
        let c = Signal::from_tokens([2, 3]);
        let stable = Signal::intersect_all([&a, &b, &c]);
        assert_eq!(stable, Signal::from_tokens([2, 3]));
        assert!(stable.is_subset_of(&a));
        assert!(stable.is_subset_of(&b));
        assert!(stable.is_subset_of(&c));
    }

    #[test]
    fn deterministic_signal_stabilizes_to_itself() {
        let run = Signal::from_tokens([7, 8, 9]);
        let stable = Signal::intersect_all([&run, &run, &run]);
        assert_eq!(stable, run);
    }

    #[test]
    fn extend_reports_only_newly_added_tokens() {
        let mut max = Signal::from_tokens([1, 2]);
        let added = max.extend(&Signal::from_tokens([2, 3]));
        assert_eq!(added, Signal::from_tokens([3]));
        assert_eq!(max, Signal::from_tokens([1, 2, 3]));
    }

    #[test]
    fn take_drains_and_leaves_empty_set() {
        let mut s = Signal::from_tokens([1, 2]);
        let drained = s.take();
        assert_eq!(drained, Signal::from_tokens([1, 2]));
        assert!(s.is_empty());
    }
}
