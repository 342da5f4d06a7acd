#![forbid(unsafe_code)]

//! Per-bit membership sets folding child status into parent status.
//!
//! Each tracked bit keeps its own key set: a child key is a member of the
//! `changed` set iff the child's last observed state carries `CHANGED`, and
//! so on. Folding is then a matter of set sizes, so aggregation can be tested
//! without any event stream.
//!
//! # Invariants
//!
//! 1. `CHANGED`, `INVALID`, and `WARNING` fold with any-of semantics.
//! 2. `READ_ONLY` folds with all-of semantics: the parent is read-only only
//!    when it tracks at least one child and every tracked child is.

use std::hash::Hash;

use ahash::AHashSet;
use fvars_core::VariableState;

#[derive(Debug, Clone)]
pub struct StatusAggregate<K> {
    changed: AHashSet<K>,
    invalid: AHashSet<K>,
    warning: AHashSet<K>,
    read_only: AHashSet<K>,
}

impl<K> Default for StatusAggregate<K> {
    fn default() -> Self {
        Self {
            changed: AHashSet::new(),
            invalid: AHashSet::new(),
            warning: AHashSet::new(),
            read_only: AHashSet::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> StatusAggregate<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current state of child `key`. Returns `true` if any
    /// membership changed.
    pub fn update(&mut self, key: &K, state: VariableState) -> bool {
        let mut moved = false;
        moved |= toggle(&mut self.changed, key, state.contains(VariableState::CHANGED));
        moved |= toggle(&mut self.invalid, key, state.contains(VariableState::INVALID));
        moved |= toggle(&mut self.warning, key, state.contains(VariableState::WARNING));
        moved |= toggle(&mut self.read_only, key, state.contains(VariableState::READ_ONLY));
        moved
    }

    /// Forget child `key` entirely.
    pub fn remove(&mut self, key: &K) {
        self.changed.remove(key);
        self.invalid.remove(key);
        self.warning.remove(key);
        self.read_only.remove(key);
    }

    pub fn clear(&mut self) {
        self.changed.clear();
        self.invalid.clear();
        self.warning.clear();
        self.read_only.clear();
    }

    /// Fold into `CHANGED`/`INVALID`/`WARNING`/`READ_ONLY` bits given the
    /// number of tracked children.
    #[must_use]
    pub fn fold(&self, tracked: usize) -> VariableState {
        let mut state = VariableState::empty();
        state.set(VariableState::CHANGED, !self.changed.is_empty());
        state.set(VariableState::INVALID, !self.invalid.is_empty());
        state.set(VariableState::WARNING, !self.warning.is_empty());
        state.set(
            VariableState::READ_ONLY,
            tracked > 0 && self.read_only.len() >= tracked,
        );
        state
    }

    #[must_use]
    pub fn changed_keys(&self) -> &AHashSet<K> {
        &self.changed
    }

    #[must_use]
    pub fn invalid_keys(&self) -> &AHashSet<K> {
        &self.invalid
    }

    #[must_use]
    pub fn warning_keys(&self) -> &AHashSet<K> {
        &self.warning
    }

    #[must_use]
    pub fn read_only_keys(&self) -> &AHashSet<K> {
        &self.read_only
    }
}

fn toggle<K: Clone + Eq + Hash>(set: &mut AHashSet<K>, key: &K, member: bool) -> bool {
    if member {
        if set.contains(key) {
            false
        } else {
            set.insert(key.clone())
        }
    } else {
        set.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_folds_to_default() {
        let agg: StatusAggregate<&str> = StatusAggregate::new();
        assert_eq!(agg.fold(0), VariableState::empty());
    }

    #[test]
    fn changed_is_any_of() {
        let mut agg = StatusAggregate::new();
        agg.update(&"a", VariableState::empty());
        agg.update(&"b", VariableState::CHANGED);
        assert!(agg.fold(2).is_changed());

        agg.update(&"b", VariableState::empty());
        assert!(!agg.fold(2).is_changed());
    }

    #[test]
    fn read_only_is_all_of() {
        let mut agg = StatusAggregate::new();
        agg.update(&"a", VariableState::READ_ONLY);
        agg.update(&"b", VariableState::empty());
        assert!(!agg.fold(2).contains(VariableState::READ_ONLY));

        agg.update(&"b", VariableState::READ_ONLY);
        assert!(agg.fold(2).contains(VariableState::READ_ONLY));

        agg.remove(&"a");
        assert!(agg.fold(1).contains(VariableState::READ_ONLY));
    }

    #[test]
    fn update_reports_movement() {
        let mut agg = StatusAggregate::new();
        assert!(agg.update(&1, VariableState::INVALID | VariableState::WARNING));
        assert!(!agg.update(&1, VariableState::INVALID | VariableState::WARNING));
        assert!(agg.update(&1, VariableState::WARNING));
        assert!(agg.invalid_keys().is_empty());
        assert!(agg.warning_keys().contains(&1));
    }

    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn child_state() -> impl Strategy<Value = VariableState> {
        (0u8..16).prop_map(|bits| {
            let mut state = VariableState::empty();
            state.set(VariableState::CHANGED, bits & 1 != 0);
            state.set(VariableState::INVALID, bits & 2 != 0);
            state.set(VariableState::WARNING, bits & 4 != 0);
            state.set(VariableState::READ_ONLY, bits & 8 != 0);
            state
        })
    }

    proptest! {
        #[test]
        fn fold_matches_full_recount(
            updates in proptest::collection::vec((0u8..5, proptest::option::of(child_state())), 0..30)
        ) {
            let mut agg = StatusAggregate::new();
            let mut model: BTreeMap<u8, VariableState> = BTreeMap::new();
            for (key, state) in updates {
                match state {
                    Some(state) => {
                        agg.update(&key, state);
                        model.insert(key, state);
                    }
                    None => {
                        agg.remove(&key);
                        model.remove(&key);
                    }
                }
                let folded = agg.fold(model.len());
                prop_assert_eq!(folded.is_changed(), model.values().any(|s| s.is_changed()));
                prop_assert_eq!(folded.is_invalid(), model.values().any(|s| s.is_invalid()));
                prop_assert_eq!(folded.is_warning(), model.values().any(|s| s.is_warning()));
                prop_assert_eq!(
                    folded.contains(VariableState::READ_ONLY),
                    !model.is_empty()
                        && model.values().all(|s| s.contains(VariableState::READ_ONLY))
                );
            }
        }
    }
}
