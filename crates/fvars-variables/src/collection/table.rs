#![forbid(unsafe_code)]

//! Elements table: authoritative membership plus per-key derived info.
//!
//! # Invariants
//!
//! 1. Every key in `elements` has an entry in `info`.
//! 2. A key in `info` but not in `elements` carries `REMOVED`.
//! 3. `modified_keys`, `invalid_keys`, and `warning_keys` always equal the
//!    keys whose info has the corresponding bits; they are maintained
//!    incrementally by every write.

use std::hash::Hash;

use ahash::{AHashMap, AHashSet};
use fvars_core::{Chain, ElementState};

use super::events::ElementSnapshot;

/// Derived status and validation output of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ElementInfo<R> {
    pub(crate) state: ElementState,
    pub(crate) errors: Chain<R>,
    pub(crate) warnings: Chain<R>,
}

impl<R> ElementInfo<R> {
    pub(crate) fn new(structural: ElementState, errors: Chain<R>, warnings: Chain<R>) -> Self {
        Self {
            state: structural.with_validation(!errors.is_empty(), !warnings.is_empty()),
            errors,
            warnings,
        }
    }

    /// Info of a baseline key that is currently absent.
    pub(crate) fn removed() -> Self {
        Self {
            state: ElementState::REMOVED,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

pub(crate) struct ElementsTable<K, T, R> {
    pub(crate) elements: AHashMap<K, T>,
    info: AHashMap<K, ElementInfo<R>>,
    invalid_keys: AHashSet<K>,
    warning_keys: AHashSet<K>,
    modified_keys: AHashSet<K>,
}

impl<K: Clone + Eq + Hash, T: Clone, R: Clone> ElementsTable<K, T, R> {
    pub(crate) fn new() -> Self {
        Self {
            elements: AHashMap::new(),
            info: AHashMap::new(),
            invalid_keys: AHashSet::new(),
            warning_keys: AHashSet::new(),
            modified_keys: AHashSet::new(),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<&T> {
        self.elements.get(key)
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.elements.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.elements.len()
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &K> {
        self.elements.keys()
    }

    pub(crate) fn state_of(&self, key: &K) -> ElementState {
        self.info
            .get(key)
            .map_or(ElementState::NOT_FOUND, |info| info.state)
    }

    pub(crate) fn errors_of(&self, key: &K) -> Chain<R> {
        self.info
            .get(key)
            .map(|info| info.errors.clone())
            .unwrap_or_default()
    }

    pub(crate) fn warnings_of(&self, key: &K) -> Chain<R> {
        self.info
            .get(key)
            .map(|info| info.warnings.clone())
            .unwrap_or_default()
    }

    pub(crate) fn snapshot(&self, key: &K) -> ElementSnapshot<T, R> {
        match self.info.get(key) {
            Some(info) => ElementSnapshot {
                element: self.elements.get(key).cloned(),
                state: info.state,
                errors: info.errors.clone(),
                warnings: info.warnings.clone(),
            },
            None => ElementSnapshot::not_found(),
        }
    }

    /// Insert or overwrite an element with its info.
    pub(crate) fn put(&mut self, key: K, element: T, info: ElementInfo<R>) {
        self.elements.insert(key.clone(), element);
        self.set_info(key, info);
    }

    /// Overwrite the info of a key without touching membership.
    pub(crate) fn set_info(&mut self, key: K, info: ElementInfo<R>) {
        self.sync_sets(&key, info.state);
        self.info.insert(key, info);
    }

    /// Drop an element. `retained` keeps a `REMOVED` entry for a baseline
    /// key; `None` forgets the key entirely.
    pub(crate) fn remove(&mut self, key: &K, retained: Option<ElementInfo<R>>) -> Option<T> {
        let element = self.elements.remove(key);
        match retained {
            Some(info) => self.set_info(key.clone(), info),
            None => {
                self.info.remove(key);
                self.sync_sets(key, ElementState::empty());
            }
        }
        element
    }

    pub(crate) fn invalid_keys(&self) -> &AHashSet<K> {
        &self.invalid_keys
    }

    pub(crate) fn warning_keys(&self) -> &AHashSet<K> {
        &self.warning_keys
    }

    pub(crate) fn modified_keys(&self) -> &AHashSet<K> {
        &self.modified_keys
    }

    fn sync_sets(&mut self, key: &K, state: ElementState) {
        Self::toggle(&mut self.invalid_keys, key, state.is_invalid());
        Self::toggle(&mut self.warning_keys, key, state.is_warning());
        Self::toggle(&mut self.modified_keys, key, state.is_modified());
    }

    fn toggle(set: &mut AHashSet<K>, key: &K, member: bool) {
        if member {
            if !set.contains(key) {
                set.insert(key.clone());
            }
        } else {
            set.remove(key);
        }
    }

    /// Check the table invariants; used by tests.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for key in self.elements.keys() {
            assert!(self.info.contains_key(key), "element without info");
        }
        for (key, info) in &self.info {
            if !self.elements.contains_key(key) {
                assert_eq!(info.state, ElementState::REMOVED, "orphan info must be REMOVED");
            }
            assert_eq!(self.modified_keys.contains(key), info.state.is_modified());
            assert_eq!(self.invalid_keys.contains(key), info.state.is_invalid());
            assert_eq!(self.warning_keys.contains(key), info.state.is_warning());
        }
        for key in self
            .modified_keys
            .iter()
            .chain(&self.invalid_keys)
            .chain(&self.warning_keys)
        {
            assert!(self.info.contains_key(key), "derived key without info");
        }
    }
}
