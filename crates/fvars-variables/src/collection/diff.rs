#![forbid(unsafe_code)]

//! Selection phase of the diff engine.
//!
//! A [`Selection`] scans operation input against the current table and
//! decides, per key, which action applies. A key is claimed by the first
//! occurrence that yields an action; occurrences that are vetoed, equal, or
//! otherwise not applicable leave the key open for a later one.
//!
//! Selection never mutates the table. The resulting plan is committed by the
//! application phase in `CollectionVariable::commit`.

use std::hash::Hash;

use ahash::AHashSet;

use super::config::CollectionConfig;
use super::table::ElementsTable;

/// One planned per-key action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action<K, T> {
    Add(K, T),
    Replace(K, T),
    Refresh(K),
    ClearValidation(K),
    Remove(K),
}

impl<K, T> Action<K, T> {
    pub(crate) fn key(&self) -> &K {
        match self {
            Self::Add(key, _)
            | Self::Replace(key, _)
            | Self::Refresh(key)
            | Self::ClearValidation(key)
            | Self::Remove(key) => key,
        }
    }

    /// `true` for membership or value changes, `false` for validation passes.
    pub(crate) fn is_structural(&self) -> bool {
        matches!(self, Self::Add(..) | Self::Replace(..) | Self::Remove(..))
    }
}

pub(crate) struct Selection<'a, K, T, R> {
    table: &'a ElementsTable<K, T, R>,
    config: &'a CollectionConfig<K, T, R>,
    claimed: AHashSet<K>,
    visited: AHashSet<K>,
    plan: Vec<Action<K, T>>,
}

impl<'a, K, T, R> Selection<'a, K, T, R>
where
    K: Clone + Eq + Hash + 'static,
    T: Clone + 'static,
    R: Clone + 'static,
{
    pub(crate) fn new(
        table: &'a ElementsTable<K, T, R>,
        config: &'a CollectionConfig<K, T, R>,
    ) -> Self {
        Self {
            table,
            config,
            claimed: AHashSet::new(),
            visited: AHashSet::new(),
            plan: Vec::new(),
        }
    }

    fn is_claimed(&self, key: &K) -> bool {
        self.claimed.contains(key)
    }

    fn push(&mut self, action: Action<K, T>) -> bool {
        self.claimed.insert(action.key().clone());
        self.plan.push(action);
        true
    }

    /// Plan an addition if the key is absent and the veto allows it.
    pub(crate) fn add(&mut self, element: T) -> bool {
        let key = self.config.key_of(&element);
        if self.is_claimed(&key) {
            return false;
        }
        self.plan_add(key, element)
    }

    /// Plan a replacement if the key is present. With `only_if_different`,
    /// an equal replacement is skipped.
    pub(crate) fn replace(&mut self, element: T, only_if_different: bool) -> bool {
        let key = self.config.key_of(&element);
        if self.is_claimed(&key) {
            return false;
        }
        self.plan_replace(key, element, only_if_different)
    }

    /// Route to add or replace depending on presence.
    pub(crate) fn add_or_replace(&mut self, element: T, only_if_different: bool) -> bool {
        let key = self.config.key_of(&element);
        if self.is_claimed(&key) {
            return false;
        }
        if self.table.contains(&key) {
            self.plan_replace(key, element, only_if_different)
        } else {
            self.plan_add(key, element)
        }
    }

    /// Plan a removal if the key is present and the veto allows it.
    pub(crate) fn remove(&mut self, key: K) -> bool {
        if self.is_claimed(&key) {
            return false;
        }
        let Some(current) = self.table.get(&key) else {
            return false;
        };
        if !self.config.allows_removal(&key, current) {
            return false;
        }
        self.push(Action::Remove(key))
    }

    /// Plan a validation pass (`clear == false`) or a validation reset
    /// (`clear == true`) for a present key.
    pub(crate) fn revalidate(&mut self, key: K, clear: bool) -> bool {
        if self.is_claimed(&key) || !self.table.contains(&key) {
            return false;
        }
        self.push(if clear {
            Action::ClearValidation(key)
        } else {
            Action::Refresh(key)
        })
    }

    /// One entry of a full `change`/`try_change`: add if absent, replace if
    /// present. With `refresh_equal`, an equal element is refreshed instead.
    pub(crate) fn change_entry(&mut self, element: T, refresh_equal: bool) -> bool {
        let key = self.config.key_of(&element);
        self.visited.insert(key.clone());
        if self.is_claimed(&key) {
            return false;
        }
        let table = self.table;
        match table.get(&key) {
            Some(current) if refresh_equal && self.config.equals(current, &element) => {
                self.push(Action::Refresh(key))
            }
            Some(_) => self.plan_replace(key, element, false),
            None => self.plan_add(key, element),
        }
    }

    /// Plan removal of every present key absent from the `change_entry`
    /// input so far.
    pub(crate) fn remove_unvisited(&mut self) {
        let table = self.table;
        let rest: Vec<K> = table
            .keys()
            .filter(|key| !self.visited.contains(*key))
            .cloned()
            .collect();
        for key in rest {
            self.remove(key);
        }
    }

    /// Visit every present key with a validation pass.
    pub(crate) fn revalidate_all(&mut self, clear: bool) {
        let table = self.table;
        let keys: Vec<K> = table.keys().cloned().collect();
        for key in keys {
            self.revalidate(key, clear);
        }
    }

    pub(crate) fn finish(self) -> Vec<Action<K, T>> {
        self.plan
    }

    fn plan_add(&mut self, key: K, element: T) -> bool {
        if self.table.contains(&key) || !self.config.allows_addition(&element) {
            return false;
        }
        self.push(Action::Add(key, element))
    }

    fn plan_replace(&mut self, key: K, element: T, only_if_different: bool) -> bool {
        let Some(current) = self.table.get(&key) else {
            return false;
        };
        if only_if_different && self.config.equals(current, &element) {
            return false;
        }
        if !self.config.allows_replacement(current, &element) {
            return false;
        }
        self.push(Action::Replace(key, element))
    }
}
