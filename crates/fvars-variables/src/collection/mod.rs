#![forbid(unsafe_code)]

//! Keyed collection of plain values diffed per element against a baseline.
//!
//! # Architecture
//!
//! Every operation runs in two phases:
//!
//! 1. **Selection** ([`diff::Selection`]): scan the input against the current
//!    table and plan one action per key (the first applicable occurrence
//!    of a key wins).
//! 2. **Application** (`commit`): snapshot each touched key, write the table,
//!    run the container-level validators over the whole membership, recompute
//!    `CHANGED`/`INVALID`/`WARNING`, then publish a change event followed by a
//!    validation event.
//!
//! An empty plan publishes nothing and returns [`ChangeResult::NotChanged`],
//! except for the maintenance passes (`refresh*`, `clear_validation*`), which
//! always publish a validation event.
//!
//! # Invariants
//!
//! 1. `modified_keys` equals the keys whose element state has `ADDED`,
//!    `CHANGED`, or `REMOVED`.
//! 2. Every current key has element info; info without an element means
//!    `REMOVED`.
//! 3. Removal never erases baseline memory: re-adding a baseline key is
//!    classified against its baseline value.
//! 4. `reset` publishes exactly one change and one validation event.

mod config;
mod diff;
mod events;
mod table;

use std::any::Any;
use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use fvars_core::{
    Chain, ChangeEventRef, ChangeResult, ChangeSource, ChangeUpcast, ElementState, EventStream,
    Listener, Node, NodeCore, Subscription, ValidateEventRef, ValidateUpcast, VariableState,
};

pub use config::{CollectionConfig, ElementMap};
pub use events::{CollectionChangeEvent, CollectionValidateEvent, ElementDelta, ElementSnapshot};

use diff::{Action, Selection};
use table::{ElementInfo, ElementsTable};

struct CollectionData<K, T, R> {
    initial: ElementMap<K, T>,
    table: ElementsTable<K, T, R>,
    errors: Chain<R>,
    warnings: Chain<R>,
}

/// Observable keyed collection of plain values.
pub struct CollectionVariable<K, T, R = String> {
    core: NodeCore,
    config: CollectionConfig<K, T, R>,
    data: RefCell<CollectionData<K, T, R>>,
    on_change: EventStream<Rc<CollectionChangeEvent<K, T, R>>>,
    on_validate: EventStream<Rc<CollectionValidateEvent<K, T, R>>>,
}

/// De-duplicate by key, first occurrence wins, keeping input order.
fn dedup_by_key<K: Clone + Eq + Hash, T>(
    elements: impl IntoIterator<Item = T>,
    key_of: impl Fn(&T) -> K,
) -> Vec<(K, T)> {
    let mut seen = AHashSet::new();
    let mut out = Vec::new();
    for element in elements {
        let key = key_of(&element);
        if seen.insert(key.clone()) {
            out.push((key, element));
        }
    }
    out
}

impl<K, T, R> CollectionVariable<K, T, R>
where
    K: Clone + Eq + Hash + 'static,
    T: Clone + 'static,
    R: Clone + 'static,
{
    /// Collection whose current membership equals its baseline.
    #[must_use]
    pub fn new(config: CollectionConfig<K, T, R>, initial: impl IntoIterator<Item = T>) -> Rc<Self> {
        let initial: Vec<T> = initial.into_iter().collect();
        Self::with_current(config, initial.clone(), initial)
    }

    /// Collection with a current membership that may differ from the baseline.
    #[must_use]
    pub fn with_current(
        config: CollectionConfig<K, T, R>,
        initial: impl IntoIterator<Item = T>,
        current: impl IntoIterator<Item = T>,
    ) -> Rc<Self> {
        let (initial, table) = Self::build_table(&config, initial, current);
        let (errors, warnings) = config.validate_collection(&table.elements);

        let mut state = VariableState::default().with_derived(
            !table.modified_keys().is_empty(),
            !errors.is_empty() || !table.invalid_keys().is_empty(),
            !warnings.is_empty() || !table.warning_keys().is_empty(),
        );
        state.remove(VariableState::DIRTY);
        state.set(VariableState::READ_ONLY, config.read_only);

        let core = NodeCore::new(state);
        let id = core.id();
        Rc::new(Self {
            core,
            config,
            data: RefCell::new(CollectionData {
                initial,
                table,
                errors,
                warnings,
            }),
            on_change: EventStream::new(id),
            on_validate: EventStream::new(id),
        })
    }

    fn build_table(
        config: &CollectionConfig<K, T, R>,
        initial: impl IntoIterator<Item = T>,
        current: impl IntoIterator<Item = T>,
    ) -> (ElementMap<K, T>, ElementsTable<K, T, R>) {
        let initial: ElementMap<K, T> = dedup_by_key(initial, |e| config.key_of(e))
            .into_iter()
            .collect();
        let mut table = ElementsTable::new();
        for (key, element) in dedup_by_key(current, |e| config.key_of(e)) {
            let info = config.element_info(&initial, &key, &element, true);
            table.put(key, element, info);
        }
        for key in initial.keys() {
            if !table.contains(key) {
                table.set_info(key.clone(), ElementInfo::removed());
            }
        }
        (initial, table)
    }

    // ── Readers ─────────────────────────────────────────────────────────

    pub fn on_change(&self) -> &EventStream<Rc<CollectionChangeEvent<K, T, R>>> {
        &self.on_change
    }

    pub fn on_validate(&self) -> &EventStream<Rc<CollectionValidateEvent<K, T, R>>> {
        &self.on_validate
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<T> {
        self.data.borrow().table.get(key).cloned()
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.data.borrow().table.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.borrow().table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of the current membership.
    #[must_use]
    pub fn elements(&self) -> ElementMap<K, T> {
        self.data.borrow().table.elements.clone()
    }

    /// Borrow the current membership.
    pub fn with_elements<U>(&self, f: impl FnOnce(&ElementMap<K, T>) -> U) -> U {
        f(&self.data.borrow().table.elements)
    }

    /// Clone of the baseline.
    #[must_use]
    pub fn initial_elements(&self) -> ElementMap<K, T> {
        self.data.borrow().initial.clone()
    }

    #[must_use]
    pub fn invalid_keys(&self) -> AHashSet<K> {
        self.data.borrow().table.invalid_keys().clone()
    }

    #[must_use]
    pub fn warning_keys(&self) -> AHashSet<K> {
        self.data.borrow().table.warning_keys().clone()
    }

    /// Keys added, changed, or removed relative to the baseline.
    #[must_use]
    pub fn modified_keys(&self) -> AHashSet<K> {
        self.data.borrow().table.modified_keys().clone()
    }

    /// Element status of `key`; `NOT_FOUND` for keys unknown to both the
    /// baseline and the current membership.
    #[must_use]
    pub fn get_state(&self, key: &K) -> ElementState {
        self.data.borrow().table.state_of(key)
    }

    #[must_use]
    pub fn get_errors(&self, key: &K) -> Chain<R> {
        self.data.borrow().table.errors_of(key)
    }

    #[must_use]
    pub fn get_warnings(&self, key: &K) -> Chain<R> {
        self.data.borrow().table.warnings_of(key)
    }

    /// Container-level errors.
    #[must_use]
    pub fn errors(&self) -> Chain<R> {
        self.data.borrow().errors.clone()
    }

    /// Container-level warnings.
    #[must_use]
    pub fn warnings(&self) -> Chain<R> {
        self.data.borrow().warnings.clone()
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Add an element whose key is not present.
    pub fn add(&self, element: T) -> ChangeResult {
        self.add_many(std::iter::once(element))
    }

    pub fn add_many(&self, elements: impl IntoIterator<Item = T>) -> ChangeResult {
        self.mutate(ChangeSource::Change, "add", |sel| {
            for element in elements {
                sel.add(element);
            }
        })
    }

    /// Replace the element of a present key.
    pub fn replace(&self, element: T) -> ChangeResult {
        self.replace_many(std::iter::once(element))
    }

    pub fn replace_many(&self, elements: impl IntoIterator<Item = T>) -> ChangeResult {
        self.mutate(ChangeSource::Change, "replace", |sel| {
            for element in elements {
                sel.replace(element, false);
            }
        })
    }

    /// Replace the element of a present key unless it compares equal.
    pub fn try_replace(&self, element: T) -> ChangeResult {
        self.try_replace_many(std::iter::once(element))
    }

    pub fn try_replace_many(&self, elements: impl IntoIterator<Item = T>) -> ChangeResult {
        self.mutate(ChangeSource::TryChange, "try_replace", |sel| {
            for element in elements {
                sel.replace(element, true);
            }
        })
    }

    /// Add if the key is absent, replace if present.
    pub fn add_or_replace(&self, element: T) -> ChangeResult {
        self.add_or_replace_many(std::iter::once(element))
    }

    pub fn add_or_replace_many(&self, elements: impl IntoIterator<Item = T>) -> ChangeResult {
        self.mutate(ChangeSource::Change, "add_or_replace", |sel| {
            for element in elements {
                sel.add_or_replace(element, false);
            }
        })
    }

    /// Add if the key is absent, replace if present and different.
    pub fn add_or_try_replace(&self, element: T) -> ChangeResult {
        self.add_or_try_replace_many(std::iter::once(element))
    }

    pub fn add_or_try_replace_many(&self, elements: impl IntoIterator<Item = T>) -> ChangeResult {
        self.mutate(ChangeSource::TryChange, "add_or_try_replace", |sel| {
            for element in elements {
                sel.add_or_replace(element, true);
            }
        })
    }

    /// Remove a present key.
    pub fn remove(&self, key: K) -> ChangeResult {
        self.remove_many(std::iter::once(key))
    }

    pub fn remove_many(&self, keys: impl IntoIterator<Item = K>) -> ChangeResult {
        self.mutate(ChangeSource::Change, "remove", |sel| {
            for key in keys {
                sel.remove(key);
            }
        })
    }

    /// Make `elements` the whole current membership: absent keys are added,
    /// present keys replaced, and keys missing from the input removed.
    pub fn change(&self, elements: impl IntoIterator<Item = T>) -> ChangeResult {
        self.change_all(ChangeSource::Change, elements.into_iter().collect(), false)
    }

    /// Like [`change`](Self::change), but a present key whose new element
    /// compares equal is refreshed instead of replaced.
    pub fn try_change(&self, elements: impl IntoIterator<Item = T>) -> ChangeResult {
        self.change_all(ChangeSource::TryChange, elements.into_iter().collect(), true)
    }

    /// Re-run element validators for every present key.
    pub fn refresh(&self) {
        self.maintain(None, false);
    }

    /// Re-run element validators for the given present keys.
    pub fn refresh_keys(&self, keys: impl IntoIterator<Item = K>) {
        self.maintain(Some(keys.into_iter().collect()), false);
    }

    /// Blank element validation for every present key, and the
    /// container-level chains.
    pub fn clear_validation(&self) {
        self.maintain(None, true);
    }

    /// Blank element validation for the given present keys.
    pub fn clear_validation_keys(&self, keys: impl IntoIterator<Item = K>) {
        self.maintain(Some(keys.into_iter().collect()), true);
    }

    /// Replace baseline and current membership with `initial`.
    pub fn reset(&self, initial: impl IntoIterator<Item = T>) -> ChangeResult {
        let initial: Vec<T> = initial.into_iter().collect();
        self.reset_with(initial.clone(), initial)
    }

    /// Replace baseline and current membership in one batch.
    pub fn reset_with(
        &self,
        initial: impl IntoIterator<Item = T>,
        current: impl IntoIterator<Item = T>,
    ) -> ChangeResult {
        if self.refuses_mutation("reset") {
            return ChangeResult::ReadOnly;
        }
        let previous_state = self.core.state();
        let (change, validate) = {
            let mut guard = self.data.borrow_mut();
            let data = &mut *guard;
            let (initial, table) = Self::build_table(&self.config, initial, current);
            data.initial = initial;
            let old = std::mem::replace(&mut data.table, table);

            let mut change = CollectionChangeEvent::new(ChangeSource::Reset, previous_state);
            let mut validated = Vec::new();
            let mut new_keys: Vec<K> = data.table.keys().cloned().collect();
            new_keys.extend(old.keys().filter(|key| !data.table.contains(key)).cloned());

            for key in new_keys {
                let delta = ElementDelta {
                    previous: old.snapshot(&key),
                    current: data.table.snapshot(&key),
                    key,
                };
                let bucket = match (old.get(&delta.key), data.table.get(&delta.key)) {
                    (None, Some(_)) => &mut change.added,
                    (Some(_), None) => &mut change.removed,
                    (Some(before), Some(after)) if self.config.equals(before, after) => {
                        &mut change.refreshed
                    }
                    _ => &mut change.replaced,
                };
                bucket.push(delta.clone());
                validated.push(delta);
            }

            let (errors, warnings) = self.config.validate_collection(&data.table.elements);
            self.finish_commit(data, previous_state, Some(change), validated, errors, warnings)
        };
        tracing::debug!(message = "collection.reset", node = %self.core.id());
        self.publish(change, validate);
        ChangeResult::Changed
    }

    fn change_all(&self, source: ChangeSource, input: Vec<T>, refresh_equal: bool) -> ChangeResult {
        let operation = if refresh_equal { "try_change" } else { "change" };
        self.mutate(source, operation, |sel| {
            for element in self.config.change_input(input) {
                sel.change_entry(element, refresh_equal);
            }
            sel.remove_unvisited();
        })
    }

    fn refuses_mutation(&self, operation: &'static str) -> bool {
        let state = self.core.state();
        if state.is_read_only() {
            tracing::trace!(
                message = "collection.refused",
                node = %self.core.id(),
                operation,
                disposed = state.is_disposed()
            );
            return true;
        }
        false
    }

    /// Select, then commit if anything applied.
    fn mutate(
        &self,
        source: ChangeSource,
        operation: &'static str,
        select: impl FnOnce(&mut Selection<'_, K, T, R>),
    ) -> ChangeResult {
        if self.refuses_mutation(operation) {
            return ChangeResult::ReadOnly;
        }
        let plan = {
            let data = self.data.borrow();
            let mut selection = Selection::new(&data.table, &self.config);
            select(&mut selection);
            selection.finish()
        };
        if plan.is_empty() {
            tracing::trace!(message = "collection.noop", node = %self.core.id(), operation);
            return ChangeResult::NotChanged;
        }
        let structural = plan.iter().any(Action::is_structural);
        tracing::debug!(
            message = "collection.apply",
            node = %self.core.id(),
            operation,
            actions = plan.len()
        );
        self.commit(source, plan, false);
        ChangeResult::from_applied(structural)
    }

    /// Validation pass over all (`None`) or some present keys.
    fn maintain(&self, keys: Option<Vec<K>>, clear: bool) {
        if self.core.state().is_disposed() {
            return;
        }
        let whole = keys.is_none();
        let plan = {
            let data = self.data.borrow();
            let mut selection = Selection::new(&data.table, &self.config);
            match keys {
                None => selection.revalidate_all(clear),
                Some(keys) => {
                    for key in keys {
                        selection.revalidate(key, clear);
                    }
                }
            }
            selection.finish()
        };
        self.commit(ChangeSource::Refresh, plan, clear && whole);
    }

    /// Application phase.
    fn commit(&self, source: ChangeSource, plan: Vec<Action<K, T>>, clear_container: bool) {
        let previous_state = self.core.state();
        let (change, validate) = {
            let mut guard = self.data.borrow_mut();
            let data = &mut *guard;
            let mut change = CollectionChangeEvent::new(source, previous_state);
            let mut validated = Vec::with_capacity(plan.len());

            for action in plan {
                let (delta, bucket) = match action {
                    Action::Add(key, element) => {
                        let previous = data.table.snapshot(&key);
                        let info = self.config.element_info(&data.initial, &key, &element, true);
                        data.table.put(key.clone(), element, info);
                        (Self::delta(&data.table, key, previous), &mut change.added)
                    }
                    Action::Replace(key, element) => {
                        let previous = data.table.snapshot(&key);
                        let info = self.config.element_info(&data.initial, &key, &element, true);
                        data.table.put(key.clone(), element, info);
                        (Self::delta(&data.table, key, previous), &mut change.replaced)
                    }
                    Action::Refresh(key) | Action::ClearValidation(key) if !data.table.contains(&key) => {
                        continue;
                    }
                    Action::Refresh(key) => {
                        let previous = data.table.snapshot(&key);
                        if let Some(element) = data.table.get(&key) {
                            let info = self.config.element_info(&data.initial, &key, element, true);
                            data.table.set_info(key.clone(), info);
                        }
                        (Self::delta(&data.table, key, previous), &mut change.refreshed)
                    }
                    Action::ClearValidation(key) => {
                        let previous = data.table.snapshot(&key);
                        if let Some(element) = data.table.get(&key) {
                            let info = self.config.element_info(&data.initial, &key, element, false);
                            data.table.set_info(key.clone(), info);
                        }
                        (Self::delta(&data.table, key, previous), &mut change.refreshed)
                    }
                    Action::Remove(key) => {
                        let previous = data.table.snapshot(&key);
                        let retained = data
                            .initial
                            .contains_key(&key)
                            .then(ElementInfo::removed);
                        data.table.remove(&key, retained);
                        (Self::delta(&data.table, key, previous), &mut change.removed)
                    }
                };
                bucket.push(delta.clone());
                validated.push(delta);
            }

            let (errors, warnings) = if clear_container {
                (Vec::new(), Vec::new())
            } else {
                self.config.validate_collection(&data.table.elements)
            };
            let change = (!change.is_empty()).then_some(change);
            self.finish_commit(data, previous_state, change, validated, errors, warnings)
        };
        self.publish(change, validate);
    }

    fn delta(
        table: &ElementsTable<K, T, R>,
        key: K,
        previous: ElementSnapshot<T, R>,
    ) -> ElementDelta<K, T, R> {
        ElementDelta {
            current: table.snapshot(&key),
            previous,
            key,
        }
    }

    /// Store container chains, recompute status, and build both events.
    #[allow(clippy::type_complexity)]
    fn finish_commit(
        &self,
        data: &mut CollectionData<K, T, R>,
        previous_state: VariableState,
        change: Option<CollectionChangeEvent<K, T, R>>,
        validated: Vec<ElementDelta<K, T, R>>,
        errors: Chain<R>,
        warnings: Chain<R>,
    ) -> (
        Option<Rc<CollectionChangeEvent<K, T, R>>>,
        Rc<CollectionValidateEvent<K, T, R>>,
    ) {
        let previous_errors = std::mem::replace(&mut data.errors, errors);
        let previous_warnings = std::mem::replace(&mut data.warnings, warnings);
        self.core.set_state(previous_state.with_derived(
            !data.table.modified_keys().is_empty(),
            !data.errors.is_empty() || !data.table.invalid_keys().is_empty(),
            !data.warnings.is_empty() || !data.table.warning_keys().is_empty(),
        ));

        let change = change.map(Rc::new);
        let validate = Rc::new(CollectionValidateEvent {
            previous_state,
            previous_errors,
            previous_warnings,
            elements: validated,
            change: change.clone(),
        });
        (change, validate)
    }

    fn publish(
        &self,
        change: Option<Rc<CollectionChangeEvent<K, T, R>>>,
        validate: Rc<CollectionValidateEvent<K, T, R>>,
    ) {
        if let Some(change) = change {
            self.on_change.publish(&change);
        }
        self.on_validate.publish(&validate);
    }

    fn set_read_only_flag(&self, read_only: bool) {
        let previous_state = self.core.state();
        if previous_state.is_disposed()
            || previous_state.contains(VariableState::READ_ONLY) == read_only
        {
            return;
        }
        let mut next = previous_state | VariableState::DIRTY;
        next.set(VariableState::READ_ONLY, read_only);
        self.core.set_state(next);
        let change = Rc::new(CollectionChangeEvent::new(
            ChangeSource::SetReadOnly,
            previous_state,
        ));
        self.on_change.publish(&change);
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        self.data.borrow().table.assert_consistent();
    }
}

impl<K, T, R> Node for CollectionVariable<K, T, R>
where
    K: Clone + Eq + Hash + 'static,
    T: Clone + 'static,
    R: Clone + 'static,
{
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn listen_change(&self, listener: Rc<dyn Listener<ChangeEventRef>>) -> Subscription {
        self.on_change.listen(Rc::new(ChangeUpcast(listener)))
    }

    fn listen_validate(&self, listener: Rc<dyn Listener<ValidateEventRef>>) -> Subscription {
        self.on_validate.listen(Rc::new(ValidateUpcast(listener)))
    }

    fn set_read_only(&self, read_only: bool) {
        self.set_read_only_flag(read_only);
    }

    fn dispose(&self) {
        if !self.core.mark_disposed() {
            return;
        }
        tracing::debug!(message = "collection.dispose", node = %self.core.id());
        self.on_change.dispose();
        self.on_validate.dispose();
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl<K, T, R> std::fmt::Debug for CollectionVariable<K, T, R>
where
    K: std::fmt::Debug,
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.borrow();
        f.debug_struct("CollectionVariable")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .field("elements", &data.table.elements)
            .finish()
    }
}

/// Build an [`ElementMap`] from elements, first occurrence of a key wins.
#[must_use]
pub fn element_map<K: Clone + Eq + Hash, T>(
    elements: impl IntoIterator<Item = T>,
    key_of: impl Fn(&T) -> K,
) -> ElementMap<K, T> {
    let mut map = AHashMap::new();
    for (key, element) in dedup_by_key(elements, key_of) {
        map.insert(key, element);
    }
    map
}
