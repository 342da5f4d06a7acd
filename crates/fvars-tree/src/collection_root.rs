#![forbid(unsafe_code)]

//! Keyed collection of owned child containers, diffed against a baseline
//! set of keys.
//!
//! # Ownership model
//!
//! Two structures are kept apart:
//!
//! - `owned`: every node this root is responsible for, live or removed.
//!   An entry leaves only when the node is disposed (by its own code, by a
//!   swap in [`change`](CollectionVariableRoot::change)/`reset`, or with the
//!   root).
//! - `live`: the owned keys currently part of the collection.
//!
//! `remove` moves a key out of `live` but keeps the node so `restore` can
//! bring it back. Every owned child is watched for disposal; only live
//! children bubble their events.
//!
//! # Invariants
//!
//! 1. `live ⊆ owned.keys()`.
//! 2. The aggregate tracks exactly the live keys.
//! 3. Root `CHANGED` is set iff a live child is changed or the live key set
//!    differs from the baseline key set.
//! 4. A node is owned by at most one key of at most one root.

use std::any::Any;
use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use fvars_core::{
    ChangeEventRef, ChangeResult, ChangeSource, ChangeUpcast, ElementState, EventStream, Listener,
    Node, NodeCore, NodeId, Subscription, ValidateEventRef, ValidateUpcast, VariableState,
    check_adoption,
};

use crate::aggregate::StatusAggregate;
use crate::config::{CollectionRootConfig, TreeChanges};
use crate::events::{ChangeLinks, NodeDelta, TreeChangeEvent, TreeValidateEvent};
use crate::relay::{ChildHost, ChildLinks};

struct Owned<N> {
    node: Rc<N>,
    links: ChildLinks,
}

struct TreeData<K, N> {
    owned: AHashMap<K, Owned<N>>,
    order: Vec<K>,
    live: AHashSet<K>,
    baseline: AHashSet<K>,
    aggregate: StatusAggregate<K>,
    read_only: bool,
    links: ChangeLinks<K>,
}

impl<K: Clone + Eq + Hash, N: Node> TreeData<K, N> {
    fn element_state(&self, key: &K) -> ElementState {
        if self.live.contains(key) {
            let mut state = if self.baseline.contains(key) {
                ElementState::empty()
            } else {
                ElementState::ADDED
            };
            if let Some(owned) = self.owned.get(key) {
                let child = owned.node.state();
                state.set(ElementState::CHANGED, child.is_changed());
                state.set(ElementState::INVALID, child.is_invalid());
                state.set(ElementState::WARNING, child.is_warning());
            }
            state
        } else if self.baseline.contains(key) {
            ElementState::REMOVED
        } else {
            ElementState::NOT_FOUND
        }
    }

    fn structurally_changed(&self) -> bool {
        self.live.len() != self.baseline.len()
            || self.live.iter().any(|key| !self.baseline.contains(key))
    }

    fn node_of(&self, key: &K) -> Option<Rc<N>> {
        self.owned.get(key).map(|owned| Rc::clone(&owned.node))
    }

    /// Drop ownership of `key`; the caller disposes the returned node.
    fn disown(&mut self, key: &K) -> Option<Rc<N>> {
        let owned = self.owned.remove(key)?;
        self.order.retain(|k| k != key);
        self.live.remove(key);
        self.aggregate.remove(key);
        self.links.forget(key);
        Some(owned.node)
    }
}

enum TreeAction<K, N> {
    Add(K, Rc<N>),
    Swap(K, Rc<N>),
    Remove(K),
    Restore(K),
}

/// Root owning a keyed collection of child containers.
pub struct CollectionVariableRoot<K, N> {
    core: NodeCore,
    me: Weak<Self>,
    config: CollectionRootConfig<K, N>,
    data: RefCell<TreeData<K, N>>,
    on_change: EventStream<Rc<TreeChangeEvent<K>>>,
    on_validate: EventStream<Rc<TreeValidateEvent<K>>>,
}

impl<K, N> CollectionVariableRoot<K, N>
where
    K: Clone + Eq + Hash + std::fmt::Debug + 'static,
    N: Node,
{
    /// Root adopting `initial` as its baseline. Nodes that cannot be adopted
    /// are skipped with a warning; the first node of a key wins.
    #[must_use]
    pub fn new(
        config: CollectionRootConfig<K, N>,
        initial: impl IntoIterator<Item = Rc<N>>,
    ) -> Rc<Self> {
        let read_only = config.read_only;
        let core = NodeCore::new(if read_only {
            VariableState::READ_ONLY
        } else {
            VariableState::empty()
        });
        let id = core.id();
        let root = Rc::new_cyclic(|me| Self {
            core,
            me: me.clone(),
            config,
            data: RefCell::new(TreeData {
                owned: AHashMap::new(),
                order: Vec::new(),
                live: AHashSet::new(),
                baseline: AHashSet::new(),
                aggregate: StatusAggregate::new(),
                read_only,
                links: ChangeLinks::new(),
            }),
            on_change: EventStream::new(id),
            on_validate: EventStream::new(id),
        });
        root.seed(initial);
        root
    }

    fn seed(&self, initial: impl IntoIterator<Item = Rc<N>>) {
        let incoming = self.admissible(initial);
        let mut data = self.data.borrow_mut();
        for (key, node) in incoming {
            if data.read_only {
                node.set_read_only(true);
            }
            data.baseline.insert(key.clone());
            self.adopt(&mut data, key, node);
        }
        self.recompute(&data, self.core.state(), false);
    }

    fn host(&self) -> Weak<dyn ChildHost<K>> {
        self.me.clone()
    }

    pub fn on_change(&self) -> &EventStream<Rc<TreeChangeEvent<K>>> {
        &self.on_change
    }

    pub fn on_validate(&self) -> &EventStream<Rc<TreeValidateEvent<K>>> {
        &self.on_validate
    }

    // ── Readers ─────────────────────────────────────────────────────────

    /// Live child under `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Rc<N>> {
        let data = self.data.borrow();
        if data.live.contains(key) {
            data.node_of(key)
        } else {
            None
        }
    }

    /// Owned child under `key`, live or removed.
    #[must_use]
    pub fn get_owned(&self, key: &K) -> Option<Rc<N>> {
        self.data.borrow().node_of(key)
    }

    /// `true` if `key` is live.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.data.borrow().live.contains(key)
    }

    /// `true` if `key` is owned but not live, so it can be restored.
    #[must_use]
    pub fn is_removed(&self, key: &K) -> bool {
        let data = self.data.borrow();
        data.owned.contains_key(key) && !data.live.contains(key)
    }

    /// Number of live children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.borrow().live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys in adoption order.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        let data = self.data.borrow();
        data.order
            .iter()
            .filter(|key| data.live.contains(*key))
            .cloned()
            .collect()
    }

    /// Owned, non-live keys in adoption order.
    #[must_use]
    pub fn removed_keys(&self) -> Vec<K> {
        let data = self.data.borrow();
        data.order
            .iter()
            .filter(|key| !data.live.contains(*key))
            .cloned()
            .collect()
    }

    /// Live keys that are not part of the baseline.
    #[must_use]
    pub fn added_keys(&self) -> AHashSet<K> {
        let data = self.data.borrow();
        data.live
            .iter()
            .filter(|key| !data.baseline.contains(*key))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn initial_keys(&self) -> AHashSet<K> {
        self.data.borrow().baseline.clone()
    }

    #[must_use]
    pub fn changed_keys(&self) -> AHashSet<K> {
        self.data.borrow().aggregate.changed_keys().clone()
    }

    #[must_use]
    pub fn invalid_keys(&self) -> AHashSet<K> {
        self.data.borrow().aggregate.invalid_keys().clone()
    }

    #[must_use]
    pub fn warning_keys(&self) -> AHashSet<K> {
        self.data.borrow().aggregate.warning_keys().clone()
    }

    #[must_use]
    pub fn get_state(&self, key: &K) -> ElementState {
        self.data.borrow().element_state(key)
    }

    // ── Mutations ───────────────────────────────────────────────────────

    pub fn add(&self, node: Rc<N>) -> ChangeResult {
        self.add_many(std::iter::once(node))
    }

    /// Adopt nodes whose keys are not owned at all.
    pub fn add_many(&self, nodes: impl IntoIterator<Item = Rc<N>>) -> ChangeResult {
        if self.refuses_mutation("add") {
            return ChangeResult::ReadOnly;
        }
        let plan = {
            let data = self.data.borrow();
            let mut placed = AHashSet::new();
            let mut plan = Vec::new();
            for node in nodes {
                let key = self.config.key_of(&node);
                if placed.contains(&key) || data.owned.contains_key(&key) {
                    continue;
                }
                if self.config.allows_addition(&node) && self.adoption_allowed(&key, &*node) {
                    placed.insert(key.clone());
                    plan.push(TreeAction::Add(key, node));
                }
            }
            plan
        };
        self.commit(ChangeSource::Change, "add", plan)
    }

    pub fn remove(&self, key: K) -> ChangeResult {
        self.remove_many(std::iter::once(key))
    }

    /// Move live keys out of the collection. The nodes stay owned.
    pub fn remove_many(&self, keys: impl IntoIterator<Item = K>) -> ChangeResult {
        if self.refuses_mutation("remove") {
            return ChangeResult::ReadOnly;
        }
        let plan = {
            let data = self.data.borrow();
            let mut seen = AHashSet::new();
            let mut plan = Vec::new();
            for key in keys {
                if !seen.insert(key.clone()) {
                    continue;
                }
                if let Some(action) = self.plan_removal(&data, key) {
                    plan.push(action);
                }
            }
            plan
        };
        self.commit(ChangeSource::Change, "remove", plan)
    }

    pub fn restore(&self, key: K) -> ChangeResult {
        self.restore_many(std::iter::once(key))
    }

    /// Bring removed, undisposed nodes back into the collection.
    pub fn restore_many(&self, keys: impl IntoIterator<Item = K>) -> ChangeResult {
        if self.refuses_mutation("restore") {
            return ChangeResult::ReadOnly;
        }
        let plan = {
            let data = self.data.borrow();
            let mut seen = AHashSet::new();
            let mut plan = Vec::new();
            for key in keys {
                if !seen.insert(key.clone()) {
                    continue;
                }
                if let Some(action) = self.plan_restoration(&data, key) {
                    plan.push(action);
                }
            }
            plan
        };
        self.commit(ChangeSource::Change, "restore", plan)
    }

    /// Apply a whole batch: live keys missing from `keys_to_restore` are
    /// removed, listed keys are restored, and new nodes are adopted or
    /// swapped in for owned non-baseline keys.
    ///
    /// A node that is already owned under its key is not eligible; its key
    /// stays live only if it is listed in `keys_to_restore`.
    pub fn change(&self, changes: TreeChanges<K, N>) -> ChangeResult {
        if self.refuses_mutation("change") {
            return ChangeResult::ReadOnly;
        }
        let changes = self.config.change_input(changes);
        let plan = {
            let data = self.data.borrow();
            let mut placed = AHashSet::new();
            let mut keep = AHashSet::new();
            let mut plan = Vec::new();

            for node in changes.elements_to_add {
                let key = self.config.key_of(&node);
                if placed.contains(&key) {
                    continue;
                }
                let swap = match data.owned.get(&key) {
                    None => false,
                    Some(owned) if Rc::ptr_eq(&owned.node, &node) => continue,
                    Some(_) if data.baseline.contains(&key) => {
                        tracing::trace!(
                            message = "collection_root.swap_refused",
                            root = %self.core.id(),
                            key = ?key
                        );
                        continue;
                    }
                    Some(_) => true,
                };
                if !self.config.allows_addition(&node) || !self.adoption_allowed(&key, &*node) {
                    continue;
                }
                placed.insert(key.clone());
                plan.push(if swap {
                    TreeAction::Swap(key, node)
                } else {
                    TreeAction::Add(key, node)
                });
            }

            for key in changes.keys_to_restore {
                if placed.contains(&key) || !keep.insert(key.clone()) {
                    continue;
                }
                if let Some(action) = self.plan_restoration(&data, key) {
                    plan.push(action);
                }
            }

            let doomed: Vec<K> = data
                .order
                .iter()
                .filter(|key| {
                    data.live.contains(*key) && !keep.contains(*key) && !placed.contains(*key)
                })
                .cloned()
                .collect();
            for key in doomed {
                if let Some(action) = self.plan_removal(&data, key) {
                    plan.push(action);
                }
            }
            plan
        };
        self.commit(ChangeSource::Change, "change", plan)
    }

    /// Replace the baseline and the whole membership in one batch. Owned
    /// nodes not passed back by reference are disposed.
    pub fn reset(&self, initial: impl IntoIterator<Item = Rc<N>>) -> ChangeResult {
        if self.refuses_mutation("reset") {
            return ChangeResult::ReadOnly;
        }
        let incoming = self.admissible(initial);
        let previous_state = self.core.state();
        let (change, validate, displaced) = {
            let mut data = self.data.borrow_mut();
            let mut change = TreeChangeEvent::new(ChangeSource::Reset, previous_state);
            let mut touched = Vec::new();
            let mut displaced = Vec::new();

            let kept: AHashMap<K, bool> = incoming
                .iter()
                .map(|(key, node)| {
                    let same = data
                        .owned
                        .get(key)
                        .is_some_and(|owned| Rc::ptr_eq(&owned.node, node));
                    (key.clone(), same)
                })
                .collect();

            for key in data.order.clone() {
                if kept.get(&key).copied().unwrap_or(false) {
                    continue;
                }
                let previous = data.element_state(&key);
                if let Some(node) = data.disown(&key) {
                    change.removed.push(NodeDelta {
                        key: key.clone(),
                        node: Rc::clone(&node) as Rc<dyn Node>,
                        previous,
                        current: ElementState::NOT_FOUND,
                    });
                    touched.push(key);
                    displaced.push(node);
                }
            }

            data.baseline = incoming.iter().map(|(key, _)| key.clone()).collect();
            for (key, node) in incoming {
                if data.owned.contains_key(&key) {
                    if data.live.contains(&key) {
                        continue;
                    }
                    let previous = data.element_state(&key);
                    self.set_live(&mut data, &key);
                    change.restored.push(NodeDelta {
                        key: key.clone(),
                        node: node as Rc<dyn Node>,
                        previous,
                        current: data.element_state(&key),
                    });
                } else {
                    let previous = data.element_state(&key);
                    self.adopt(&mut data, key.clone(), Rc::clone(&node));
                    change.added.push(NodeDelta {
                        key: key.clone(),
                        node: node as Rc<dyn Node>,
                        previous,
                        current: data.element_state(&key),
                    });
                }
                touched.push(key);
            }

            self.recompute(&data, previous_state, true);
            let (change, validate) = Self::events(previous_state, change, touched);
            (change, validate, displaced)
        };
        tracing::debug!(
            message = "collection_root.reset",
            root = %self.core.id(),
            displaced = displaced.len(),
            live = self.len()
        );
        for node in displaced {
            node.dispose();
        }
        self.publish(Some(change), validate);
        ChangeResult::Changed
    }

    // ── Planning helpers ────────────────────────────────────────────────

    fn refuses_mutation(&self, operation: &'static str) -> bool {
        let disposed = self.core.state().is_disposed();
        if disposed || self.data.borrow().read_only {
            tracing::trace!(
                message = "collection_root.refused",
                root = %self.core.id(),
                operation,
                disposed
            );
            return true;
        }
        false
    }

    fn adoption_allowed(&self, key: &K, node: &dyn Node) -> bool {
        match check_adoption(self, node) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(
                    message = "collection_root.adoption_refused",
                    root = %self.core.id(),
                    child = %node.id(),
                    key = ?key,
                    reason = %reason
                );
                false
            }
        }
    }

    /// De-duplicate by key and drop nodes that cannot be adopted.
    fn admissible(&self, nodes: impl IntoIterator<Item = Rc<N>>) -> Vec<(K, Rc<N>)> {
        let mut seen = AHashSet::new();
        let mut out = Vec::new();
        for node in nodes {
            let key = self.config.key_of(&node);
            if !seen.insert(key.clone()) {
                continue;
            }
            if self.adoption_allowed(&key, &*node) {
                out.push((key, node));
            }
        }
        out
    }

    fn plan_removal(&self, data: &TreeData<K, N>, key: K) -> Option<TreeAction<K, N>> {
        if !data.live.contains(&key) {
            return None;
        }
        let node = data.node_of(&key)?;
        self.config
            .allows_removal(&key, &node)
            .then_some(TreeAction::Remove(key))
    }

    fn plan_restoration(&self, data: &TreeData<K, N>, key: K) -> Option<TreeAction<K, N>> {
        if data.live.contains(&key) {
            return None;
        }
        let node = data.node_of(&key)?;
        if node.state().is_disposed() || !self.config.allows_restoration(&key, &node) {
            return None;
        }
        Some(TreeAction::Restore(key))
    }

    // ── Application ─────────────────────────────────────────────────────

    fn adopt(&self, data: &mut TreeData<K, N>, key: K, node: Rc<N>) {
        let parent: Weak<dyn Node> = self.me.clone();
        node.core().attach_parent(self.core.id(), parent);
        let links = ChildLinks::live(&self.host(), &key, &*node);
        data.aggregate.update(&key, node.state());
        data.live.insert(key.clone());
        if !data.owned.contains_key(&key) {
            data.order.push(key.clone());
        }
        data.owned.insert(key, Owned { node, links });
    }

    fn set_live(&self, data: &mut TreeData<K, N>, key: &K) {
        let host = self.host();
        let Some(owned) = data.owned.get_mut(key) else {
            return;
        };
        owned.links.start_bubbling(&host, key, &*owned.node);
        let state = owned.node.state();
        data.aggregate.update(key, state);
        data.live.insert(key.clone());
    }

    fn set_removed(data: &mut TreeData<K, N>, key: &K) {
        if let Some(owned) = data.owned.get_mut(key) {
            owned.links.stop_bubbling();
        }
        data.live.remove(key);
        data.aggregate.remove(key);
        data.links.forget(key);
    }

    fn commit(
        &self,
        source: ChangeSource,
        operation: &'static str,
        plan: Vec<TreeAction<K, N>>,
    ) -> ChangeResult {
        if plan.is_empty() {
            tracing::trace!(message = "collection_root.noop", root = %self.core.id(), operation);
            return ChangeResult::NotChanged;
        }
        tracing::debug!(
            message = "collection_root.apply",
            root = %self.core.id(),
            operation,
            actions = plan.len()
        );
        let previous_state = self.core.state();
        let (change, validate, displaced) = {
            let mut data = self.data.borrow_mut();
            let mut change = TreeChangeEvent::new(source, previous_state);
            let mut touched = Vec::with_capacity(plan.len());
            let mut displaced = Vec::new();

            for action in plan {
                match action {
                    TreeAction::Add(key, node) => {
                        let previous = data.element_state(&key);
                        self.adopt(&mut data, key.clone(), Rc::clone(&node));
                        change.added.push(NodeDelta {
                            current: data.element_state(&key),
                            key: key.clone(),
                            node: node as Rc<dyn Node>,
                            previous,
                        });
                        touched.push(key);
                    }
                    TreeAction::Swap(key, node) => {
                        let previous = data.element_state(&key);
                        if let Some(old) = data.disown(&key) {
                            change.removed.push(NodeDelta {
                                key: key.clone(),
                                node: Rc::clone(&old) as Rc<dyn Node>,
                                previous,
                                current: ElementState::NOT_FOUND,
                            });
                            displaced.push(old);
                        }
                        self.adopt(&mut data, key.clone(), Rc::clone(&node));
                        change.added.push(NodeDelta {
                            current: data.element_state(&key),
                            key: key.clone(),
                            node: node as Rc<dyn Node>,
                            previous: ElementState::NOT_FOUND,
                        });
                        touched.push(key);
                    }
                    TreeAction::Remove(key) => {
                        let previous = data.element_state(&key);
                        Self::set_removed(&mut data, &key);
                        if let Some(node) = data.node_of(&key) {
                            change.removed.push(NodeDelta {
                                current: data.element_state(&key),
                                key: key.clone(),
                                node: node as Rc<dyn Node>,
                                previous,
                            });
                        }
                        touched.push(key);
                    }
                    TreeAction::Restore(key) => {
                        let previous = data.element_state(&key);
                        self.set_live(&mut data, &key);
                        if let Some(node) = data.node_of(&key) {
                            change.restored.push(NodeDelta {
                                current: data.element_state(&key),
                                key: key.clone(),
                                node: node as Rc<dyn Node>,
                                previous,
                            });
                        }
                        touched.push(key);
                    }
                }
            }

            self.recompute(&data, previous_state, true);
            let (change, validate) = Self::events(previous_state, change, touched);
            (change, validate, displaced)
        };
        for node in displaced {
            node.dispose();
        }
        self.publish(Some(change), validate);
        ChangeResult::Changed
    }

    fn events(
        previous_state: VariableState,
        change: TreeChangeEvent<K>,
        touched: Vec<K>,
    ) -> (Rc<TreeChangeEvent<K>>, Rc<TreeValidateEvent<K>>) {
        let change = Rc::new(change);
        let validate = Rc::new(TreeValidateEvent {
            previous_state,
            child_key: None,
            child_event: None,
            elements: touched,
            change: Some(Rc::clone(&change)),
        });
        (change, validate)
    }

    fn recompute(&self, data: &TreeData<K, N>, previous: VariableState, dirty: bool) {
        let folded = data.aggregate.fold(data.live.len());
        let mut next = previous.with_derived(
            folded.is_changed() || data.structurally_changed(),
            folded.is_invalid(),
            folded.is_warning(),
        );
        if !dirty && !previous.is_dirty() {
            next.remove(VariableState::DIRTY);
        }
        next.set(
            VariableState::READ_ONLY,
            data.read_only || folded.contains(VariableState::READ_ONLY),
        );
        self.core.set_state(next);
    }

    fn publish(&self, change: Option<Rc<TreeChangeEvent<K>>>, validate: Rc<TreeValidateEvent<K>>) {
        if let Some(change) = change {
            self.on_change.publish(&change);
        }
        self.on_validate.publish(&validate);
    }
}

impl<K, N> ChildHost<K> for CollectionVariableRoot<K, N>
where
    K: Clone + Eq + Hash + std::fmt::Debug + 'static,
    N: Node,
{
    fn child_changed(&self, key: &K, event: &ChangeEventRef) {
        let previous_state = self.core.state();
        if previous_state.is_disposed() {
            return;
        }
        let tree = {
            let mut data = self.data.borrow_mut();
            if !data.live.contains(key) {
                return;
            }
            let Some(node) = data.node_of(key) else {
                return;
            };
            data.aggregate.update(key, node.state());
            self.recompute(&data, previous_state, true);
            let tree = Rc::new(TreeChangeEvent::bubbled(
                previous_state,
                key.clone(),
                Rc::clone(event),
            ));
            data.links.record(key.clone(), Rc::clone(event), Rc::clone(&tree));
            tree
        };
        self.on_change.publish(&tree);
    }

    fn child_validated(&self, key: &K, event: &ValidateEventRef) {
        let previous_state = self.core.state();
        if previous_state.is_disposed() {
            return;
        }
        let validate = {
            let mut data = self.data.borrow_mut();
            if !data.live.contains(key) {
                return;
            }
            let Some(node) = data.node_of(key) else {
                return;
            };
            data.aggregate.update(key, node.state());
            self.recompute(&data, previous_state, true);
            Rc::new(TreeValidateEvent {
                previous_state,
                child_key: Some(key.clone()),
                child_event: Some(Rc::clone(event)),
                elements: vec![key.clone()],
                change: data.links.take(key, event),
            })
        };
        self.on_validate.publish(&validate);
    }

    fn child_disposed(&self, key: &K, source: NodeId) {
        let previous_state = self.core.state();
        if previous_state.is_disposed() {
            return;
        }
        let (change, validate) = {
            let mut data = self.data.borrow_mut();
            if data.owned.get(key).is_none_or(|owned| owned.node.id() != source) {
                return;
            }
            let previous = data.element_state(key);
            let was_live = data.live.contains(key);
            let Some(node) = data.disown(key) else {
                return;
            };
            self.recompute(&data, previous_state, true);

            let mut change = TreeChangeEvent::new(ChangeSource::ChildNode, previous_state);
            change.detached.push(key.clone());
            if was_live {
                change.removed.push(NodeDelta {
                    current: data.element_state(key),
                    key: key.clone(),
                    node: node as Rc<dyn Node>,
                    previous,
                });
            }
            Self::events(previous_state, change, vec![key.clone()])
        };
        tracing::debug!(
            message = "collection_root.child_purged",
            root = %self.core.id(),
            child = %source,
            key = ?key
        );
        self.publish(Some(change), validate);
    }
}

impl<K, N> Node for CollectionVariableRoot<K, N>
where
    K: Clone + Eq + Hash + std::fmt::Debug + 'static,
    N: Node,
{
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn children(&self) -> Vec<Rc<dyn Node>> {
        let data = self.data.borrow();
        data.order
            .iter()
            .filter(|key| data.live.contains(*key))
            .filter_map(|key| data.node_of(key))
            .map(|node| node as Rc<dyn Node>)
            .collect()
    }

    fn listen_change(&self, listener: Rc<dyn Listener<ChangeEventRef>>) -> Subscription {
        self.on_change.listen(Rc::new(ChangeUpcast(listener)))
    }

    fn listen_validate(&self, listener: Rc<dyn Listener<ValidateEventRef>>) -> Subscription {
        self.on_validate.listen(Rc::new(ValidateUpcast(listener)))
    }

    /// Set the root's own flag and propagate it to the live children.
    fn set_read_only(&self, read_only: bool) {
        let previous_state = self.core.state();
        if previous_state.is_disposed() {
            return;
        }
        self.data.borrow_mut().read_only = read_only;
        for child in self.children() {
            child.set_read_only(read_only);
        }
        {
            let data = self.data.borrow();
            self.recompute(&data, self.core.state(), false);
        }
        if previous_state.contains(VariableState::READ_ONLY)
            != self.core.state().contains(VariableState::READ_ONLY)
        {
            self.core.set_state(self.core.state() | VariableState::DIRTY);
            let change = Rc::new(TreeChangeEvent::new(ChangeSource::SetReadOnly, previous_state));
            self.on_change.publish(&change);
        }
    }

    fn dispose(&self) {
        if !self.core.mark_disposed() {
            return;
        }
        let nodes: Vec<Rc<N>> = {
            let mut data = self.data.borrow_mut();
            data.aggregate.clear();
            data.links.clear();
            data.live.clear();
            let order = std::mem::take(&mut data.order);
            let mut owned = std::mem::take(&mut data.owned);
            order
                .iter()
                .filter_map(|key| owned.remove(key))
                .map(|owned| owned.node)
                .collect()
        };
        tracing::debug!(
            message = "collection_root.dispose",
            root = %self.core.id(),
            children = nodes.len()
        );
        for node in nodes {
            node.dispose();
        }
        self.on_change.dispose();
        self.on_validate.dispose();
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl<K: std::fmt::Debug, N> std::fmt::Debug for CollectionVariableRoot<K, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.borrow();
        f.debug_struct("CollectionVariableRoot")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .field("order", &data.order)
            .field("live", &data.live.len())
            .finish()
    }
}
