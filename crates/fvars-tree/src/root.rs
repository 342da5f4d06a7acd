#![forbid(unsafe_code)]

//! Root holding named, heterogeneous child containers.
//!
//! Children are built elsewhere and handed over once with
//! [`VariableRoot::register_node`]. From then on the root:
//!
//! - owns the child (write-once parent slot) and disposes it with itself,
//! - folds the child's status bits into its own (see
//!   [`StatusAggregate`](crate::StatusAggregate)),
//! - re-publishes every child event as a `ChildNode` tree event,
//! - purges the child if it disposes itself.
//!
//! # Invariants
//!
//! 1. Registration is legal only on a live, top-level root.
//! 2. Root `CHANGED`/`INVALID`/`WARNING` are any-of over the children;
//!    `READ_ONLY` is the root's own flag or all-of over the children.
//! 3. A bubbled child change is fully folded before the tree event is
//!    published.

use std::any::Any;
use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::{AHashMap, AHashSet};
use fvars_core::{
    ChangeEventRef, ChangeSource, ChangeUpcast, ElementState, EventStream, Listener, Node,
    NodeCore, NodeId, RegistrationError, RegistrationFailure, Subscription, ValidateEventRef,
    ValidateUpcast, VariableState, check_adoption,
};

use crate::aggregate::StatusAggregate;
use crate::events::{ChangeLinks, NodeDelta, TreeChangeEvent, TreeValidateEvent};
use crate::relay::{ChildHost, ChildLinks};

struct Child {
    node: Rc<dyn Node>,
    _links: ChildLinks,
}

struct RootData<K> {
    children: AHashMap<K, Child>,
    order: Vec<K>,
    aggregate: StatusAggregate<K>,
    read_only: bool,
    links: ChangeLinks<K>,
}

/// Root of named child containers.
pub struct VariableRoot<K> {
    core: NodeCore,
    data: RefCell<RootData<K>>,
    on_change: EventStream<Rc<TreeChangeEvent<K>>>,
    on_validate: EventStream<Rc<TreeValidateEvent<K>>>,
}

impl<K> VariableRoot<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug + 'static,
{
    #[must_use]
    pub fn new() -> Rc<Self> {
        let core = NodeCore::default();
        let id = core.id();
        Rc::new(Self {
            core,
            data: RefCell::new(RootData {
                children: AHashMap::new(),
                order: Vec::new(),
                aggregate: StatusAggregate::new(),
                read_only: false,
                links: ChangeLinks::new(),
            }),
            on_change: EventStream::new(id),
            on_validate: EventStream::new(id),
        })
    }

    pub fn on_change(&self) -> &EventStream<Rc<TreeChangeEvent<K>>> {
        &self.on_change
    }

    pub fn on_validate(&self) -> &EventStream<Rc<TreeValidateEvent<K>>> {
        &self.on_validate
    }

    /// Adopt `node` under `key` and fold its status in. No event is
    /// published.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if this root is disposed or has a
    /// parent, if the child is disposed, already parented, or is this root,
    /// or if `key` is taken.
    pub fn register_node<N: Node>(
        self: &Rc<Self>,
        key: K,
        node: Rc<N>,
    ) -> Result<Rc<N>, RegistrationError> {
        if let Err(reason) = self.check_registration(&key, &*node) {
            tracing::warn!(
                message = "root.register.refused",
                root = %self.core.id(),
                child = %node.id(),
                key = ?key,
                reason = %reason
            );
            let parent: Rc<dyn Node> = Rc::clone(self) as Rc<dyn Node>;
            return Err(RegistrationError::new(reason, parent, node));
        }

        let parent: Weak<dyn Node> = Rc::downgrade(self) as Weak<dyn Node>;
        node.core().attach_parent(self.core.id(), parent);
        let host: Weak<dyn ChildHost<K>> = Rc::downgrade(self) as Weak<dyn ChildHost<K>>;
        let links = ChildLinks::live(&host, &key, &*node);

        {
            let mut data = self.data.borrow_mut();
            data.aggregate.update(&key, node.state());
            data.order.push(key.clone());
            data.children.insert(
                key.clone(),
                Child {
                    node: Rc::clone(&node) as Rc<dyn Node>,
                    _links: links,
                },
            );
            self.recompute(&data, self.core.state(), false);
        }
        tracing::debug!(
            message = "root.register",
            root = %self.core.id(),
            child = %node.id(),
            key = ?key
        );
        Ok(node)
    }

    fn check_registration(&self, key: &K, child: &dyn Node) -> Result<(), RegistrationFailure> {
        if self.core.state().is_disposed() {
            return Err(RegistrationFailure::ParentDisposed);
        }
        if self.core.has_parent() {
            return Err(RegistrationFailure::ParentHasParent);
        }
        check_adoption(self, child)?;
        if child.core().has_parent() {
            return Err(RegistrationFailure::ChildHasParent);
        }
        if self.data.borrow().children.contains_key(key) {
            return Err(RegistrationFailure::DuplicateKey);
        }
        Ok(())
    }

    /// Typed child under `key`.
    #[must_use]
    pub fn get<N: Node>(&self, key: &K) -> Option<Rc<N>> {
        self.get_node(key)?.into_any().downcast::<N>().ok()
    }

    #[must_use]
    pub fn get_node(&self, key: &K) -> Option<Rc<dyn Node>> {
        self.data
            .borrow()
            .children
            .get(key)
            .map(|child| Rc::clone(&child.node))
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.data.borrow().children.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.borrow().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in registration order.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.data.borrow().order.clone()
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
    pub fn read_only_keys(&self) -> AHashSet<K> {
        self.data.borrow().aggregate.read_only_keys().clone()
    }

    fn recompute(&self, data: &RootData<K>, previous: VariableState, dirty: bool) {
        let folded = data.aggregate.fold(data.order.len());
        let mut next = previous.with_derived(
            folded.is_changed(),
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

impl<K> ChildHost<K> for VariableRoot<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug + 'static,
{
    fn child_changed(&self, key: &K, event: &ChangeEventRef) {
        let previous_state = self.core.state();
        if previous_state.is_disposed() {
            return;
        }
        let tree = {
            let mut data = self.data.borrow_mut();
            let Some(state) = data.children.get(key).map(|child| child.node.state()) else {
                return;
            };
            data.aggregate.update(key, state);
            self.recompute(&data, previous_state, true);
            let tree = Rc::new(TreeChangeEvent::bubbled(
                previous_state,
                key.clone(),
                Rc::clone(event),
            ));
            data.links.record(key.clone(), Rc::clone(event), Rc::clone(&tree));
            tree
        };
        tracing::trace!(
            message = "root.child_changed",
            root = %self.core.id(),
            key = ?key,
            source = ?event.source()
        );
        self.on_change.publish(&tree);
    }

    fn child_validated(&self, key: &K, event: &ValidateEventRef) {
        let previous_state = self.core.state();
        if previous_state.is_disposed() {
            return;
        }
        let validate = {
            let mut data = self.data.borrow_mut();
            let Some(state) = data.children.get(key).map(|child| child.node.state()) else {
                return;
            };
            data.aggregate.update(key, state);
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
            if data.children.get(key).is_none_or(|child| child.node.id() != source) {
                return;
            }
            let Some(child) = data.children.remove(key) else {
                return;
            };
            data.order.retain(|k| k != key);
            data.aggregate.remove(key);
            data.links.forget(key);
            self.recompute(&data, previous_state, true);

            let mut change = TreeChangeEvent::new(ChangeSource::ChildNode, previous_state);
            change.detached.push(key.clone());
            change.removed.push(NodeDelta {
                key: key.clone(),
                node: child.node,
                previous: ElementState::empty(),
                current: ElementState::NOT_FOUND,
            });
            let change = Rc::new(change);
            let validate = Rc::new(TreeValidateEvent {
                previous_state,
                child_key: Some(key.clone()),
                child_event: None,
                elements: vec![key.clone()],
                change: Some(Rc::clone(&change)),
            });
            (change, validate)
        };
        tracing::debug!(
            message = "root.child_purged",
            root = %self.core.id(),
            child = %source,
            key = ?key
        );
        self.publish(Some(change), validate);
    }
}

impl<K> Node for VariableRoot<K>
where
    K: Clone + Eq + Hash + std::fmt::Debug + 'static,
{
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn children(&self) -> Vec<Rc<dyn Node>> {
        let data = self.data.borrow();
        data.order
            .iter()
            .filter_map(|key| data.children.get(key))
            .map(|child| Rc::clone(&child.node))
            .collect()
    }

    fn listen_change(&self, listener: Rc<dyn Listener<ChangeEventRef>>) -> Subscription {
        self.on_change.listen(Rc::new(ChangeUpcast(listener)))
    }

    fn listen_validate(&self, listener: Rc<dyn Listener<ValidateEventRef>>) -> Subscription {
        self.on_validate.listen(Rc::new(ValidateUpcast(listener)))
    }

    /// Set the root's own flag and propagate it to every child.
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
        let flipped = previous_state.contains(VariableState::READ_ONLY)
            != self.core.state().contains(VariableState::READ_ONLY);
        if flipped {
            self.core.set_state(self.core.state() | VariableState::DIRTY);
            let change = Rc::new(TreeChangeEvent::new(ChangeSource::SetReadOnly, previous_state));
            self.on_change.publish(&change);
        }
    }

    fn dispose(&self) {
        if !self.core.mark_disposed() {
            return;
        }
        let children: Vec<Child> = {
            let mut data = self.data.borrow_mut();
            data.aggregate.clear();
            data.links.clear();
            let order = std::mem::take(&mut data.order);
            let mut children = std::mem::take(&mut data.children);
            order.iter().filter_map(|key| children.remove(key)).collect()
        };
        tracing::debug!(
            message = "root.dispose",
            root = %self.core.id(),
            children = children.len()
        );
        let nodes: Vec<Rc<dyn Node>> = children
            .into_iter()
            .map(|child| child.node)
            .collect();
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

impl<K: std::fmt::Debug> std::fmt::Debug for VariableRoot<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableRoot")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .field("keys", &self.data.borrow().order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fvars_variables::Variable;

    fn two_children() -> (Rc<VariableRoot<&'static str>>, Rc<Variable<i32>>, Rc<Variable<i32>>) {
        let root = VariableRoot::new();
        let a = root.register_node("a", Variable::new(1)).unwrap();
        let b = root.register_node("b", Variable::new(2)).unwrap();
        (root, a, b)
    }

    #[test]
    fn registration_folds_without_dirty() {
        let root = VariableRoot::new();
        let var: Rc<Variable<i32>> = Variable::new(1);
        var.change(5);
        root.register_node("x", Rc::clone(&var)).unwrap();
        assert!(root.state().is_changed());
        assert!(!root.state().is_dirty());
        assert_eq!(var.parent().map(|p| p.id()), Some(root.id()));
    }

    #[test]
    fn changed_is_any_of_and_read_only_all_of() {
        let (root, a, b) = two_children();
        assert!(!root.state().contains(VariableState::READ_ONLY));

        a.set_read_only(true);
        assert!(!root.state().contains(VariableState::READ_ONLY));
        b.set_read_only(true);
        assert!(root.state().contains(VariableState::READ_ONLY));

        b.set_read_only(false);
        b.change(9);
        assert!(root.state().is_changed());
        assert!(root.changed_keys().contains(&"b"));
        b.change(2);
        assert!(!root.state().is_changed());
    }

    #[test]
    fn registration_errors() {
        let root: Rc<VariableRoot<&'static str>> = VariableRoot::new();
        let var: Rc<Variable<i32>> = Variable::new(1);
        root.register_node("x", Rc::clone(&var)).unwrap();

        let err = root.register_node("x", Variable::<i32>::new(2)).unwrap_err();
        assert_eq!(err.reason, RegistrationFailure::DuplicateKey);

        let other: Rc<VariableRoot<&'static str>> = VariableRoot::new();
        let err = other.register_node("y", Rc::clone(&var)).unwrap_err();
        assert_eq!(err.reason, RegistrationFailure::ChildHasParent);
        assert_eq!(err.child.id(), var.id());
        assert_eq!(err.parent.id(), other.id());

        let err = root.register_node("self", Rc::clone(&root)).unwrap_err();
        assert_eq!(err.reason, RegistrationFailure::SelfRegistration);

        let dead: Rc<Variable<i32>> = Variable::new(0);
        dead.dispose();
        let err = other.register_node("dead", dead).unwrap_err();
        assert_eq!(err.reason, RegistrationFailure::ChildDisposed);
    }

    #[test]
    fn nested_root_cannot_accept_registrations() {
        let top: Rc<VariableRoot<&'static str>> = VariableRoot::new();
        let inner: Rc<VariableRoot<&'static str>> = VariableRoot::new();
        let inner = top.register_node("inner", inner).unwrap();
        let err = inner.register_node("v", Variable::<i32>::new(0)).unwrap_err();
        assert_eq!(err.reason, RegistrationFailure::ParentHasParent);

        top.dispose();
        let err = top.register_node("late", Variable::<i32>::new(0)).unwrap_err();
        assert_eq!(err.reason, RegistrationFailure::ParentDisposed);
    }

    #[test]
    fn child_events_bubble_in_order() {
        let (root, a, _b) = two_children();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = Rc::clone(&log);
        let _s1 = root.on_change().subscribe(move |e| {
            l1.borrow_mut()
                .push(format!("change:{:?}:{:?}", e.source, e.child_key))
        });
        let l2 = Rc::clone(&log);
        let _s2 = root.on_validate().subscribe(move |e| {
            l2.borrow_mut()
                .push(format!("validate:{:?}:{}", e.child_key, e.change.is_some()))
        });

        a.change(10);
        assert_eq!(
            *log.borrow(),
            vec![
                "change:ChildNode:Some(\"a\")".to_string(),
                "validate:Some(\"a\"):true".to_string()
            ]
        );
        assert!(root.state().is_dirty());
    }

    #[test]
    fn typed_get_downcasts() {
        let (root, a, _b) = two_children();
        let fetched: Rc<Variable<i32>> = root.get(&"a").unwrap();
        assert!(Rc::ptr_eq(&fetched, &a));
        assert!(root.get::<Variable<String>>(&"a").is_none());
        assert_eq!(root.keys(), vec!["a", "b"]);
        assert_eq!(root.children().len(), 2);
    }

    #[test]
    fn self_disposed_child_is_purged() {
        let (root, a, b) = two_children();
        let detached = Rc::new(RefCell::new(Vec::new()));
        let d = Rc::clone(&detached);
        let _sub = root
            .on_change()
            .subscribe(move |e| d.borrow_mut().extend(e.detached.iter().copied()));

        b.change(7);
        assert!(root.state().is_changed());
        b.dispose();
        assert_eq!(*detached.borrow(), vec!["b"]);
        assert!(!root.contains_key(&"b"));
        assert!(!root.state().is_changed());
        assert_eq!(root.len(), 1);
        assert!(!a.state().is_disposed());
    }

    #[test]
    fn set_read_only_propagates() {
        let (root, a, b) = two_children();
        root.set_read_only(true);
        assert!(a.state().is_read_only());
        assert!(b.state().is_read_only());
        assert!(root.state().contains(VariableState::READ_ONLY));

        root.set_read_only(false);
        assert!(!root.state().contains(VariableState::READ_ONLY));
        assert_eq!(a.change(3), fvars_core::ChangeResult::Changed);
    }

    #[test]
    fn dispose_cascades_once() {
        let (root, a, b) = two_children();
        root.dispose();
        root.dispose();
        assert!(a.state().is_disposed());
        assert!(b.state().is_disposed());
        assert!(root.is_empty());
        assert!(root.on_change().is_disposed());
    }
}
