#![forbid(unsafe_code)]

//! The node contract shared by every container.
//!
//! A node exposes a status bitset, a write-once parent, type-erased change
//! and validation streams, and its structural children. Concrete containers
//! keep their own typed streams and expose them through [`Node`] with the
//! [`ChangeUpcast`]/[`ValidateUpcast`] adapters, so a parent can listen to
//! heterogeneous children through one interface.
//!
//! # Ownership
//!
//! Containers are built inside `Rc` and hand out `Rc<Self>`. A parent holds
//! strong references to its children; a child holds a `Weak` back-reference
//! to its parent, set exactly once by whoever adopts it.

use std::any::Any;
use std::cell::{Cell, OnceCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RegistrationFailure;
use crate::state::{ChangeSource, VariableState};
use crate::stream::{Listener, Subscription};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// A change notification, viewed without its concrete payload type.
pub trait ChangeEvent: Any {
    fn source(&self) -> ChangeSource;

    /// Status of the publishing node before the change.
    fn previous_state(&self) -> VariableState;

    /// Downcast to the concrete event type.
    fn as_any(&self) -> &dyn Any;
}

/// A validation notification, viewed without its concrete payload type.
pub trait ValidateEvent: Any {
    /// Status of the publishing node before validation was recomputed.
    fn previous_state(&self) -> VariableState;

    /// The change event this validation pass belongs to, or `None` for a
    /// validation-only pass.
    fn change_event(&self) -> Option<ChangeEventRef>;

    fn as_any(&self) -> &dyn Any;
}

pub type ChangeEventRef = Rc<dyn ChangeEvent>;
pub type ValidateEventRef = Rc<dyn ValidateEvent>;

/// Base abstraction for anything with status, a parent, and event streams.
pub trait Node: Any {
    fn core(&self) -> &NodeCore;

    fn id(&self) -> NodeId {
        self.core().id()
    }

    fn state(&self) -> VariableState {
        self.core().state()
    }

    fn parent(&self) -> Option<Rc<dyn Node>> {
        self.core().parent()
    }

    /// Structural children, for generic tree walkers.
    fn children(&self) -> Vec<Rc<dyn Node>> {
        Vec::new()
    }

    fn listen_change(&self, listener: Rc<dyn Listener<ChangeEventRef>>) -> Subscription;

    fn listen_validate(&self, listener: Rc<dyn Listener<ValidateEventRef>>) -> Subscription;

    fn set_read_only(&self, read_only: bool);

    /// Freeze the node permanently and release what it owns.
    fn dispose(&self);

    /// Upcast for typed downcasts (`Rc::downcast`).
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

/// Identity, status, and parent slot embedded in every container.
#[derive(Debug)]
pub struct NodeCore {
    id: NodeId,
    state: Cell<VariableState>,
    parent: OnceCell<(NodeId, Weak<dyn Node>)>,
}

impl Default for NodeCore {
    fn default() -> Self {
        Self::new(VariableState::default())
    }
}

impl NodeCore {
    #[must_use]
    pub fn new(state: VariableState) -> Self {
        Self {
            id: NodeId::next(),
            state: Cell::new(state),
            parent: OnceCell::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> VariableState {
        self.state.get()
    }

    /// Overwrite the status. `DISPOSED` stays set once reached.
    pub fn set_state(&self, state: VariableState) {
        let current = self.state.get();
        let next = if current.is_disposed() {
            state.disposed()
        } else {
            state
        };
        self.state.set(next);
    }

    /// Mark the node disposed. Returns `false` if it already was.
    pub fn mark_disposed(&self) -> bool {
        let current = self.state.get();
        if current.is_disposed() {
            return false;
        }
        self.state.set(current.disposed());
        true
    }

    #[must_use]
    pub fn parent(&self) -> Option<Rc<dyn Node>> {
        self.parent.get().and_then(|(_, weak)| weak.upgrade())
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<NodeId> {
        self.parent.get().map(|(id, _)| *id)
    }

    #[must_use]
    pub fn has_parent(&self) -> bool {
        self.parent.get().is_some()
    }

    /// Record the adopting container. Write-once: returns `false` if a
    /// parent was already recorded.
    pub fn attach_parent(&self, parent_id: NodeId, parent: Weak<dyn Node>) -> bool {
        self.parent.set((parent_id, parent)).is_ok()
    }
}

/// Check whether `parent` may adopt `child`.
///
/// A child already parented by `parent` itself is accepted.
pub fn check_adoption(parent: &dyn Node, child: &dyn Node) -> Result<(), RegistrationFailure> {
    if parent.state().is_disposed() {
        return Err(RegistrationFailure::ParentDisposed);
    }
    if parent.id() == child.id() {
        return Err(RegistrationFailure::SelfRegistration);
    }
    if child.state().is_disposed() {
        return Err(RegistrationFailure::ChildDisposed);
    }
    match child.core().parent_id() {
        Some(id) if id != parent.id() => Err(RegistrationFailure::ChildHasParent),
        _ => Ok(()),
    }
}

/// Adapts a typed change listener target to the erased [`ChangeEventRef`].
pub struct ChangeUpcast(pub Rc<dyn Listener<ChangeEventRef>>);

impl<E: ChangeEvent> Listener<Rc<E>> for ChangeUpcast {
    fn react(&self, event: &Rc<E>) {
        let erased: ChangeEventRef = event.clone();
        self.0.react(&erased);
    }

    fn on_dispose(&self, source: NodeId) {
        self.0.on_dispose(source);
    }
}

/// Adapts a typed validation listener target to the erased [`ValidateEventRef`].
pub struct ValidateUpcast(pub Rc<dyn Listener<ValidateEventRef>>);

impl<E: ValidateEvent> Listener<Rc<E>> for ValidateUpcast {
    fn react(&self, event: &Rc<E>) {
        let erased: ValidateEventRef = event.clone();
        self.0.react(&erased);
    }

    fn on_dispose(&self, source: NodeId) {
        self.0.on_dispose(source);
    }
}

/// `true` if both handles point at the same event allocation.
#[must_use]
pub fn same_event(a: &ChangeEventRef, b: &ChangeEventRef) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::EventStream;

    struct Leaf {
        core: NodeCore,
        on_change: EventStream<ChangeEventRef>,
        on_validate: EventStream<ValidateEventRef>,
    }

    impl Leaf {
        fn new() -> Rc<Self> {
            let core = NodeCore::default();
            let id = core.id();
            Rc::new(Self {
                core,
                on_change: EventStream::new(id),
                on_validate: EventStream::new(id),
            })
        }
    }

    impl Node for Leaf {
        fn core(&self) -> &NodeCore {
            &self.core
        }

        fn listen_change(&self, listener: Rc<dyn Listener<ChangeEventRef>>) -> Subscription {
            self.on_change.listen(listener)
        }

        fn listen_validate(&self, listener: Rc<dyn Listener<ValidateEventRef>>) -> Subscription {
            self.on_validate.listen(listener)
        }

        fn set_read_only(&self, read_only: bool) {
            let mut state = self.core.state();
            state.set(VariableState::READ_ONLY, read_only);
            self.core.set_state(state);
        }

        fn dispose(&self) {
            if self.core.mark_disposed() {
                self.on_change.dispose();
                self.on_validate.dispose();
            }
        }

        fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
            self
        }
    }

    #[test]
    fn ids_are_unique() {
        let a = NodeId::next();
        let b = NodeId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn parent_is_write_once() {
        let parent = Leaf::new();
        let other = Leaf::new();
        let child = Leaf::new();

        let weak: Weak<dyn Node> = Rc::downgrade(&parent) as Weak<dyn Node>;
        assert!(child.core().attach_parent(parent.id(), weak));

        let weak_other: Weak<dyn Node> = Rc::downgrade(&other) as Weak<dyn Node>;
        assert!(!child.core().attach_parent(other.id(), weak_other));
        assert_eq!(child.core().parent_id(), Some(parent.id()));
        assert_eq!(child.parent().map(|p| p.id()), Some(parent.id()));
    }

    #[test]
    fn disposed_state_is_sticky() {
        let leaf = Leaf::new();
        leaf.dispose();
        leaf.core().set_state(VariableState::CHANGED);
        assert!(leaf.state().is_disposed());
        assert!(leaf.state().contains(VariableState::READ_ONLY));
        assert!(!leaf.core().mark_disposed());
    }

    #[test]
    fn adoption_rules() {
        let parent = Leaf::new();
        let child = Leaf::new();
        assert_eq!(check_adoption(&*parent, &*child), Ok(()));
        assert_eq!(
            check_adoption(&*parent, &*parent),
            Err(RegistrationFailure::SelfRegistration)
        );

        let weak: Weak<dyn Node> = Rc::downgrade(&parent) as Weak<dyn Node>;
        child.core().attach_parent(parent.id(), weak);
        assert_eq!(check_adoption(&*parent, &*child), Ok(()));

        let stranger = Leaf::new();
        assert_eq!(
            check_adoption(&*stranger, &*child),
            Err(RegistrationFailure::ChildHasParent)
        );

        let disposed = Leaf::new();
        disposed.dispose();
        assert_eq!(
            check_adoption(&*parent, &*disposed),
            Err(RegistrationFailure::ChildDisposed)
        );
        assert_eq!(
            check_adoption(&*disposed, &*stranger),
            Err(RegistrationFailure::ParentDisposed)
        );
    }

    #[test]
    fn into_any_downcasts() {
        let leaf: Rc<dyn Node> = Leaf::new();
        let id = leaf.id();
        let typed = leaf.into_any().downcast::<Leaf>().ok();
        assert_eq!(typed.map(|l| l.id()), Some(id));
    }
}
