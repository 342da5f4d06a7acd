#![forbid(unsafe_code)]

//! Change and validation payloads of tree containers.

use std::any::Any;
use std::hash::Hash;
use std::rc::Rc;

use ahash::AHashMap;
use fvars_core::{
    ChangeEvent, ChangeEventRef, ChangeSource, ElementState, Node, ValidateEvent,
    ValidateEventRef, VariableState, same_event,
};

/// One child entering, leaving, or returning to a tree.
#[derive(Clone)]
pub struct NodeDelta<K> {
    pub key: K,
    pub node: Rc<dyn Node>,
    pub previous: ElementState,
    pub current: ElementState,
}

impl<K: std::fmt::Debug> std::fmt::Debug for NodeDelta<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDelta")
            .field("key", &self.key)
            .field("node", &self.node.id())
            .field("previous", &self.previous)
            .field("current", &self.current)
            .finish()
    }
}

/// Change notification of a tree container.
///
/// Membership operations fill `added`/`removed`/`restored`. A bubbled child
/// change carries `source == ChildNode` plus the originating key and event.
/// Children purged because they disposed themselves are listed in
/// `detached`.
#[derive(Clone)]
pub struct TreeChangeEvent<K> {
    pub source: ChangeSource,
    pub previous_state: VariableState,
    pub added: Vec<NodeDelta<K>>,
    pub removed: Vec<NodeDelta<K>>,
    pub restored: Vec<NodeDelta<K>>,
    pub detached: Vec<K>,
    pub child_key: Option<K>,
    pub child_event: Option<ChangeEventRef>,
}

impl<K> TreeChangeEvent<K> {
    pub(crate) fn new(source: ChangeSource, previous_state: VariableState) -> Self {
        Self {
            source,
            previous_state,
            added: Vec::new(),
            removed: Vec::new(),
            restored: Vec::new(),
            detached: Vec::new(),
            child_key: None,
            child_event: None,
        }
    }

    pub(crate) fn bubbled(previous_state: VariableState, key: K, event: ChangeEventRef) -> Self {
        Self {
            child_key: Some(key),
            child_event: Some(event),
            ..Self::new(ChangeSource::ChildNode, previous_state)
        }
    }

    /// `true` if no membership moved.
    #[must_use]
    pub fn is_structural_noop(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.restored.is_empty()
            && self.detached.is_empty()
    }
}

impl<K: std::fmt::Debug> std::fmt::Debug for TreeChangeEvent<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeChangeEvent")
            .field("source", &self.source)
            .field("previous_state", &self.previous_state)
            .field("added", &self.added)
            .field("removed", &self.removed)
            .field("restored", &self.restored)
            .field("detached", &self.detached)
            .field("child_key", &self.child_key)
            .field("child_source", &self.child_event.as_ref().map(|e| e.source()))
            .finish()
    }
}

impl<K: 'static> ChangeEvent for TreeChangeEvent<K> {
    fn source(&self) -> ChangeSource {
        self.source
    }

    fn previous_state(&self) -> VariableState {
        self.previous_state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Validation notification of a tree container.
#[derive(Clone)]
pub struct TreeValidateEvent<K> {
    pub previous_state: VariableState,
    pub child_key: Option<K>,
    pub child_event: Option<ValidateEventRef>,
    /// Keys whose validation bits were recomputed.
    pub elements: Vec<K>,
    pub change: Option<Rc<TreeChangeEvent<K>>>,
}

impl<K: std::fmt::Debug> std::fmt::Debug for TreeValidateEvent<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeValidateEvent")
            .field("previous_state", &self.previous_state)
            .field("child_key", &self.child_key)
            .field("elements", &self.elements)
            .field("linked", &self.change.is_some())
            .finish()
    }
}

impl<K: 'static> ValidateEvent for TreeValidateEvent<K> {
    fn previous_state(&self) -> VariableState {
        self.previous_state
    }

    fn change_event(&self) -> Option<ChangeEventRef> {
        self.change.clone().map(|event| event as ChangeEventRef)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Last bubbled change per child, so the child's following validation
/// event can reference the tree event published for it.
pub(crate) struct ChangeLinks<K> {
    pending: AHashMap<K, (ChangeEventRef, Rc<TreeChangeEvent<K>>)>,
}

impl<K: Eq + Hash> ChangeLinks<K> {
    pub(crate) fn new() -> Self {
        Self {
            pending: AHashMap::new(),
        }
    }

    pub(crate) fn record(&mut self, key: K, child: ChangeEventRef, tree: Rc<TreeChangeEvent<K>>) {
        self.pending.insert(key, (child, tree));
    }

    /// Tree event recorded for the change `event` refers to, if any.
    pub(crate) fn take(&mut self, key: &K, event: &ValidateEventRef) -> Option<Rc<TreeChangeEvent<K>>> {
        let child_change = event.change_event()?;
        let (recorded, tree) = self.pending.remove(key)?;
        same_event(&recorded, &child_change).then_some(tree)
    }

    pub(crate) fn forget(&mut self, key: &K) {
        self.pending.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}
