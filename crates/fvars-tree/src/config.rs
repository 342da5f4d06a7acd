#![forbid(unsafe_code)]

//! Policy of a [`CollectionVariableRoot`](crate::CollectionVariableRoot).

use std::rc::Rc;

/// Batch input of [`CollectionVariableRoot::change`](crate::CollectionVariableRoot::change).
pub struct TreeChanges<K, N> {
    /// Nodes to adopt, or to swap in for owned non-baseline keys.
    pub elements_to_add: Vec<Rc<N>>,
    /// Keys that must be live afterwards; live keys missing here are removed.
    pub keys_to_restore: Vec<K>,
}

impl<K, N> Default for TreeChanges<K, N> {
    fn default() -> Self {
        Self {
            elements_to_add: Vec::new(),
            keys_to_restore: Vec::new(),
        }
    }
}

impl<K, N> TreeChanges<K, N> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add(mut self, node: Rc<N>) -> Self {
        self.elements_to_add.push(node);
        self
    }

    #[must_use]
    pub fn restore(mut self, key: K) -> Self {
        self.keys_to_restore.push(key);
        self
    }
}

type KeySelector<K, N> = Rc<dyn Fn(&N) -> K>;
type AdditionVeto<N> = Rc<dyn Fn(&N) -> bool>;
type KeyedVeto<K, N> = Rc<dyn Fn(&K, &N) -> bool>;
type ChangesTransform<K, N> = Rc<dyn Fn(TreeChanges<K, N>) -> TreeChanges<K, N>>;

pub struct CollectionRootConfig<K, N> {
    key_of: KeySelector<K, N>,
    continue_addition: Option<AdditionVeto<N>>,
    continue_removal: Option<KeyedVeto<K, N>>,
    continue_restoration: Option<KeyedVeto<K, N>>,
    modify_change_input: Option<ChangesTransform<K, N>>,
    pub(crate) read_only: bool,
}

impl<K: 'static, N: 'static> CollectionRootConfig<K, N> {
    #[must_use]
    pub fn new(key_of: impl Fn(&N) -> K + 'static) -> Self {
        Self {
            key_of: Rc::new(key_of),
            continue_addition: None,
            continue_removal: None,
            continue_restoration: None,
            modify_change_input: None,
            read_only: false,
        }
    }

    /// Veto adoption of a node: return `false` to skip it.
    #[must_use]
    pub fn continue_addition(mut self, predicate: impl Fn(&N) -> bool + 'static) -> Self {
        self.continue_addition = Some(Rc::new(predicate));
        self
    }

    #[must_use]
    pub fn continue_removal(mut self, predicate: impl Fn(&K, &N) -> bool + 'static) -> Self {
        self.continue_removal = Some(Rc::new(predicate));
        self
    }

    #[must_use]
    pub fn continue_restoration(mut self, predicate: impl Fn(&K, &N) -> bool + 'static) -> Self {
        self.continue_restoration = Some(Rc::new(predicate));
        self
    }

    /// Transform the batch given to `change` before it is planned.
    #[must_use]
    pub fn modify_change_input(
        mut self,
        transform: impl Fn(TreeChanges<K, N>) -> TreeChanges<K, N> + 'static,
    ) -> Self {
        self.modify_change_input = Some(Rc::new(transform));
        self
    }

    /// Start read-only. Initial children are marked read-only on adoption.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub(crate) fn key_of(&self, node: &N) -> K {
        (self.key_of)(node)
    }

    pub(crate) fn allows_addition(&self, node: &N) -> bool {
        self.continue_addition.as_ref().is_none_or(|veto| veto(node))
    }

    pub(crate) fn allows_removal(&self, key: &K, node: &N) -> bool {
        self.continue_removal
            .as_ref()
            .is_none_or(|veto| veto(key, node))
    }

    pub(crate) fn allows_restoration(&self, key: &K, node: &N) -> bool {
        self.continue_restoration
            .as_ref()
            .is_none_or(|veto| veto(key, node))
    }

    pub(crate) fn change_input(&self, changes: TreeChanges<K, N>) -> TreeChanges<K, N> {
        match &self.modify_change_input {
            Some(transform) => transform(changes),
            None => changes,
        }
    }
}
