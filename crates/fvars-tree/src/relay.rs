#![forbid(unsafe_code)]

//! Listeners that forward child notifications to the owning root.
//!
//! Relays hold the host weakly, so a child never keeps its parent alive.

use std::rc::{Rc, Weak};

use fvars_core::{ChangeEventRef, Listener, Node, NodeId, Subscription, ValidateEventRef};

/// Receiver of bubbled child notifications.
pub(crate) trait ChildHost<K> {
    fn child_changed(&self, key: &K, event: &ChangeEventRef);

    fn child_validated(&self, key: &K, event: &ValidateEventRef);

    /// `source` is the id of the node whose streams were disposed.
    fn child_disposed(&self, key: &K, source: NodeId);
}

struct ChangeRelay<K> {
    host: Weak<dyn ChildHost<K>>,
    key: K,
}

impl<K> Listener<ChangeEventRef> for ChangeRelay<K> {
    fn react(&self, event: &ChangeEventRef) {
        if let Some(host) = self.host.upgrade() {
            host.child_changed(&self.key, event);
        }
    }
}

struct ValidateRelay<K> {
    host: Weak<dyn ChildHost<K>>,
    key: K,
}

impl<K> Listener<ValidateEventRef> for ValidateRelay<K> {
    fn react(&self, event: &ValidateEventRef) {
        if let Some(host) = self.host.upgrade() {
            host.child_validated(&self.key, event);
        }
    }
}

struct DisposalWatch<K> {
    host: Weak<dyn ChildHost<K>>,
    key: K,
}

impl<K> Listener<ChangeEventRef> for DisposalWatch<K> {
    fn react(&self, _event: &ChangeEventRef) {}

    fn on_dispose(&self, source: NodeId) {
        if let Some(host) = self.host.upgrade() {
            host.child_disposed(&self.key, source);
        }
    }
}

/// Subscriptions a root holds on one owned child.
pub(crate) struct ChildLinks {
    _watch: Subscription,
    bubbling: Option<[Subscription; 2]>,
}

impl ChildLinks {
    /// Watch `node` for disposal only.
    pub(crate) fn watch<K: Clone + 'static>(
        host: &Weak<dyn ChildHost<K>>,
        key: &K,
        node: &dyn Node,
    ) -> Self {
        let watch = node.listen_change(Rc::new(DisposalWatch {
            host: host.clone(),
            key: key.clone(),
        }));
        Self {
            _watch: watch,
            bubbling: None,
        }
    }

    /// Watch `node` for disposal and bubble its events.
    pub(crate) fn live<K: Clone + 'static>(
        host: &Weak<dyn ChildHost<K>>,
        key: &K,
        node: &dyn Node,
    ) -> Self {
        let mut links = Self::watch(host, key, node);
        links.start_bubbling(host, key, node);
        links
    }

    pub(crate) fn start_bubbling<K: Clone + 'static>(
        &mut self,
        host: &Weak<dyn ChildHost<K>>,
        key: &K,
        node: &dyn Node,
    ) {
        if self.bubbling.is_some() {
            return;
        }
        let change = node.listen_change(Rc::new(ChangeRelay {
            host: host.clone(),
            key: key.clone(),
        }));
        let validate = node.listen_validate(Rc::new(ValidateRelay {
            host: host.clone(),
            key: key.clone(),
        }));
        self.bubbling = Some([change, validate]);
    }

    pub(crate) fn stop_bubbling(&mut self) {
        self.bubbling = None;
    }
}
