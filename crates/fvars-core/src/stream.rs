#![forbid(unsafe_code)]

//! Synchronous publish/subscribe channel used for change and validation
//! notifications.
//!
//! # Design
//!
//! [`EventStream<E>`] stores its listeners in shared, reference-counted
//! storage. [`publish`](EventStream::publish) snapshots the listener list and
//! then calls each listener in registration order without holding the borrow,
//! so a listener may subscribe, unsubscribe, or publish on another stream from
//! inside `react`.
//!
//! # Invariants
//!
//! 1. Listeners are notified in registration order.
//! 2. A listener registered during delivery does not receive the in-flight
//!    event.
//! 3. Dropping a [`Subscription`] removes the listener before the next
//!    publish.
//! 4. `dispose()` notifies every listener's `on_dispose` exactly once; later
//!    calls are no-ops and later publishes are dropped.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::node::NodeId;

/// Receiver of events published on an [`EventStream`].
pub trait Listener<E> {
    /// Called synchronously for every published event.
    fn react(&self, event: &E);

    /// Called once when the stream owned by `source` is disposed.
    fn on_dispose(&self, _source: NodeId) {}
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E),
{
    fn react(&self, event: &E) {
        self(event);
    }
}

struct StreamInner<E> {
    owner: NodeId,
    listeners: Vec<(u64, Rc<dyn Listener<E>>)>,
    next_listener_id: u64,
    disposed: bool,
}

/// A typed event channel owned by a node.
///
/// Cloning an `EventStream` creates a new handle to the **same** channel.
pub struct EventStream<E> {
    inner: Rc<RefCell<StreamInner<E>>>,
}

impl<E> Clone for EventStream<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E> std::fmt::Debug for EventStream<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("EventStream")
            .field("owner", &inner.owner)
            .field("listeners", &inner.listeners.len())
            .field("disposed", &inner.disposed)
            .finish()
    }
}

impl<E: 'static> EventStream<E> {
    /// Create an open stream owned by `owner`.
    #[must_use]
    pub fn new(owner: NodeId) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StreamInner {
                owner,
                listeners: Vec::new(),
                next_listener_id: 0,
                disposed: false,
            })),
        }
    }

    /// Node that owns this stream.
    #[must_use]
    pub fn owner(&self) -> NodeId {
        self.inner.borrow().owner
    }

    /// Register a listener.
    ///
    /// Listening on a disposed stream returns an inert subscription and
    /// immediately signals `on_dispose`.
    pub fn listen(&self, listener: Rc<dyn Listener<E>>) -> Subscription {
        let (id, owner) = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                let owner = inner.owner;
                drop(inner);
                listener.on_dispose(owner);
                return Subscription::inert();
            }
            let id = inner.next_listener_id;
            inner.next_listener_id += 1;
            inner.listeners.push((id, listener));
            (id, inner.owner)
        };
        let weak: Weak<RefCell<StreamInner<E>>> = Rc::downgrade(&self.inner);
        Subscription {
            owner: Some(owner),
            cancel: Some(Box::new(move || {
                if let Some(strong) = weak.upgrade() {
                    strong.borrow_mut().listeners.retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    /// Register a closure as a listener.
    pub fn subscribe(&self, react: impl Fn(&E) + 'static) -> Subscription {
        self.listen(Rc::new(react))
    }

    /// Deliver `event` to every current listener, in registration order.
    pub fn publish(&self, event: &E) {
        let snapshot: Vec<Rc<dyn Listener<E>>> = {
            let inner = self.inner.borrow();
            if inner.disposed {
                return;
            }
            inner
                .listeners
                .iter()
                .map(|(_, listener)| Rc::clone(listener))
                .collect()
        };
        for listener in snapshot {
            listener.react(event);
        }
    }

    /// Terminate the stream and signal every listener once.
    pub fn dispose(&self) {
        let (owner, listeners) = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            (inner.owner, std::mem::take(&mut inner.listeners))
        };
        for (_, listener) in listeners {
            listener.on_dispose(owner);
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    /// Number of currently registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }
}

/// RAII guard that unsubscribes its listener on drop.
pub struct Subscription {
    owner: Option<NodeId>,
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            owner: None,
            cancel: None,
        }
    }

    /// Owner of the stream this subscription listens on, if still attached.
    #[must_use]
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Whether the subscription still has a listener registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Unsubscribe now.
    pub fn dispose(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("owner", &self.owner)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn stream() -> EventStream<u32> {
        EventStream::new(NodeId::next())
    }

    #[test]
    fn publish_reaches_listeners_in_order() {
        let s = stream();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l1 = Rc::clone(&log);
        let _a = s.subscribe(move |v| l1.borrow_mut().push(("a", *v)));
        let l2 = Rc::clone(&log);
        let _b = s.subscribe(move |v| l2.borrow_mut().push(("b", *v)));

        s.publish(&7);
        assert_eq!(*log.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let s = stream();
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        let sub = s.subscribe(move |_| c.set(c.get() + 1));

        s.publish(&1);
        drop(sub);
        s.publish(&2);

        assert_eq!(count.get(), 1);
        assert_eq!(s.listener_count(), 0);
    }

    #[test]
    fn listener_added_during_delivery_misses_in_flight_event() {
        let s = stream();
        let late_count = Rc::new(Cell::new(0u32));
        let held: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

        let s2 = s.clone();
        let late = Rc::clone(&late_count);
        let held2 = Rc::clone(&held);
        let _sub = s.subscribe(move |_| {
            let late = Rc::clone(&late);
            let sub = s2.subscribe(move |_| late.set(late.get() + 1));
            held2.borrow_mut().push(sub);
        });

        s.publish(&1);
        assert_eq!(late_count.get(), 0);

        s.publish(&2);
        assert_eq!(late_count.get(), 1);
    }

    struct DisposeProbe {
        disposed: Cell<u32>,
        seen: Cell<Option<NodeId>>,
    }

    impl Listener<u32> for DisposeProbe {
        fn react(&self, _event: &u32) {}

        fn on_dispose(&self, source: NodeId) {
            self.disposed.set(self.disposed.get() + 1);
            self.seen.set(Some(source));
        }
    }

    #[test]
    fn dispose_signals_once_and_silences_publish() {
        let owner = NodeId::next();
        let s: EventStream<u32> = EventStream::new(owner);
        let probe = Rc::new(DisposeProbe {
            disposed: Cell::new(0),
            seen: Cell::new(None),
        });
        let _sub = s.listen(probe.clone());

        s.dispose();
        s.dispose();
        s.publish(&3);

        assert_eq!(probe.disposed.get(), 1);
        assert_eq!(probe.seen.get(), Some(owner));
        assert!(s.is_disposed());
    }

    #[test]
    fn listening_on_disposed_stream_is_inert() {
        let s = stream();
        s.dispose();
        let probe = Rc::new(DisposeProbe {
            disposed: Cell::new(0),
            seen: Cell::new(None),
        });
        let sub = s.listen(probe.clone());
        assert!(!sub.is_active());
        assert_eq!(probe.disposed.get(), 1);
    }

    #[test]
    fn subscription_survives_stream_drop() {
        let s = stream();
        let sub = s.subscribe(|_| {});
        drop(s);
        sub.dispose();
    }
}
