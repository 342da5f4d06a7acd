#![forbid(unsafe_code)]

//! Programmer errors raised by node registration.
//!
//! Expected refusals (read-only, absent key, equal value, vetoed) are never
//! errors; they surface as [`ChangeResult`](crate::ChangeResult) values.

use std::rc::Rc;

use thiserror::Error;

use crate::node::Node;

/// Why a node could not be registered under a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum RegistrationFailure {
    #[error("parent is disposed")]
    ParentDisposed,

    #[error("parent is itself registered under another node")]
    ParentHasParent,

    #[error("child is disposed")]
    ChildDisposed,

    #[error("child already has a parent")]
    ChildHasParent,

    #[error("a node cannot be registered under itself")]
    SelfRegistration,

    #[error("key is already registered")]
    DuplicateKey,
}

/// Illegal registration, carrying both nodes for diagnostics.
#[derive(Error)]
#[error("cannot register {} under {}: {reason}", .child.id(), .parent.id())]
pub struct RegistrationError {
    pub reason: RegistrationFailure,
    pub parent: Rc<dyn Node>,
    pub child: Rc<dyn Node>,
}

impl RegistrationError {
    #[must_use]
    pub fn new(reason: RegistrationFailure, parent: Rc<dyn Node>, child: Rc<dyn Node>) -> Self {
        Self {
            reason,
            parent,
            child,
        }
    }
}

impl std::fmt::Debug for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationError")
            .field("reason", &self.reason)
            .field("parent", &self.parent.id())
            .field("parent_state", &self.parent.state())
            .field("child", &self.child.id())
            .field("child_state", &self.child.state())
            .finish()
    }
}
