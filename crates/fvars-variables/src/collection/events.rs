#![forbid(unsafe_code)]

//! Change and validation payloads of a collection.

use std::any::Any;
use std::rc::Rc;

use fvars_core::{
    Chain, ChangeEvent, ChangeEventRef, ChangeSource, ElementState, ValidateEvent, VariableState,
};

/// One key's element, status, and validation output at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSnapshot<T, R> {
    /// `None` when the key is absent from current membership.
    pub element: Option<T>,
    pub state: ElementState,
    pub errors: Chain<R>,
    pub warnings: Chain<R>,
}

impl<T, R> ElementSnapshot<T, R> {
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            element: None,
            state: ElementState::NOT_FOUND,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Before/after pair for one key touched by an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDelta<K, T, R> {
    pub key: K,
    pub previous: ElementSnapshot<T, R>,
    pub current: ElementSnapshot<T, R>,
}

/// Change notification of a collection.
#[derive(Debug, Clone)]
pub struct CollectionChangeEvent<K, T, R> {
    pub source: ChangeSource,
    pub previous_state: VariableState,
    pub added: Vec<ElementDelta<K, T, R>>,
    pub removed: Vec<ElementDelta<K, T, R>>,
    pub replaced: Vec<ElementDelta<K, T, R>>,
    pub refreshed: Vec<ElementDelta<K, T, R>>,
}

impl<K, T, R> CollectionChangeEvent<K, T, R> {
    pub(crate) fn new(source: ChangeSource, previous_state: VariableState) -> Self {
        Self {
            source,
            previous_state,
            added: Vec::new(),
            removed: Vec::new(),
            replaced: Vec::new(),
            refreshed: Vec::new(),
        }
    }

    /// `true` if no key was touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.replaced.is_empty()
            && self.refreshed.is_empty()
    }

    /// Total number of touched keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.replaced.len() + self.refreshed.len()
    }
}

impl<K: 'static, T: 'static, R: 'static> ChangeEvent for CollectionChangeEvent<K, T, R> {
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

/// Validation notification of a collection.
#[derive(Debug, Clone)]
pub struct CollectionValidateEvent<K, T, R> {
    pub previous_state: VariableState,
    pub previous_errors: Chain<R>,
    pub previous_warnings: Chain<R>,
    /// Keys whose element validation was recomputed, in operation order.
    pub elements: Vec<ElementDelta<K, T, R>>,
    pub change: Option<Rc<CollectionChangeEvent<K, T, R>>>,
}

impl<K: 'static, T: 'static, R: 'static> ValidateEvent for CollectionValidateEvent<K, T, R> {
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
