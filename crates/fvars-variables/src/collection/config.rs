#![forbid(unsafe_code)]

//! Construction-time policy for a [`CollectionVariable`](super::CollectionVariable).
//!
//! Veto predicates and the input transform are injected here instead of
//! being overridden per container type, so the diff engine stays untouched
//! when a policy is swapped.

use std::rc::Rc;

use ahash::AHashMap;
use fvars_core::{Chain, Comparer, ElementState, Validator, ValidatorSet};

use super::table::ElementInfo;

/// Current or baseline membership of a collection.
pub type ElementMap<K, T> = AHashMap<K, T>;

type KeySelector<K, T> = Rc<dyn Fn(&T) -> K>;
type AdditionVeto<T> = Rc<dyn Fn(&T) -> bool>;
type ReplacementVeto<T> = Rc<dyn Fn(&T, &T) -> bool>;
type RemovalVeto<K, T> = Rc<dyn Fn(&K, &T) -> bool>;
type InputTransform<T> = Rc<dyn Fn(Vec<T>) -> Vec<T>>;

/// Policy of a keyed collection.
pub struct CollectionConfig<K, T, R = String> {
    key_of: KeySelector<K, T>,
    comparer: Comparer<T>,
    errors: ValidatorSet<ElementMap<K, T>, R>,
    warnings: ValidatorSet<ElementMap<K, T>, R>,
    element_errors: ValidatorSet<T, R>,
    element_warnings: ValidatorSet<T, R>,
    continue_addition: Option<AdditionVeto<T>>,
    continue_replacement: Option<ReplacementVeto<T>>,
    continue_removal: Option<RemovalVeto<K, T>>,
    modify_change_input: Option<InputTransform<T>>,
    pub(crate) read_only: bool,
}

impl<K: 'static, T: PartialEq + 'static, R: 'static> CollectionConfig<K, T, R> {
    /// Config keyed by `key_of`, diffing elements with `PartialEq`.
    #[must_use]
    pub fn new(key_of: impl Fn(&T) -> K + 'static) -> Self {
        Self::with_comparer(key_of, Comparer::structural())
    }
}

impl<K: 'static, T: 'static, R: 'static> CollectionConfig<K, T, R> {
    /// Config keyed by `key_of`, diffing elements with `comparer`.
    #[must_use]
    pub fn with_comparer(key_of: impl Fn(&T) -> K + 'static, comparer: Comparer<T>) -> Self {
        Self {
            key_of: Rc::new(key_of),
            comparer,
            errors: ValidatorSet::new(),
            warnings: ValidatorSet::new(),
            element_errors: ValidatorSet::new(),
            element_warnings: ValidatorSet::new(),
            continue_addition: None,
            continue_replacement: None,
            continue_removal: None,
            modify_change_input: None,
            read_only: false,
        }
    }

    /// Replace the element comparer.
    #[must_use]
    pub fn comparer(mut self, comparer: Comparer<T>) -> Self {
        self.comparer = comparer;
        self
    }

    /// Add a whole-collection error validator.
    #[must_use]
    pub fn error_validator(
        mut self,
        validator: impl Validator<ElementMap<K, T>, R> + 'static,
    ) -> Self {
        self.errors.push(validator);
        self
    }

    /// Add a whole-collection warning validator.
    #[must_use]
    pub fn warning_validator(
        mut self,
        validator: impl Validator<ElementMap<K, T>, R> + 'static,
    ) -> Self {
        self.warnings.push(validator);
        self
    }

    /// Add a per-element error validator.
    #[must_use]
    pub fn element_error_validator(mut self, validator: impl Validator<T, R> + 'static) -> Self {
        self.element_errors.push(validator);
        self
    }

    /// Add a per-element warning validator.
    #[must_use]
    pub fn element_warning_validator(mut self, validator: impl Validator<T, R> + 'static) -> Self {
        self.element_warnings.push(validator);
        self
    }

    /// Veto additions: return `false` to skip the element.
    #[must_use]
    pub fn continue_addition(mut self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        self.continue_addition = Some(Rc::new(predicate));
        self
    }

    /// Veto replacements: called with `(current, replacement)`.
    #[must_use]
    pub fn continue_replacement(mut self, predicate: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.continue_replacement = Some(Rc::new(predicate));
        self
    }

    /// Veto removals: called with the key and the current element.
    #[must_use]
    pub fn continue_removal(mut self, predicate: impl Fn(&K, &T) -> bool + 'static) -> Self {
        self.continue_removal = Some(Rc::new(predicate));
        self
    }

    /// Transform the input of `change`/`try_change` before it is diffed.
    #[must_use]
    pub fn modify_change_input(mut self, transform: impl Fn(Vec<T>) -> Vec<T> + 'static) -> Self {
        self.modify_change_input = Some(Rc::new(transform));
        self
    }

    /// Start read-only.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub(crate) fn key_of(&self, element: &T) -> K {
        (self.key_of)(element)
    }

    pub(crate) fn equals(&self, a: &T, b: &T) -> bool {
        self.comparer.equals(a, b)
    }

    pub(crate) fn allows_addition(&self, element: &T) -> bool {
        self.continue_addition.as_ref().is_none_or(|veto| veto(element))
    }

    pub(crate) fn allows_replacement(&self, current: &T, replacement: &T) -> bool {
        self.continue_replacement
            .as_ref()
            .is_none_or(|veto| veto(current, replacement))
    }

    pub(crate) fn allows_removal(&self, key: &K, current: &T) -> bool {
        self.continue_removal
            .as_ref()
            .is_none_or(|veto| veto(key, current))
    }

    pub(crate) fn change_input(&self, input: Vec<T>) -> Vec<T> {
        match &self.modify_change_input {
            Some(transform) => transform(input),
            None => input,
        }
    }

    /// Container-level `(errors, warnings)` for the current membership.
    pub(crate) fn validate_collection(&self, elements: &ElementMap<K, T>) -> (Chain<R>, Chain<R>) {
        (self.errors.run(elements), self.warnings.run(elements))
    }
}

impl<K: std::hash::Hash + Eq + 'static, T: 'static, R: 'static> CollectionConfig<K, T, R> {
    /// Element info for `element` stored under `key`, diffed against the
    /// baseline: `ADDED` if the key is absent from it, `CHANGED` if the
    /// baseline value differs, otherwise no structural bit.
    pub(crate) fn element_info(
        &self,
        initial: &ElementMap<K, T>,
        key: &K,
        element: &T,
        validate: bool,
    ) -> ElementInfo<R> {
        let structural = match initial.get(key) {
            None => ElementState::ADDED,
            Some(baseline) if !self.comparer.equals(baseline, element) => ElementState::CHANGED,
            Some(_) => ElementState::empty(),
        };
        let (errors, warnings) = if validate {
            (self.element_errors.run(element), self.element_warnings.run(element))
        } else {
            (Vec::new(), Vec::new())
        };
        ElementInfo::new(structural, errors, warnings)
    }
}
