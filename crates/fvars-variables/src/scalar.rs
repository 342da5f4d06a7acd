#![forbid(unsafe_code)]

//! Single-value container diffed against a remembered baseline.
//!
//! # Pipeline
//!
//! Every applied mutation runs the same steps:
//!
//! 1. Store the new current (and, for `reset`, initial) value.
//! 2. Run the error and warning validators over the current value.
//! 3. Recompute `CHANGED`/`INVALID`/`WARNING`, OR in `DIRTY`.
//! 4. Publish a change event, then a validation event referencing it.
//!
//! Validation-only operations (`refresh_validation`, `clear_validation`) skip
//! step 1 and publish only a validation event with no change reference.
//!
//! # Invariants
//!
//! 1. `state().is_changed()` iff the comparer says current != initial.
//! 2. The change event is always delivered before its validation event.
//! 3. No event is published by a read-only refusal or after disposal.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use fvars_core::{
    Chain, ChangeEvent, ChangeEventRef, ChangeResult, ChangeSource, ChangeUpcast, Comparer,
    EventStream, Listener, Node, NodeCore, Subscription, ValidateEvent, ValidateEventRef,
    ValidateUpcast, Validator, ValidatorSet, VariableState,
};

/// Construction-time policy for a [`Variable`].
pub struct VariableConfig<T, R = String> {
    comparer: Comparer<T>,
    errors: ValidatorSet<T, R>,
    warnings: ValidatorSet<T, R>,
    read_only: bool,
}

impl<T: PartialEq + 'static, R: 'static> Default for VariableConfig<T, R> {
    fn default() -> Self {
        Self::with_comparer(Comparer::structural())
    }
}

impl<T: 'static, R: 'static> VariableConfig<T, R> {
    /// Config with an explicit comparer (no `PartialEq` required).
    #[must_use]
    pub fn with_comparer(comparer: Comparer<T>) -> Self {
        Self {
            comparer,
            errors: ValidatorSet::new(),
            warnings: ValidatorSet::new(),
            read_only: false,
        }
    }

    /// Replace the comparer.
    #[must_use]
    pub fn comparer(mut self, comparer: Comparer<T>) -> Self {
        self.comparer = comparer;
        self
    }

    /// Add an error validator.
    #[must_use]
    pub fn error_validator(mut self, validator: impl Validator<T, R> + 'static) -> Self {
        self.errors.push(validator);
        self
    }

    /// Add a warning validator.
    #[must_use]
    pub fn warning_validator(mut self, validator: impl Validator<T, R> + 'static) -> Self {
        self.warnings.push(validator);
        self
    }

    /// Start read-only.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Change notification of a [`Variable`].
#[derive(Debug, Clone)]
pub struct VariableChangeEvent<T> {
    pub source: ChangeSource,
    pub previous_state: VariableState,
    pub previous_value: T,
    /// Baseline before a `reset`; `None` for every other source.
    pub previous_initial: Option<T>,
}

impl<T: 'static> ChangeEvent for VariableChangeEvent<T> {
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

/// Validation notification of a [`Variable`].
#[derive(Debug, Clone)]
pub struct VariableValidateEvent<T, R> {
    pub previous_state: VariableState,
    pub previous_errors: Chain<R>,
    pub previous_warnings: Chain<R>,
    pub change: Option<Rc<VariableChangeEvent<T>>>,
}

impl<T: 'static, R: 'static> ValidateEvent for VariableValidateEvent<T, R> {
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

struct ScalarData<T, R> {
    initial: T,
    current: T,
    errors: Chain<R>,
    warnings: Chain<R>,
}

/// Observable single-value container.
pub struct Variable<T, R = String> {
    core: NodeCore,
    comparer: Comparer<T>,
    error_validators: ValidatorSet<T, R>,
    warning_validators: ValidatorSet<T, R>,
    data: RefCell<ScalarData<T, R>>,
    on_change: EventStream<Rc<VariableChangeEvent<T>>>,
    on_validate: EventStream<Rc<VariableValidateEvent<T, R>>>,
}

impl<T: Clone + PartialEq + 'static, R: Clone + 'static> Variable<T, R> {
    /// Variable whose current value equals its baseline.
    #[must_use]
    pub fn new(initial: T) -> Rc<Self> {
        Self::with_config(VariableConfig::default(), initial.clone(), initial)
    }
}

impl<T: Clone + 'static, R: Clone + 'static> Variable<T, R> {
    /// Variable with an explicit config and a current value that may differ
    /// from the baseline.
    #[must_use]
    pub fn with_config(config: VariableConfig<T, R>, initial: T, current: T) -> Rc<Self> {
        let VariableConfig {
            comparer,
            errors,
            warnings,
            read_only,
        } = config;

        let error_chain = errors.run(&current);
        let warning_chain = warnings.run(&current);
        let mut state = VariableState::default().with_derived(
            !comparer.equals(&current, &initial),
            !error_chain.is_empty(),
            !warning_chain.is_empty(),
        );
        // Construction is not an update.
        state.remove(VariableState::DIRTY);
        state.set(VariableState::READ_ONLY, read_only);

        let core = NodeCore::new(state);
        let id = core.id();
        Rc::new(Self {
            core,
            comparer,
            error_validators: errors,
            warning_validators: warnings,
            data: RefCell::new(ScalarData {
                initial,
                current,
                errors: error_chain,
                warnings: warning_chain,
            }),
            on_change: EventStream::new(id),
            on_validate: EventStream::new(id),
        })
    }

    /// Clone of the current value.
    #[must_use]
    pub fn value(&self) -> T {
        self.data.borrow().current.clone()
    }

    /// Borrow the current value.
    pub fn with_value<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.data.borrow().current)
    }

    /// Clone of the baseline.
    #[must_use]
    pub fn initial(&self) -> T {
        self.data.borrow().initial.clone()
    }

    #[must_use]
    pub fn errors(&self) -> Chain<R> {
        self.data.borrow().errors.clone()
    }

    #[must_use]
    pub fn warnings(&self) -> Chain<R> {
        self.data.borrow().warnings.clone()
    }

    pub fn on_change(&self) -> &EventStream<Rc<VariableChangeEvent<T>>> {
        &self.on_change
    }

    pub fn on_validate(&self) -> &EventStream<Rc<VariableValidateEvent<T, R>>> {
        &self.on_validate
    }

    /// Unconditionally replace the current value.
    pub fn change(&self, value: T) -> ChangeResult {
        if self.refuses_mutation("change") {
            return ChangeResult::ReadOnly;
        }
        self.apply(ChangeSource::Change, Some(value), None);
        ChangeResult::Changed
    }

    /// Replace the current value unless it compares equal.
    pub fn try_change(&self, value: T) -> ChangeResult {
        if self.refuses_mutation("try_change") {
            return ChangeResult::ReadOnly;
        }
        let equal = self
            .comparer
            .equals(&self.data.borrow().current, &value);
        if equal {
            tracing::trace!(message = "variable.try_change.equal", node = %self.core.id());
            return ChangeResult::NotChanged;
        }
        self.apply(ChangeSource::TryChange, Some(value), None);
        ChangeResult::Changed
    }

    /// Re-run the change pipeline with the same current value.
    pub fn refresh(&self) {
        if self.core.state().is_disposed() {
            return;
        }
        self.apply(ChangeSource::Refresh, None, None);
    }

    /// Replace both the baseline and the current value in one step.
    pub fn reset(&self, initial: T, current: T) -> ChangeResult {
        if self.refuses_mutation("reset") {
            return ChangeResult::ReadOnly;
        }
        self.apply(ChangeSource::Reset, Some(current), Some(initial));
        ChangeResult::Changed
    }

    /// Reset with the current value equal to the new baseline.
    pub fn reset_to(&self, initial: T) -> ChangeResult {
        self.reset(initial.clone(), initial)
    }

    /// Re-run validators without touching the value.
    pub fn refresh_validation(&self) {
        if self.core.state().is_disposed() {
            return;
        }
        let (errors, warnings) = {
            let data = self.data.borrow();
            (
                self.error_validators.run(&data.current),
                self.warning_validators.run(&data.current),
            )
        };
        self.validate_only(errors, warnings);
    }

    /// Blank the error and warning chains without touching the value.
    pub fn clear_validation(&self) {
        if self.core.state().is_disposed() {
            return;
        }
        self.validate_only(Vec::new(), Vec::new());
    }

    fn refuses_mutation(&self, operation: &'static str) -> bool {
        let state = self.core.state();
        if state.is_read_only() {
            tracing::trace!(
                message = "variable.refused",
                node = %self.core.id(),
                operation,
                disposed = state.is_disposed()
            );
            return true;
        }
        false
    }

    fn apply(&self, source: ChangeSource, value: Option<T>, initial: Option<T>) {
        let previous_state = self.core.state();
        let (change, validate) = {
            let mut data = self.data.borrow_mut();

            let previous_initial = initial.map(|next| std::mem::replace(&mut data.initial, next));
            let previous_value = match value {
                Some(next) => std::mem::replace(&mut data.current, next),
                None => data.current.clone(),
            };

            let errors = self.error_validators.run(&data.current);
            let warnings = self.warning_validators.run(&data.current);
            let previous_errors = std::mem::replace(&mut data.errors, errors);
            let previous_warnings = std::mem::replace(&mut data.warnings, warnings);

            let changed = !self.comparer.equals(&data.current, &data.initial);
            self.core.set_state(previous_state.with_derived(
                changed,
                !data.errors.is_empty(),
                !data.warnings.is_empty(),
            ));

            let change = Rc::new(VariableChangeEvent {
                source,
                previous_state,
                previous_value,
                previous_initial,
            });
            let validate = Rc::new(VariableValidateEvent {
                previous_state,
                previous_errors,
                previous_warnings,
                change: Some(Rc::clone(&change)),
            });
            (change, validate)
        };

        tracing::debug!(
            message = "variable.apply",
            node = %self.core.id(),
            source = ?source,
            state = ?self.core.state()
        );
        self.on_change.publish(&change);
        self.on_validate.publish(&validate);
    }

    fn validate_only(&self, errors: Chain<R>, warnings: Chain<R>) {
        let previous_state = self.core.state();
        let validate = {
            let mut data = self.data.borrow_mut();
            let previous_errors = std::mem::replace(&mut data.errors, errors);
            let previous_warnings = std::mem::replace(&mut data.warnings, warnings);
            self.core.set_state(previous_state.with_derived(
                previous_state.is_changed(),
                !data.errors.is_empty(),
                !data.warnings.is_empty(),
            ));
            Rc::new(VariableValidateEvent {
                previous_state,
                previous_errors,
                previous_warnings,
                change: None,
            })
        };
        self.on_validate.publish(&validate);
    }

    fn set_read_only_flag(&self, read_only: bool) {
        let previous_state = self.core.state();
        if previous_state.is_disposed()
            || previous_state.contains(VariableState::READ_ONLY) == read_only
        {
            return;
        }
        let mut next = previous_state | VariableState::DIRTY;
        next.set(VariableState::READ_ONLY, read_only);
        self.core.set_state(next);

        let change = Rc::new(VariableChangeEvent {
            source: ChangeSource::SetReadOnly,
            previous_state,
            previous_value: self.value(),
            previous_initial: None,
        });
        self.on_change.publish(&change);
    }
}

impl<T: Clone + 'static, R: Clone + 'static> Node for Variable<T, R> {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn listen_change(&self, listener: Rc<dyn Listener<ChangeEventRef>>) -> Subscription {
        self.on_change.listen(Rc::new(ChangeUpcast(listener)))
    }

    fn listen_validate(&self, listener: Rc<dyn Listener<ValidateEventRef>>) -> Subscription {
        self.on_validate.listen(Rc::new(ValidateUpcast(listener)))
    }

    fn set_read_only(&self, read_only: bool) {
        self.set_read_only_flag(read_only);
    }

    fn dispose(&self) {
        if !self.core.mark_disposed() {
            return;
        }
        tracing::debug!(message = "variable.dispose", node = %self.core.id());
        self.on_change.dispose();
        self.on_validate.dispose();
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl<T: std::fmt::Debug, R: std::fmt::Debug> std::fmt::Debug for Variable<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.borrow();
        f.debug_struct("Variable")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .field("initial", &data.initial)
            .field("current", &data.current)
            .field("errors", &data.errors)
            .field("warnings", &data.warnings)
            .finish()
    }
}
