#![forbid(unsafe_code)]

//! Validator primitive.
//!
//! A validator is a pure function from a subject to an ordered, possibly
//! empty, duplicate-tolerant list of results (a [`Chain`]). Containers keep
//! separate sets for errors and warnings; an empty chain means "no finding".

use std::rc::Rc;

/// Ordered list of validation results.
pub type Chain<R> = Vec<R>;

/// Produces validation results for a subject.
pub trait Validator<S: ?Sized, R> {
    fn validate(&self, subject: &S) -> Chain<R>;
}

impl<S: ?Sized, R, F> Validator<S, R> for F
where
    F: Fn(&S) -> Chain<R>,
{
    fn validate(&self, subject: &S) -> Chain<R> {
        self(subject)
    }
}

/// Validators run in registration order with their chains concatenated.
///
/// Cloning shares the underlying validators.
pub struct ValidatorSet<S: ?Sized, R> {
    validators: Vec<Rc<dyn Validator<S, R>>>,
}

impl<S: ?Sized, R> Clone for ValidatorSet<S, R> {
    fn clone(&self) -> Self {
        Self {
            validators: self.validators.clone(),
        }
    }
}

impl<S: ?Sized, R> Default for ValidatorSet<S, R> {
    fn default() -> Self {
        Self {
            validators: Vec::new(),
        }
    }
}

impl<S: ?Sized, R> std::fmt::Debug for ValidatorSet<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorSet")
            .field("len", &self.validators.len())
            .finish()
    }
}

impl<S: ?Sized + 'static, R: 'static> ValidatorSet<S, R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, validator: impl Validator<S, R> + 'static) {
        self.validators.push(Rc::new(validator));
    }

    #[must_use]
    pub fn with(mut self, validator: impl Validator<S, R> + 'static) -> Self {
        self.push(validator);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Run every validator and concatenate the results.
    #[must_use]
    pub fn run(&self, subject: &S) -> Chain<R> {
        let mut chain = Vec::new();
        for validator in &self.validators {
            chain.extend(validator.validate(subject));
        }
        chain
    }
}
