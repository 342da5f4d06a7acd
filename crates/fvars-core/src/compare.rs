#![forbid(unsafe_code)]

//! Equality strategy used to diff values against their baseline.

use std::rc::Rc;

/// Shared equality predicate.
///
/// "No comparer supplied" resolves to [`Comparer::structural`] when the
/// container is configured, never at mutation time.
pub struct Comparer<T: ?Sized> {
    eq: Rc<dyn Fn(&T, &T) -> bool>,
}

impl<T: ?Sized> Clone for Comparer<T> {
    fn clone(&self) -> Self {
        Self {
            eq: Rc::clone(&self.eq),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Comparer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Comparer")
    }
}

impl<T: ?Sized + 'static> Comparer<T> {
    /// Custom equality.
    #[must_use]
    pub fn new(eq: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self { eq: Rc::new(eq) }
    }

    /// `PartialEq` equality.
    #[must_use]
    pub fn structural() -> Self
    where
        T: PartialEq,
    {
        Self::new(|a: &T, b: &T| a == b)
    }

    /// Compare by a projected key.
    #[must_use]
    pub fn by_key<U: PartialEq>(project: impl Fn(&T) -> U + 'static) -> Self {
        Self::new(move |a: &T, b: &T| project(a) == project(b))
    }

    #[inline]
    #[must_use]
    pub fn equals(&self, a: &T, b: &T) -> bool {
        (self.eq)(a, b)
    }
}

impl<T: PartialEq + ?Sized + 'static> Default for Comparer<T> {
    fn default() -> Self {
        Self::structural()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_uses_partial_eq() {
        let cmp = Comparer::<i32>::structural();
        assert!(cmp.equals(&1, &1));
        assert!(!cmp.equals(&1, &2));
    }

    #[test]
    fn by_key_ignores_other_fields() {
        let cmp = Comparer::<(u32, &str)>::by_key(|v| v.0);
        assert!(cmp.equals(&(1, "a"), &(1, "b")));
        assert!(!cmp.equals(&(1, "a"), &(2, "a")));
    }

    #[test]
    fn case_insensitive_custom() {
        let cmp = Comparer::<str>::new(|a, b| a.eq_ignore_ascii_case(b));
        assert!(cmp.equals("Hello", "hELLO"));
    }
}
