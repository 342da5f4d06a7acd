#![forbid(unsafe_code)]

//! Status flags shared by every node and by the elements inside collections.
//!
//! Two bitsets live here:
//!
//! - [`VariableState`]: the node-level status (`CHANGED`, `INVALID`,
//!   `WARNING`, `READ_ONLY`, `DISPOSED`, `DIRTY`).
//! - [`ElementState`]: the per-key status inside a collection (`ADDED`,
//!   `CHANGED`, `REMOVED`, `NOT_FOUND`, `INVALID`, `WARNING`).
//!
//! # Invariants
//!
//! 1. `DISPOSED` is never cleared once set, and always implies `READ_ONLY`.
//! 2. `DIRTY` is monotonic: set by the first applied update, never cleared.
//! 3. At most one of `ADDED`, `CHANGED`, `REMOVED` applies to a key.
//! 4. `NOT_FOUND` is a query sentinel and is never stored in a table.

use bitflags::bitflags;

bitflags! {
    /// Node-level status.
    ///
    /// The empty set is the "Default" state: unchanged, valid, writable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VariableState: u8 {
        /// Current value differs from the baseline.
        const CHANGED = 1 << 0;
        /// Own or aggregated error chain is non-empty.
        const INVALID = 1 << 1;
        /// Own or aggregated warning chain is non-empty.
        const WARNING = 1 << 2;
        /// Mutation is disabled.
        const READ_ONLY = 1 << 3;
        /// Terminal state.
        const DISPOSED = 1 << 4;
        /// Updated at least once.
        const DIRTY = 1 << 5;
    }
}

impl VariableState {
    /// Bits recomputed by every mutation pipeline.
    pub const DERIVED: Self = Self::CHANGED.union(Self::INVALID).union(Self::WARNING);

    #[inline]
    #[must_use]
    pub const fn is_changed(self) -> bool {
        self.contains(Self::CHANGED)
    }

    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.contains(Self::INVALID)
    }

    #[inline]
    #[must_use]
    pub const fn is_warning(self) -> bool {
        self.contains(Self::WARNING)
    }

    /// `true` when the node refuses mutation (read-only or disposed).
    #[inline]
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        self.intersects(Self::READ_ONLY.union(Self::DISPOSED))
    }

    #[inline]
    #[must_use]
    pub const fn is_disposed(self) -> bool {
        self.contains(Self::DISPOSED)
    }

    #[inline]
    #[must_use]
    pub const fn is_dirty(self) -> bool {
        self.contains(Self::DIRTY)
    }

    /// Replace the derived bits, keep `READ_ONLY`/`DISPOSED`, and mark dirty.
    #[must_use]
    pub fn with_derived(self, changed: bool, invalid: bool, warning: bool) -> Self {
        let mut next = self.difference(Self::DERIVED) | Self::DIRTY;
        next.set(Self::CHANGED, changed);
        next.set(Self::INVALID, invalid);
        next.set(Self::WARNING, warning);
        next
    }

    /// State after disposal: `READ_ONLY | DISPOSED` are OR'd in.
    #[must_use]
    pub fn disposed(self) -> Self {
        self | Self::READ_ONLY | Self::DISPOSED
    }
}

bitflags! {
    /// Per-key status inside a collection container.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ElementState: u8 {
        /// Present in the baseline with a different value.
        const CHANGED = 1 << 0;
        /// Element-level errors are non-empty.
        const INVALID = 1 << 1;
        /// Element-level warnings are non-empty.
        const WARNING = 1 << 2;
        /// Absent from the baseline.
        const ADDED = 1 << 3;
        /// Present in the baseline, currently absent.
        const REMOVED = 1 << 4;
        /// Unknown to both baseline and current membership.
        const NOT_FOUND = 1 << 5;
    }
}

impl ElementState {
    /// Structural diff bits.
    pub const MODIFIED: Self = Self::ADDED.union(Self::CHANGED).union(Self::REMOVED);

    /// Validation bits.
    pub const VALIDATION: Self = Self::INVALID.union(Self::WARNING);

    /// `true` if the key is added, changed, or removed relative to the baseline.
    #[inline]
    #[must_use]
    pub const fn is_modified(self) -> bool {
        self.intersects(Self::MODIFIED)
    }

    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.contains(Self::INVALID)
    }

    #[inline]
    #[must_use]
    pub const fn is_warning(self) -> bool {
        self.contains(Self::WARNING)
    }

    #[inline]
    #[must_use]
    pub const fn is_not_found(self) -> bool {
        self.contains(Self::NOT_FOUND)
    }

    /// Set the validation bits from chain emptiness.
    #[must_use]
    pub fn with_validation(self, invalid: bool, warning: bool) -> Self {
        let mut next = self.difference(Self::VALIDATION);
        next.set(Self::INVALID, invalid);
        next.set(Self::WARNING, warning);
        next
    }
}

/// Outcome of a value-returning mutation.
///
/// Expected refusals are reported here instead of as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeResult {
    /// The operation applied at least one change.
    Changed,
    /// Nothing applied: key absent, equal value, or vetoed.
    NotChanged,
    /// The container is read-only or disposed.
    ReadOnly,
}

impl ChangeResult {
    #[inline]
    #[must_use]
    pub const fn is_changed(self) -> bool {
        matches!(self, Self::Changed)
    }

    /// `Changed` if `applied`, otherwise `NotChanged`.
    #[inline]
    #[must_use]
    pub const fn from_applied(applied: bool) -> Self {
        if applied {
            Self::Changed
        } else {
            Self::NotChanged
        }
    }
}

/// Why a change event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeSource {
    Change,
    TryChange,
    Refresh,
    Reset,
    SetReadOnly,
    /// Re-published from a child node.
    ChildNode,
}
