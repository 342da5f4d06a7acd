#![forbid(unsafe_code)]

//! Value containers: a scalar [`Variable`] and a keyed [`CollectionVariable`].
//!
//! Both diff their current content against a remembered baseline, run
//! pluggable validators, and publish a change event followed by a validation
//! event for every applied mutation.

pub mod collection;
pub mod scalar;

pub use collection::{
    CollectionChangeEvent, CollectionConfig, CollectionValidateEvent, CollectionVariable,
    ElementDelta, ElementMap, ElementSnapshot, element_map,
};
pub use scalar::{Variable, VariableChangeEvent, VariableConfig, VariableValidateEvent};
