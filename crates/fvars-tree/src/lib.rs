#![forbid(unsafe_code)]

//! Tree containers: roots that own child nodes and fold their status.
//!
//! - [`VariableRoot`]: named heterogeneous children, registered once.
//! - [`CollectionVariableRoot`]: a keyed collection of owned children with
//!   add/remove/restore diffing against a baseline key set.
//!
//! Both re-publish child notifications as [`TreeChangeEvent`] /
//! [`TreeValidateEvent`] with `source == ChildNode`.

pub mod aggregate;
pub mod collection_root;
pub mod config;
pub mod events;
mod relay;
pub mod root;

pub use aggregate::StatusAggregate;
pub use collection_root::CollectionVariableRoot;
pub use config::{CollectionRootConfig, TreeChanges};
pub use events::{NodeDelta, TreeChangeEvent, TreeValidateEvent};
pub use root::VariableRoot;
