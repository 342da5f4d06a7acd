#![forbid(unsafe_code)]

//! fvars public facade crate.
//!
//! Observable containers that diff their content against a baseline, run
//! validators, and roll child status up into parent status.

pub use fvars_core as core;
pub use fvars_tree as tree;
pub use fvars_variables as variables;

pub use fvars_core::{
    Chain, ChangeEvent, ChangeEventRef, ChangeResult, ChangeSource, Comparer, ElementState,
    EventStream, Listener, Node, NodeId, RegistrationError, RegistrationFailure, Subscription,
    ValidateEvent, ValidateEventRef, Validator, VariableState,
};
pub use fvars_tree::{
    CollectionRootConfig, CollectionVariableRoot, TreeChangeEvent, TreeChanges,
    TreeValidateEvent, VariableRoot,
};
pub use fvars_variables::{
    CollectionChangeEvent, CollectionConfig, CollectionValidateEvent, CollectionVariable,
    ElementMap, Variable, VariableChangeEvent, VariableConfig, VariableValidateEvent,
};

pub mod prelude {
    pub use fvars_core::{
        ChangeResult, ChangeSource, Comparer, ElementState, Node, Subscription, VariableState,
    };
    pub use fvars_tree::{CollectionRootConfig, CollectionVariableRoot, TreeChanges, VariableRoot};
    pub use fvars_variables::{CollectionConfig, CollectionVariable, Variable, VariableConfig};
}
