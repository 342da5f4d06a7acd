#![forbid(unsafe_code)]

//! Core: status flags, event streams, validators, and the node contract.
//!
//! Everything here is single-threaded: shared ownership is `Rc`/`RefCell`
//! and notifications are delivered inline by the call that triggered them.

pub mod compare;
pub mod error;
pub mod node;
pub mod state;
pub mod stream;
pub mod validate;

pub use compare::Comparer;
pub use error::{RegistrationError, RegistrationFailure};
pub use node::{
    ChangeEvent, ChangeEventRef, ChangeUpcast, Node, NodeCore, NodeId, ValidateEvent,
    ValidateEventRef, ValidateUpcast, check_adoption, same_event,
};
pub use state::{ChangeResult, ChangeSource, ElementState, VariableState};
pub use stream::{EventStream, Listener, Subscription};
pub use validate::{Chain, Validator, ValidatorSet};
