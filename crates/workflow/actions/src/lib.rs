//! State actions for the document workflow engine.
//!
//! An action is a side effect configured on a workflow state: it runs when
//! an instance enters or leaves that state. Action implementations are
//! registered once at start-up in an [`ActionRegistry`] and looked up by
//! their stable [`ActionPath`](workflow_types::ActionPath).
//!
//! Each implementation declares an [`ActionSchema`] describing the fields an
//! administrator fills in. Stored configuration is validated against that
//! schema both when it is saved and before every execution.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod action;
mod context;
mod error;
pub mod http;
mod registry;
mod schema;
pub mod template;

pub use action::*;
pub use context::*;
pub use error::*;
pub use registry::*;
pub use schema::*;
