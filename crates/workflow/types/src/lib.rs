//! Domain types for the document workflow engine.
//!
//! A workflow is a per-document finite state machine. Definitions are
//! authored by administrators; instances bind one workflow to one document;
//! every state change is recorded as an immutable log entry.
//!
//! # Key Concepts
//!
//! - **Workflow**: a named state machine attached to a set of document types.
//! - **WorkflowState**: a node of the machine. At most one state per
//!   workflow is flagged `initial`.
//! - **StateAction**: a side effect configured on a state, run on entry or
//!   on exit.
//! - **Transition**: a labeled, directed edge between two states of the same
//!   workflow, optionally fired by named events.
//! - **WorkflowInstance**: the binding of one workflow to one document.
//! - **LogEntry**: an append-only audit record of a transition that was
//!   taken. The current state of an instance is derived from its log.

#![deny(unsafe_code)]

mod definition;
mod document;
mod errors;
mod event;
mod ids;
mod instance;

pub use definition::*;
pub use document::*;
pub use errors::*;
pub use event::*;
pub use ids::*;
pub use instance::*;
