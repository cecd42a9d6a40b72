//! Storage contracts for the document workflow engine.
//!
//! Two stores back the engine:
//! - the definition store: workflows, states, state actions, transitions
//!   and their event triggers
//! - the instance store: workflow instances and their append-only
//!   transition log
//!
//! Log entries can only be appended through an [`InstanceTransaction`],
//! which holds an exclusive lock on its instance until it is committed or
//! rolled back. This is what serializes concurrent transitions of the same
//! instance.
//!
//! Backends:
//! - [`memory::InMemoryWorkflowStorage`] for tests and single-process use
//! - `postgres::PostgresWorkflowStorage` (feature `postgres`) as the
//!   transactional source of truth

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use traits::{DefinitionStore, InstanceStore, InstanceTransaction, WorkflowStorage};
