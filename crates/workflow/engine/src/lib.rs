//! Document workflow runtime
//!
//! The engine moves documents through workflow states. Each document bound
//! to a workflow has an instance whose append-only log of transitions is
//! the single source of truth for its current state.
//!
//! # Architecture
//!
//! The [`WorkflowEngine`] composes specialized components:
//!
//! - [`DefinitionService`]: Validated writes to workflows, states, actions and transitions
//! - [`TransitionEngine`]: Current state, permission-filtered transitions and execution
//! - [`ActionExecutor`]: Runs state actions with failure isolation
//! - [`Launcher`]: Creates instances for documents, idempotently
//! - [`EventSubscriber`]: Fires transitions bound to event verbs
//! - [`WorkflowDiagram`]: Graphviz rendering of a workflow
//!
//! Subsystems the engine does not own (access control, indexing, the error
//! log and the task queue) are reached through the traits in
//! [`collaborators`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use workflow_engine::WorkflowEngine;
//! use workflow_storage::memory::InMemoryWorkflowStorage;
//! use workflow_types::*;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let engine = WorkflowEngine::builder(Arc::new(InMemoryWorkflowStorage::new())).build();
//! let defs = engine.definitions();
//!
//! let wf = defs
//!     .create_workflow(
//!         Workflow::new("review", "Review")
//!             .unwrap()
//!             .with_document_type(DocumentTypeId::new("invoice")),
//!     )
//!     .await
//!     .unwrap();
//! let draft = defs.create_state(WorkflowState::new(wf.id.clone(), "Draft").as_initial()).await.unwrap();
//! let done = defs.create_state(WorkflowState::new(wf.id.clone(), "Done")).await.unwrap();
//! let approve = defs
//!     .create_transition(Transition::new(wf.id.clone(), "Approve", draft.id.clone(), done.id.clone()))
//!     .await
//!     .unwrap();
//!
//! let instances = engine
//!     .launcher()
//!     .launch_all_for(&DocumentRef::new("doc-1", "invoice"))
//!     .await
//!     .unwrap();
//! let outcome = engine
//!     .transitions()
//!     .do_transition(&instances[0].id, &approve.id, None, "looks good")
//!     .await
//!     .unwrap();
//! assert!(outcome.is_applied());
//! # });
//! ```

#![deny(unsafe_code)]

pub mod collaborators;
mod config;
mod definitions;
mod engine;
mod error;
mod executor;
mod launcher;
mod subscriber;
pub mod tasks;
mod transitions;
pub mod visualization;

pub use collaborators::{
    AccessOracle, DocumentSource, ErrorLog, ErrorLogEntry, InMemoryErrorLog, InMemoryTaskScheduler,
    Indexer, NoopIndexer, RecordingIndexer, ScheduledIndexer, StaticAccessOracle,
    StaticDocumentSource, TaskScheduler,
};
pub use config::*;
pub use definitions::*;
pub use engine::*;
pub use error::*;
pub use executor::*;
pub use launcher::*;
pub use subscriber::*;
pub use tasks::TaskRequest;
pub use transitions::*;
pub use visualization::WorkflowDiagram;
