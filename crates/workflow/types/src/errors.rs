//! Error types for the workflow layer

use crate::{ActionPath, InstanceId, StateActionId, StateId, TransitionId, WorkflowId};
use serde::{Deserialize, Serialize};

/// Coarse classification surfaced to callers with every failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A definition write was rejected
    Definition,
    /// A submitted transition is not available
    InvalidTransition,
    /// A referenced entity does not exist
    NotFound,
    /// A state action failed while running
    ActionFailure,
    /// The backing store failed; may be retried
    Storage,
    /// A collaborator (indexer, scheduler, access oracle) failed
    Collaborator,
    /// Rendering a workflow diagram failed
    Render,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Definition => "definition_error",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ActionFailure => "action_failure",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Collaborator => "collaborator_error",
            ErrorKind::Render => "render_error",
        };
        write!(f, "{}", s)
    }
}

/// Errors that can occur in workflow operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Workflow state not found: {0}")]
    StateNotFound(StateId),

    #[error("State action not found: {0}")]
    ActionNotFound(StateActionId),

    #[error("Transition not found: {0}")]
    TransitionNotFound(TransitionId),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Invalid internal name: {0}")]
    InvalidInternalName(String),

    #[error("Transition '{transition}' connects states outside workflow {workflow}")]
    CrossWorkflowTransition {
        transition: String,
        workflow: WorkflowId,
    },

    #[error("Action not registered: {0}")]
    ActionNotRegistered(ActionPath),

    #[error("Invalid configuration for action '{action}': {reason}")]
    InvalidActionData { action: String, reason: String },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Workflow validation error: {0}")]
    ValidationError(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::WorkflowNotFound(_)
            | WorkflowError::StateNotFound(_)
            | WorkflowError::ActionNotFound(_)
            | WorkflowError::TransitionNotFound(_)
            | WorkflowError::InstanceNotFound(_) => ErrorKind::NotFound,
            WorkflowError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            WorkflowError::InvalidInternalName(_)
            | WorkflowError::CrossWorkflowTransition { .. }
            | WorkflowError::ActionNotRegistered(_)
            | WorkflowError::InvalidActionData { .. }
            | WorkflowError::ValidationError(_) => ErrorKind::Definition,
        }
    }
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
