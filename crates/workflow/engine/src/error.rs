//! Error types for the workflow runtime

use serde::{Deserialize, Serialize};
use workflow_storage::StorageError;
use workflow_types::{ErrorKind, StateActionId, WorkflowError};

/// Errors surfaced by engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("action '{label}' ({action}) failed: {message}")]
    ActionFailed {
        action: StateActionId,
        label: String,
        message: String,
    },

    #[error("diagram rendering failed: {0}")]
    Render(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Workflow(e) => e.kind(),
            EngineError::Storage(StorageError::NotFound(_)) => ErrorKind::NotFound,
            EngineError::Storage(
                StorageError::Conflict(_)
                | StorageError::InvariantViolation(_)
                | StorageError::InvalidInput(_),
            ) => ErrorKind::Definition,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::ActionFailed { .. } => ErrorKind::ActionFailure,
            EngineError::Render(_) => ErrorKind::Render,
            EngineError::UnknownTask(_) | EngineError::Collaborator(_) => ErrorKind::Collaborator,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(e) if e.is_retryable())
    }

    /// Serializable form handed back to callers of a failed request
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

/// A failure as reported to API callers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
