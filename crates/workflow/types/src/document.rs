//! Value types exchanged with the document and access-control subsystems.

use crate::{DocumentId, DocumentTypeId, TransitionId, WorkflowId};
use serde::{Deserialize, Serialize};

/// A document as seen by the workflow engine
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,
    pub document_type: DocumentTypeId,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>, document_type: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(id),
            document_type: DocumentTypeId::new(document_type),
        }
    }
}

/// Permissions the engine asks the access oracle about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    WorkflowTransition,
    WorkflowView,
}

impl Permission {
    pub fn codename(&self) -> &'static str {
        match self {
            Permission::WorkflowTransition => "workflow_transition",
            Permission::WorkflowView => "workflow_view",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.codename())
    }
}

/// Object an access grant can be attached to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AccessTarget {
    Workflow(WorkflowId),
    Transition(TransitionId),
}
