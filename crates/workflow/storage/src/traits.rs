use crate::StorageResult;
use async_trait::async_trait;
use workflow_types::{
    DocumentId, DocumentTypeId, InstanceId, LogEntry, NewLogEntry, StateAction, StateActionId,
    StateId, Transition, TransitionId, Workflow, WorkflowId, WorkflowInstance, WorkflowState,
};

/// Storage interface for workflow definitions.
///
/// Listings are ordered by label (transitions by label, then id).
/// Uniqueness violations are reported as `StorageError::Conflict`, missing
/// parents as `StorageError::NotFound`.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn insert_workflow(&self, workflow: Workflow) -> StorageResult<()>;

    /// Replace a workflow's label, internal name and document types.
    async fn update_workflow(&self, workflow: Workflow) -> StorageResult<()>;

    /// Delete a workflow with its states, transitions, instances and logs.
    async fn delete_workflow(&self, id: &WorkflowId) -> StorageResult<()>;

    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<Workflow>>;

    async fn get_workflow_by_internal_name(
        &self,
        internal_name: &str,
    ) -> StorageResult<Option<Workflow>>;

    async fn list_workflows(&self) -> StorageResult<Vec<Workflow>>;

    async fn workflows_for_document_type(
        &self,
        document_type: &DocumentTypeId,
    ) -> StorageResult<Vec<Workflow>>;

    async fn attach_document_type(
        &self,
        workflow_id: &WorkflowId,
        document_type: &DocumentTypeId,
    ) -> StorageResult<()>;

    async fn detach_document_type(
        &self,
        workflow_id: &WorkflowId,
        document_type: &DocumentTypeId,
    ) -> StorageResult<()>;

    /// Insert a state. An initial state clears the flag on its siblings in
    /// the same atomic write.
    async fn insert_state(&self, state: WorkflowState) -> StorageResult<()>;

    /// Update a state, with the same initial-flag handling as insert.
    async fn update_state(&self, state: WorkflowState) -> StorageResult<()>;

    /// Delete a state, its actions and every transition touching it.
    async fn delete_state(&self, id: &StateId) -> StorageResult<()>;

    async fn get_state(&self, id: &StateId) -> StorageResult<Option<WorkflowState>>;

    async fn list_states(&self, workflow_id: &WorkflowId) -> StorageResult<Vec<WorkflowState>>;

    async fn initial_state(&self, workflow_id: &WorkflowId) -> StorageResult<Option<WorkflowState>>;

    async fn insert_action(&self, action: StateAction) -> StorageResult<()>;

    async fn update_action(&self, action: StateAction) -> StorageResult<()>;

    async fn delete_action(&self, id: &StateActionId) -> StorageResult<()>;

    async fn get_action(&self, id: &StateActionId) -> StorageResult<Option<StateAction>>;

    async fn list_actions(&self, state_id: &StateId) -> StorageResult<Vec<StateAction>>;

    /// Insert a transition. Both endpoints must belong to its workflow.
    async fn insert_transition(&self, transition: Transition) -> StorageResult<()>;

    /// Replace a transition's label, endpoints and trigger events.
    async fn update_transition(&self, transition: Transition) -> StorageResult<()>;

    /// Delete a transition and the log entries that recorded it.
    async fn delete_transition(&self, id: &TransitionId) -> StorageResult<()>;

    async fn get_transition(&self, id: &TransitionId) -> StorageResult<Option<Transition>>;

    async fn list_transitions(&self, workflow_id: &WorkflowId) -> StorageResult<Vec<Transition>>;

    /// Transitions whose origin is `state_id`.
    async fn transitions_from(&self, state_id: &StateId) -> StorageResult<Vec<Transition>>;

    /// Transitions fired by the named event, across all workflows.
    async fn transitions_triggered_by(&self, event_name: &str) -> StorageResult<Vec<Transition>>;
}

/// Storage interface for workflow instances and their transition logs.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Create the instance binding `workflow_id` to `document_id`.
    /// A second instance for the same pair is a `Conflict`.
    async fn create_instance(
        &self,
        workflow_id: &WorkflowId,
        document_id: &DocumentId,
    ) -> StorageResult<WorkflowInstance>;

    async fn get_instance(&self, id: &InstanceId) -> StorageResult<Option<WorkflowInstance>>;

    async fn instance_for(
        &self,
        document_id: &DocumentId,
        workflow_id: &WorkflowId,
    ) -> StorageResult<Option<WorkflowInstance>>;

    async fn instances_for_document(
        &self,
        document_id: &DocumentId,
    ) -> StorageResult<Vec<WorkflowInstance>>;

    async fn instances_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> StorageResult<Vec<WorkflowInstance>>;

    /// Remove a document's instances and their logs. Returns how many
    /// instances were removed.
    async fn delete_instances_for_document(&self, document_id: &DocumentId) -> StorageResult<usize>;

    /// Log entries oldest first.
    async fn log_entries(&self, instance_id: &InstanceId) -> StorageResult<Vec<LogEntry>>;

    async fn last_log_entry(&self, instance_id: &InstanceId) -> StorageResult<Option<LogEntry>>;

    /// Open a transaction holding an exclusive lock on the instance.
    async fn begin_transition(
        &self,
        instance_id: &InstanceId,
    ) -> StorageResult<Box<dyn InstanceTransaction>>;
}

/// Exclusive write access to one instance's log.
///
/// Dropping the transaction without committing discards appended entries.
#[async_trait]
pub trait InstanceTransaction: Send {
    fn instance(&self) -> &WorkflowInstance;

    /// Most recent entry, including entries appended in this transaction.
    async fn last_log_entry(&mut self) -> StorageResult<Option<LogEntry>>;

    async fn append_log_entry(&mut self, entry: NewLogEntry) -> StorageResult<LogEntry>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// Bundle trait for components that need both stores.
pub trait WorkflowStorage: DefinitionStore + InstanceStore {}

impl<T> WorkflowStorage for T where T: DefinitionStore + InstanceStore + ?Sized {}
