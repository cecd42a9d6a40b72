//! Transition engine: current state, available transitions and execution
//!
//! The current state of an instance is never stored. It is derived from the
//! destination of the most recent log entry, or from the workflow's initial
//! state while the log is empty.

use crate::collaborators::{AccessOracle, Indexer};
use crate::executor::{ActionExecutor, ActionReport, ExecutionScope};
use crate::EngineResult;
use std::sync::Arc;
use workflow_storage::{InstanceTransaction, WorkflowStorage};
use workflow_types::{
    AccessTarget, ActionWhen, DocumentId, InstanceId, LogEntry, NewLogEntry, Permission,
    Principal, StateId, Transition, TransitionId, WorkflowError, WorkflowInstance, WorkflowState,
};

/// Why a transition request was dropped without effect
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The instance has no current state (no log and no initial state)
    NoCurrentState,
    /// Another transition moved the instance first
    OriginMismatch { origin: StateId, current: StateId },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoCurrentState => write!(f, "instance has no current state"),
            SkipReason::OriginMismatch { origin, current } => write!(
                f,
                "transition origin {} is not the current state {}",
                origin, current
            ),
        }
    }
}

/// Result of [`TransitionEngine::do_transition`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied { entry: LogEntry, report: ActionReport },
    Skipped { reason: SkipReason },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }

    pub fn entry(&self) -> Option<&LogEntry> {
        match self {
            TransitionOutcome::Applied { entry, .. } => Some(entry),
            TransitionOutcome::Skipped { .. } => None,
        }
    }
}

/// Moves workflow instances between states
#[derive(Clone)]
pub struct TransitionEngine {
    storage: Arc<dyn WorkflowStorage>,
    access: Arc<dyn AccessOracle>,
    indexer: Arc<dyn Indexer>,
    executor: ActionExecutor,
}

impl TransitionEngine {
    pub fn new(
        storage: Arc<dyn WorkflowStorage>,
        access: Arc<dyn AccessOracle>,
        indexer: Arc<dyn Indexer>,
        executor: ActionExecutor,
    ) -> Self {
        Self {
            storage,
            access,
            indexer,
            executor,
        }
    }

    pub async fn instance(&self, instance_id: &InstanceId) -> EngineResult<WorkflowInstance> {
        Ok(self
            .storage
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| WorkflowError::InstanceNotFound(instance_id.clone()))?)
    }

    async fn transition(&self, transition_id: &TransitionId) -> EngineResult<Transition> {
        Ok(self
            .storage
            .get_transition(transition_id)
            .await?
            .ok_or_else(|| WorkflowError::TransitionNotFound(transition_id.clone()))?)
    }

    async fn state(&self, state_id: &StateId) -> EngineResult<WorkflowState> {
        Ok(self
            .storage
            .get_state(state_id)
            .await?
            .ok_or_else(|| WorkflowError::StateNotFound(state_id.clone()))?)
    }

    /// State id the given last entry leaves the instance in
    async fn state_after(
        &self,
        instance: &WorkflowInstance,
        last: Option<&LogEntry>,
    ) -> EngineResult<Option<StateId>> {
        match last {
            Some(entry) => Ok(Some(self.transition(&entry.transition_id).await?.destination_state_id)),
            None => Ok(self
                .storage
                .initial_state(&instance.workflow_id)
                .await?
                .map(|s| s.id)),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn current_state(&self, instance: &WorkflowInstance) -> EngineResult<Option<WorkflowState>> {
        let last = self.storage.last_log_entry(&instance.id).await?;
        match self.state_after(instance, last.as_ref()).await? {
            Some(id) => Ok(Some(self.state(&id).await?)),
            None => Ok(None),
        }
    }

    pub async fn log_entries(&self, instance: &WorkflowInstance) -> EngineResult<Vec<LogEntry>> {
        Ok(self.storage.log_entries(&instance.id).await?)
    }

    pub async fn last_log_entry(&self, instance: &WorkflowInstance) -> EngineResult<Option<LogEntry>> {
        Ok(self.storage.last_log_entry(&instance.id).await?)
    }

    /// Completion percentage of the current state, zero without one
    pub async fn completion(&self, instance: &WorkflowInstance) -> EngineResult<u8> {
        Ok(self
            .current_state(instance)
            .await?
            .map(|s| s.completion)
            .unwrap_or(0))
    }

    /// Documents whose instance currently sits in `state_id`
    pub async fn documents_in_state(&self, state_id: &StateId) -> EngineResult<Vec<DocumentId>> {
        let state = self.state(state_id).await?;
        let mut documents = Vec::new();
        for instance in self.storage.instances_for_workflow(&state.workflow_id).await? {
            if let Some(current) = self.current_state(&instance).await? {
                if current.id == state.id {
                    documents.push(instance.document_id);
                }
            }
        }
        Ok(documents)
    }

    /// Current state of a document in the workflow with the given internal name
    pub async fn document_current_state(
        &self,
        document_id: &DocumentId,
        internal_name: &str,
    ) -> EngineResult<Option<WorkflowState>> {
        let Some(workflow) = self.storage.get_workflow_by_internal_name(internal_name).await? else {
            return Ok(None);
        };
        match self.storage.instance_for(document_id, &workflow.id).await? {
            Some(instance) => self.current_state(&instance).await,
            None => Ok(None),
        }
    }

    // ── Permissions ──────────────────────────────────────────────────

    /// Transitions the principal may take from the instance's current state.
    ///
    /// Without a principal (system callers) every outgoing transition is
    /// returned. Otherwise the global permission, then a grant on the
    /// workflow, each allow all candidates; failing both, only transitions
    /// individually granted are kept.
    pub async fn available_transitions(
        &self,
        instance: &WorkflowInstance,
        principal: Option<&Principal>,
    ) -> EngineResult<Vec<Transition>> {
        let Some(current) = self.current_state(instance).await? else {
            return Ok(Vec::new());
        };
        let candidates = self.storage.transitions_from(&current.id).await?;

        let Some(principal) = principal else {
            return Ok(candidates);
        };
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let permission = Permission::WorkflowTransition;
        if self.access.has_global_permission(permission, principal).await? {
            return Ok(candidates);
        }
        let workflow = AccessTarget::Workflow(instance.workflow_id.clone());
        if self.access.grants(permission, principal, &workflow).await? {
            return Ok(candidates);
        }

        let targets = candidates
            .iter()
            .map(|t| AccessTarget::Transition(t.id.clone()))
            .collect();
        let allowed = self.access.filter(permission, principal, targets).await?;
        Ok(candidates
            .into_iter()
            .filter(|t| allowed.contains(&AccessTarget::Transition(t.id.clone())))
            .collect())
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Apply a transition to an instance.
    ///
    /// The current state is re-derived under the instance lock; a transition
    /// whose origin no longer matches is skipped without a log entry. The
    /// entry and every action run inside the same transaction. Action
    /// failures are isolated unless debug re-raise is enabled, in which case
    /// the entry is still committed and the first failure is returned.
    pub async fn do_transition(
        &self,
        instance_id: &InstanceId,
        transition_id: &TransitionId,
        actor: Option<Principal>,
        comment: &str,
    ) -> EngineResult<TransitionOutcome> {
        let transition = self.transition(transition_id).await?;
        let mut tx = self.storage.begin_transition(instance_id).await?;
        let instance = tx.instance().clone();

        let last = tx.last_log_entry().await?;
        let current = match self.state_after(&instance, last.as_ref()).await {
            Ok(current) => current,
            Err(e) => {
                discard(tx).await;
                return Err(e);
            }
        };

        let skip = match current {
            None => Some(SkipReason::NoCurrentState),
            Some(current) if current != transition.origin_state_id => Some(SkipReason::OriginMismatch {
                origin: transition.origin_state_id.clone(),
                current,
            }),
            Some(_) => None,
        };
        if let Some(reason) = skip {
            tracing::debug!(
                instance = %instance.id,
                transition = %transition.id,
                reason = %reason,
                "Stale transition ignored"
            );
            tx.rollback().await?;
            return Ok(TransitionOutcome::Skipped { reason });
        }

        let entry = tx
            .append_log_entry(
                NewLogEntry::new(transition.id.clone())
                    .with_actor(actor)
                    .with_comment(comment),
            )
            .await?;

        let report = match self.run_actions(&instance, &transition, &entry).await {
            Ok(report) => report,
            Err(e) => {
                discard(tx).await;
                return Err(e);
            }
        };
        tx.commit().await?;

        tracing::info!(
            instance = %instance.id,
            document = %instance.document_id,
            transition = %transition.label,
            actions = report.executed.len(),
            failures = report.failed.len(),
            "Transition applied"
        );

        if let Err(e) = self.indexer.index_document(&instance.document_id).await {
            tracing::warn!(document = %instance.document_id, error = %e, "Failed to signal indexer");
        }

        if let Some(err) = report.halting_error() {
            return Err(err);
        }
        Ok(TransitionOutcome::Applied { entry, report })
    }

    async fn run_actions(
        &self,
        instance: &WorkflowInstance,
        transition: &Transition,
        entry: &LogEntry,
    ) -> EngineResult<ActionReport> {
        let scope = ExecutionScope {
            entry,
            instance,
            transition,
        };
        let mut report = ActionReport::default();
        let finished = self
            .executor
            .run_state_actions(&transition.origin_state_id, ActionWhen::OnExit, scope, &mut report)
            .await?;
        if finished {
            self.executor
                .run_state_actions(
                    &transition.destination_state_id,
                    ActionWhen::OnEntry,
                    scope,
                    &mut report,
                )
                .await?;
        }
        Ok(report)
    }

    /// Validate and apply a transition requested by a principal.
    ///
    /// Fails with `InvalidTransition` when the transition belongs to another
    /// workflow or is not available to the principal from the current state.
    pub async fn submit_transition(
        &self,
        instance_id: &InstanceId,
        transition_id: &TransitionId,
        principal: Option<Principal>,
        comment: &str,
    ) -> EngineResult<TransitionOutcome> {
        let instance = self.instance(instance_id).await?;
        let transition = self.transition(transition_id).await?;
        if transition.workflow_id != instance.workflow_id {
            return Err(WorkflowError::InvalidTransition(format!(
                "'{}' does not belong to workflow {}",
                transition.label, instance.workflow_id
            ))
            .into());
        }

        let available = self
            .available_transitions(&instance, principal.as_ref())
            .await?;
        if !available.iter().any(|t| t.id == transition.id) {
            return Err(WorkflowError::InvalidTransition(format!(
                "'{}' is not available from the current state",
                transition.label
            ))
            .into());
        }

        self.do_transition(&instance.id, &transition.id, principal, comment)
            .await
    }
}

async fn discard(tx: Box<dyn InstanceTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}
