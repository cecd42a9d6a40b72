//! Definition service: validated writes to workflow definitions
//!
//! Every write is checked before it reaches the store. Rejected writes have
//! no side effects.

use crate::EngineResult;
use std::collections::BTreeSet;
use std::sync::Arc;
use workflow_actions::{ActionError, ActionRegistry};
use workflow_storage::WorkflowStorage;
use workflow_types::{
    validate_internal_name, DocumentTypeId, Principal, StateAction, StateActionId, StateId,
    Transition, TransitionId, Workflow, WorkflowError, WorkflowId, WorkflowState,
};

/// Creates and edits workflows, states, actions and transitions
#[derive(Clone)]
pub struct DefinitionService {
    storage: Arc<dyn WorkflowStorage>,
    actions: Arc<ActionRegistry>,
}

impl DefinitionService {
    pub fn new(storage: Arc<dyn WorkflowStorage>, actions: Arc<ActionRegistry>) -> Self {
        Self { storage, actions }
    }

    // ── Workflows ────────────────────────────────────────────────────

    pub async fn workflow(&self, id: &WorkflowId) -> EngineResult<Workflow> {
        Ok(self
            .storage
            .get_workflow(id)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(id.clone()))?)
    }

    pub async fn workflow_by_internal_name(&self, internal_name: &str) -> EngineResult<Option<Workflow>> {
        Ok(self.storage.get_workflow_by_internal_name(internal_name).await?)
    }

    pub async fn list_workflows(&self) -> EngineResult<Vec<Workflow>> {
        Ok(self.storage.list_workflows().await?)
    }

    pub async fn create_workflow(&self, workflow: Workflow) -> EngineResult<Workflow> {
        validate_internal_name(&workflow.internal_name)?;
        self.storage.insert_workflow(workflow.clone()).await?;
        tracing::info!(workflow = %workflow.id, name = %workflow.internal_name, "Workflow created");
        Ok(workflow)
    }

    pub async fn update_workflow(&self, workflow: Workflow) -> EngineResult<()> {
        validate_internal_name(&workflow.internal_name)?;
        self.storage.update_workflow(workflow.clone()).await?;
        tracing::info!(workflow = %workflow.id, "Workflow updated");
        Ok(())
    }

    pub async fn delete_workflow(&self, id: &WorkflowId) -> EngineResult<()> {
        self.storage.delete_workflow(id).await?;
        tracing::info!(workflow = %id, "Workflow deleted");
        Ok(())
    }

    pub async fn attach_document_type(&self, id: &WorkflowId, document_type: &DocumentTypeId) -> EngineResult<()> {
        self.storage.attach_document_type(id, document_type).await?;
        tracing::info!(workflow = %id, document_type = %document_type, "Document type attached");
        Ok(())
    }

    pub async fn detach_document_type(&self, id: &WorkflowId, document_type: &DocumentTypeId) -> EngineResult<()> {
        self.storage.detach_document_type(id, document_type).await?;
        tracing::info!(workflow = %id, document_type = %document_type, "Document type detached");
        Ok(())
    }

    /// Candidates not yet attached to the workflow, for "add document type" choices
    pub async fn document_types_not_in(
        &self,
        id: &WorkflowId,
        candidates: impl IntoIterator<Item = DocumentTypeId>,
    ) -> EngineResult<Vec<DocumentTypeId>> {
        let workflow = self.workflow(id).await?;
        Ok(candidates
            .into_iter()
            .filter(|t| !workflow.applies_to(t))
            .collect())
    }

    // ── States ───────────────────────────────────────────────────────

    pub async fn state(&self, id: &StateId) -> EngineResult<WorkflowState> {
        Ok(self
            .storage
            .get_state(id)
            .await?
            .ok_or_else(|| WorkflowError::StateNotFound(id.clone()))?)
    }

    pub async fn list_states(&self, workflow_id: &WorkflowId) -> EngineResult<Vec<WorkflowState>> {
        Ok(self.storage.list_states(workflow_id).await?)
    }

    pub async fn create_state(&self, state: WorkflowState) -> EngineResult<WorkflowState> {
        self.validate_completion(&state)?;
        self.workflow(&state.workflow_id).await?;
        self.storage.insert_state(state.clone()).await?;
        tracing::info!(workflow = %state.workflow_id, state = %state.label, initial = state.initial, "State created");
        Ok(state)
    }

    pub async fn update_state(&self, state: WorkflowState) -> EngineResult<()> {
        self.validate_completion(&state)?;
        self.storage.update_state(state).await?;
        Ok(())
    }

    pub async fn delete_state(&self, id: &StateId) -> EngineResult<()> {
        self.storage.delete_state(id).await?;
        tracing::info!(state = %id, "State deleted");
        Ok(())
    }

    /// Mark a state initial; its siblings lose the flag
    pub async fn set_initial_state(&self, id: &StateId) -> EngineResult<()> {
        let mut state = self.state(id).await?;
        state.initial = true;
        self.storage.update_state(state).await?;
        Ok(())
    }

    fn validate_completion(&self, state: &WorkflowState) -> EngineResult<()> {
        if state.completion > 100 {
            return Err(WorkflowError::ValidationError(format!(
                "completion of state '{}' must be between 0 and 100, got {}",
                state.label, state.completion
            ))
            .into());
        }
        Ok(())
    }

    // ── Actions ──────────────────────────────────────────────────────

    pub async fn action(&self, id: &StateActionId) -> EngineResult<StateAction> {
        Ok(self
            .storage
            .get_action(id)
            .await?
            .ok_or_else(|| WorkflowError::ActionNotFound(id.clone()))?)
    }

    pub async fn list_actions(&self, state_id: &StateId) -> EngineResult<Vec<StateAction>> {
        Ok(self.storage.list_actions(state_id).await?)
    }

    /// Check the action path is registered and the data fits its schema.
    ///
    /// Returns the action with its data normalized by the implementation.
    pub fn clean_action(&self, action: StateAction, principal: Option<&Principal>) -> EngineResult<StateAction> {
        let implementation = self
            .actions
            .get(&action.action_path)
            .map_err(|_| WorkflowError::ActionNotRegistered(action.action_path.clone()))?;
        let invalid = |e: ActionError| WorkflowError::InvalidActionData {
            action: action.label.clone(),
            reason: e.to_string(),
        };

        let data = action.loads()?;
        let config = implementation.schema().validate(&data).map_err(invalid)?;
        let config = implementation.clean(principal, config).map_err(invalid)?;
        let data = config.to_map();
        Ok(action.with_data(&data))
    }

    pub async fn create_action(
        &self,
        action: StateAction,
        principal: Option<&Principal>,
    ) -> EngineResult<StateAction> {
        let action = self.clean_action(action, principal)?;
        self.state(&action.state_id).await?;
        self.storage.insert_action(action.clone()).await?;
        tracing::info!(state = %action.state_id, action = %action.label, path = %action.action_path, "State action created");
        Ok(action)
    }

    pub async fn update_action(&self, action: StateAction, principal: Option<&Principal>) -> EngineResult<StateAction> {
        let action = self.clean_action(action, principal)?;
        self.storage.update_action(action.clone()).await?;
        Ok(action)
    }

    pub async fn delete_action(&self, id: &StateActionId) -> EngineResult<()> {
        self.storage.delete_action(id).await?;
        Ok(())
    }

    /// Enable or disable an action without touching its configuration
    pub async fn set_action_enabled(&self, id: &StateActionId, enabled: bool) -> EngineResult<()> {
        let mut action = self.action(id).await?;
        action.enabled = enabled;
        self.storage.update_action(action).await?;
        Ok(())
    }

    // ── Transitions ──────────────────────────────────────────────────

    pub async fn transition(&self, id: &TransitionId) -> EngineResult<Transition> {
        Ok(self
            .storage
            .get_transition(id)
            .await?
            .ok_or_else(|| WorkflowError::TransitionNotFound(id.clone()))?)
    }

    pub async fn list_transitions(&self, workflow_id: &WorkflowId) -> EngineResult<Vec<Transition>> {
        Ok(self.storage.list_transitions(workflow_id).await?)
    }

    async fn validate_endpoints(&self, transition: &Transition) -> EngineResult<()> {
        for state_id in [&transition.origin_state_id, &transition.destination_state_id] {
            let state = self.state(state_id).await?;
            if state.workflow_id != transition.workflow_id {
                return Err(WorkflowError::CrossWorkflowTransition {
                    transition: transition.label.clone(),
                    workflow: transition.workflow_id.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub async fn create_transition(&self, transition: Transition) -> EngineResult<Transition> {
        self.validate_endpoints(&transition).await?;
        self.storage.insert_transition(transition.clone()).await?;
        tracing::info!(workflow = %transition.workflow_id, transition = %transition.label, "Transition created");
        Ok(transition)
    }

    pub async fn update_transition(&self, transition: Transition) -> EngineResult<()> {
        self.validate_endpoints(&transition).await?;
        self.storage.update_transition(transition).await?;
        Ok(())
    }

    pub async fn delete_transition(&self, id: &TransitionId) -> EngineResult<()> {
        self.storage.delete_transition(id).await?;
        tracing::info!(transition = %id, "Transition deleted");
        Ok(())
    }

    /// Replace the event verbs that fire a transition
    pub async fn set_trigger_events(
        &self,
        id: &TransitionId,
        events: impl IntoIterator<Item = String>,
    ) -> EngineResult<()> {
        let mut transition = self.transition(id).await?;
        transition.trigger_events = events.into_iter().collect::<BTreeSet<_>>();
        self.storage.update_transition(transition).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;
    use serde_json::json;
    use workflow_actions::http::HTTP_POST_ACTION;
    use workflow_storage::memory::InMemoryWorkflowStorage;
    use workflow_types::{ActionPath, ErrorKind};

    fn service() -> DefinitionService {
        DefinitionService::new(
            Arc::new(InMemoryWorkflowStorage::new()),
            Arc::new(ActionRegistry::with_builtin_actions(4)),
        )
    }

    #[tokio::test]
    async fn test_rejects_cross_workflow_transition() {
        let service = service();
        let a = service.create_workflow(Workflow::new("a", "A").unwrap()).await.unwrap();
        let b = service.create_workflow(Workflow::new("b", "B").unwrap()).await.unwrap();
        let sa = service.create_state(WorkflowState::new(a.id.clone(), "SA")).await.unwrap();
        let sb = service.create_state(WorkflowState::new(b.id.clone(), "SB")).await.unwrap();

        let err = service
            .create_transition(Transition::new(a.id.clone(), "Cross", sa.id.clone(), sb.id.clone()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Workflow(WorkflowError::CrossWorkflowTransition { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::Definition);
        assert!(service.list_transitions(&a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_action_validation() {
        let service = service();
        let wf = service.create_workflow(Workflow::new("wf", "WF").unwrap()).await.unwrap();
        let state = service.create_state(WorkflowState::new(wf.id.clone(), "S")).await.unwrap();

        let unknown = StateAction::new(state.id.clone(), "Unknown", ActionPath::new("nowhere.action"));
        let err = service.create_action(unknown, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Workflow(WorkflowError::ActionNotRegistered(_))));

        let missing_url = StateAction::new(state.id.clone(), "Notify", ActionPath::new(HTTP_POST_ACTION));
        let err = service.create_action(missing_url, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Workflow(WorkflowError::InvalidActionData { .. })));

        let data = json!({"url": "http://example.test/hook"});
        let notify = StateAction::new(state.id.clone(), "Notify", ActionPath::new(HTTP_POST_ACTION))
            .with_data(data.as_object().unwrap());
        let saved = service.create_action(notify, None).await.unwrap();
        assert_eq!(saved.loads().unwrap()["timeout"], json!(4));

        service.set_action_enabled(&saved.id, false).await.unwrap();
        assert!(!service.action(&saved.id).await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_internal_name_and_initial_flag() {
        let service = service();
        let bad = Workflow {
            internal_name: "has space".into(),
            ..Workflow::new("ok", "Ok").unwrap()
        };
        assert!(service.create_workflow(bad).await.is_err());

        let wf = service
            .create_workflow(Workflow::new("wf", "WF").unwrap().with_document_type(DocumentTypeId::new("invoice")))
            .await
            .unwrap();
        let s0 = service.create_state(WorkflowState::new(wf.id.clone(), "S0").as_initial()).await.unwrap();
        let s1 = service.create_state(WorkflowState::new(wf.id.clone(), "S1")).await.unwrap();
        service.set_initial_state(&s1.id).await.unwrap();
        assert!(!service.state(&s0.id).await.unwrap().initial);
        assert!(service.state(&s1.id).await.unwrap().initial);

        let remaining = service
            .document_types_not_in(&wf.id, [DocumentTypeId::new("invoice"), DocumentTypeId::new("memo")])
            .await
            .unwrap();
        assert_eq!(remaining, vec![DocumentTypeId::new("memo")]);
    }
}
