//! State action executor
//!
//! Runs the enabled actions of a state for one log entry. A failing action
//! is written to the error log and the remaining actions still run; the
//! transition that caused the execution is never undone by an action.

use crate::collaborators::ErrorLog;
use crate::{EngineError, EngineResult};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use workflow_actions::{ActionContext, ActionError, ActionRegistry, ActionResult};
use workflow_storage::WorkflowStorage;
use workflow_types::{
    ActionWhen, LogEntry, StateAction, StateActionId, StateId, Transition, WorkflowInstance,
};

/// An action that failed during a transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionFailure {
    pub action_id: StateActionId,
    pub label: String,
    pub error: ActionError,
}

/// What happened to the actions run for one transition
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionReport {
    /// Actions that completed, in execution order
    pub executed: Vec<StateActionId>,
    pub failed: Vec<ActionFailure>,
    /// Set when debug mode stopped execution at the first failure
    pub halted: bool,
}

impl ActionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// The failure that halted execution, as an engine error
    pub fn halting_error(&self) -> Option<EngineError> {
        if !self.halted {
            return None;
        }
        self.failed.last().map(|f| EngineError::ActionFailed {
            action: f.action_id.clone(),
            label: f.label.clone(),
            message: f.error.log_text(),
        })
    }
}

/// The entry log and surroundings shared by every action of one transition
#[derive(Clone, Copy)]
pub struct ExecutionScope<'a> {
    pub entry: &'a LogEntry,
    pub instance: &'a WorkflowInstance,
    pub transition: &'a Transition,
}

/// Executes state actions with failure isolation
#[derive(Clone)]
pub struct ActionExecutor {
    storage: Arc<dyn WorkflowStorage>,
    actions: Arc<ActionRegistry>,
    error_log: Arc<dyn ErrorLog>,
    debug_reraise: bool,
}

impl ActionExecutor {
    pub fn new(
        storage: Arc<dyn WorkflowStorage>,
        actions: Arc<ActionRegistry>,
        error_log: Arc<dyn ErrorLog>,
    ) -> Self {
        Self {
            storage,
            actions,
            error_log,
            debug_reraise: false,
        }
    }

    pub fn with_debug_reraise(mut self, debug_reraise: bool) -> Self {
        self.debug_reraise = debug_reraise;
        self
    }

    /// Enabled actions of `state_id` for the given phase, sorted by label
    pub async fn actions_for(&self, state_id: &StateId, when: ActionWhen) -> EngineResult<Vec<StateAction>> {
        let mut actions: Vec<StateAction> = self
            .storage
            .list_actions(state_id)
            .await?
            .into_iter()
            .filter(|a| a.enabled && a.when == when)
            .collect();
        actions.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
        Ok(actions)
    }

    /// Run the enabled `when` actions of a state.
    ///
    /// Returns `Ok(false)` when debug mode stopped at a failure; the report
    /// then holds that failure as its last entry. Storage errors while
    /// listing actions propagate.
    pub async fn run_state_actions(
        &self,
        state_id: &StateId,
        when: ActionWhen,
        scope: ExecutionScope<'_>,
        report: &mut ActionReport,
    ) -> EngineResult<bool> {
        for action in self.actions_for(state_id, when).await? {
            match self.execute_one(&action, scope).await {
                Ok(()) => report.executed.push(action.id.clone()),
                Err(error) => {
                    self.record_failure(&action, &error).await;
                    report.failed.push(ActionFailure {
                        action_id: action.id.clone(),
                        label: action.label.clone(),
                        error,
                    });
                    if self.debug_reraise {
                        report.halted = true;
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    async fn execute_one(&self, action: &StateAction, scope: ExecutionScope<'_>) -> ActionResult<()> {
        let implementation = self.actions.get(&action.action_path)?;
        let data = action
            .loads()
            .map_err(|e| ActionError::InvalidData(e.to_string()))?;
        let config = implementation.schema().validate(&data)?;

        let context = ActionContext {
            action,
            entry_log: scope.entry,
            instance: scope.instance,
            transition: scope.transition,
        };

        tracing::debug!(
            action = %action.id,
            path = %action.action_path,
            when = %action.when,
            "Executing state action"
        );

        match AssertUnwindSafe(implementation.execute(&config, context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(ActionError::Failed(format!(
                "action panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    async fn record_failure(&self, action: &StateAction, error: &ActionError) {
        let text = error.log_text();
        tracing::warn!(action = %action.id, label = %action.label, error = %text, "State action failed");
        if let Err(e) = self.error_log.record(&action.id, &text).await {
            tracing::error!(action = %action.id, error = %e, "Failed to write error log entry");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryErrorLog;
    use async_trait::async_trait;
    use workflow_actions::{ActionConfig, ActionSchema, WorkflowAction};
    use workflow_storage::memory::InMemoryWorkflowStorage;
    use workflow_storage::{DefinitionStore, InstanceStore};
    use workflow_types::{ActionPath, DocumentId, NewLogEntry, Workflow, WorkflowState};

    struct Panicking;

    #[async_trait]
    impl WorkflowAction for Panicking {
        fn id(&self) -> ActionPath {
            ActionPath::new("test.panicking")
        }

        fn label(&self) -> &str {
            "Panics"
        }

        fn schema(&self) -> ActionSchema {
            ActionSchema::new()
        }

        async fn execute(&self, _: &ActionConfig, _: ActionContext<'_>) -> ActionResult<()> {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_logged() {
        let storage = Arc::new(InMemoryWorkflowStorage::new());
        let wf = Workflow::new("wf", "Workflow").unwrap();
        storage.insert_workflow(wf.clone()).await.unwrap();
        let s0 = WorkflowState::new(wf.id.clone(), "S0").as_initial();
        let s1 = WorkflowState::new(wf.id.clone(), "S1");
        storage.insert_state(s0.clone()).await.unwrap();
        storage.insert_state(s1.clone()).await.unwrap();
        let t = Transition::new(wf.id.clone(), "Go", s0.id.clone(), s1.id.clone());
        storage.insert_transition(t.clone()).await.unwrap();

        let missing = StateAction::new(s1.id.clone(), "A missing", ActionPath::new("nowhere.missing"));
        let panics = StateAction::new(s1.id.clone(), "B panics", ActionPath::new("test.panicking"));
        let disabled = StateAction::new(s1.id.clone(), "C disabled", ActionPath::new("test.panicking")).disabled();
        for a in [&missing, &panics, &disabled] {
            storage.insert_action(a.clone()).await.unwrap();
        }

        let instance = storage.create_instance(&wf.id, &DocumentId::new("d")).await.unwrap();
        let mut tx = storage.begin_transition(&instance.id).await.unwrap();
        let entry = tx.append_log_entry(NewLogEntry::new(t.id.clone())).await.unwrap();
        tx.commit().await.unwrap();

        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(Panicking));
        let error_log = Arc::new(InMemoryErrorLog::new());
        let executor = ActionExecutor::new(storage.clone(), Arc::new(registry), error_log.clone());

        let mut report = ActionReport::default();
        let scope = ExecutionScope {
            entry: &entry,
            instance: &instance,
            transition: &t,
        };
        let finished = executor
            .run_state_actions(&s1.id, ActionWhen::OnEntry, scope, &mut report)
            .await
            .unwrap();

        assert!(finished);
        assert_eq!(report.failed.len(), 2);
        assert!(report.halting_error().is_none());
        let logged = error_log.entries_for(&missing.id).await.unwrap();
        assert!(logged[0].text.starts_with("ActionNotRegistered; "));
        let logged = error_log.entries_for(&panics.id).await.unwrap();
        assert_eq!(logged[0].text, "ActionFailed; action panicked: boom");
        assert!(error_log.entries_for(&disabled.id).await.unwrap().is_empty());

        let executor = executor.with_debug_reraise(true);
        let mut report = ActionReport::default();
        let finished = executor
            .run_state_actions(&s1.id, ActionWhen::OnEntry, scope, &mut report)
            .await
            .unwrap();
        assert!(!finished);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            report.halting_error(),
            Some(EngineError::ActionFailed { label, .. }) if label == "A missing"
        ));
    }
}
