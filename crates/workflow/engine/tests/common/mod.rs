#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use workflow_actions::{
    ActionConfig, ActionContext, ActionError, ActionRegistry, ActionResult, ActionSchema,
    WorkflowAction,
};
use workflow_engine::{
    EngineConfig, InMemoryErrorLog, InMemoryTaskScheduler, RecordingIndexer, StaticAccessOracle,
    WorkflowEngine,
};
use workflow_storage::memory::InMemoryWorkflowStorage;
use workflow_types::{
    ActionPath, DocumentRef, DocumentTypeId, StateAction, Transition, Workflow, WorkflowInstance,
    WorkflowState,
};

pub const RECORD_ACTION: &str = "tests.record";
pub const FAIL_ACTION: &str = "tests.fail";
pub const DOCUMENT_TYPE: &str = "invoice";

/// Remembers the label of every action it runs as
#[derive(Debug, Default)]
pub struct RecordAction {
    pub runs: Mutex<Vec<String>>,
}

impl RecordAction {
    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkflowAction for RecordAction {
    fn id(&self) -> ActionPath {
        ActionPath::new(RECORD_ACTION)
    }

    fn label(&self) -> &str {
        "Record execution"
    }

    fn schema(&self) -> ActionSchema {
        ActionSchema::new()
    }

    async fn execute(&self, _: &ActionConfig, context: ActionContext<'_>) -> ActionResult<()> {
        self.runs.lock().unwrap().push(context.action.label.clone());
        Ok(())
    }
}

/// Always fails
#[derive(Debug, Default)]
pub struct FailAction;

#[async_trait]
impl WorkflowAction for FailAction {
    fn id(&self) -> ActionPath {
        ActionPath::new(FAIL_ACTION)
    }

    fn label(&self) -> &str {
        "Fail"
    }

    fn schema(&self) -> ActionSchema {
        ActionSchema::new()
    }

    async fn execute(&self, _: &ActionConfig, _: ActionContext<'_>) -> ActionResult<()> {
        Err(ActionError::Failed("remote service refused the request".into()))
    }
}

pub struct Harness {
    pub engine: WorkflowEngine,
    pub storage: Arc<InMemoryWorkflowStorage>,
    pub indexer: Arc<RecordingIndexer>,
    pub error_log: Arc<InMemoryErrorLog>,
    pub scheduler: Arc<InMemoryTaskScheduler>,
    pub recorder: Arc<RecordAction>,
}

impl Harness {
    pub fn new(access: StaticAccessOracle, config: EngineConfig) -> Self {
        let storage = Arc::new(InMemoryWorkflowStorage::new());
        let indexer = Arc::new(RecordingIndexer::new());
        let error_log = Arc::new(InMemoryErrorLog::new());
        let scheduler = Arc::new(InMemoryTaskScheduler::new());
        let recorder = Arc::new(RecordAction::default());

        let mut registry = ActionRegistry::with_builtin_actions(config.action_http_default_timeout);
        registry.register(recorder.clone());
        registry.register(Arc::new(FailAction));

        let engine = WorkflowEngine::builder(storage.clone())
            .with_config(config)
            .with_action_registry(registry)
            .with_access_oracle(Arc::new(access))
            .with_indexer(indexer.clone())
            .with_error_log(error_log.clone())
            .with_task_scheduler(scheduler.clone())
            .build();

        Self {
            engine,
            storage,
            indexer,
            error_log,
            scheduler,
            recorder,
        }
    }

    pub fn default_engine() -> Self {
        Self::new(StaticAccessOracle::new(), EngineConfig::default())
    }
}

/// Workflow W with states S0 (initial unless told otherwise), S1 and T: S0 → S1
pub struct LinearWorkflow {
    pub workflow: Workflow,
    pub s0: WorkflowState,
    pub s1: WorkflowState,
    pub t: Transition,
}

pub async fn linear_workflow(engine: &WorkflowEngine, initial: bool) -> LinearWorkflow {
    let defs = engine.definitions();
    let workflow = defs
        .create_workflow(
            Workflow::new("w", "W")
                .unwrap()
                .with_document_type(DocumentTypeId::new(DOCUMENT_TYPE)),
        )
        .await
        .unwrap();
    let s0 = WorkflowState::new(workflow.id.clone(), "S0");
    let s0 = if initial { s0.as_initial() } else { s0 };
    let s0 = defs.create_state(s0).await.unwrap();
    let s1 = defs
        .create_state(WorkflowState::new(workflow.id.clone(), "S1").with_completion(100))
        .await
        .unwrap();
    let t = defs
        .create_transition(Transition::new(workflow.id.clone(), "T", s0.id.clone(), s1.id.clone()))
        .await
        .unwrap();
    LinearWorkflow { workflow, s0, s1, t }
}

pub async fn add_action(engine: &WorkflowEngine, state: &WorkflowState, label: &str, path: &str) -> StateAction {
    engine
        .definitions()
        .create_action(StateAction::new(state.id.clone(), label, ActionPath::new(path)), None)
        .await
        .unwrap()
}

/// Create document D of the attached type and return its only instance
pub async fn create_document(engine: &WorkflowEngine, id: &str) -> WorkflowInstance {
    use workflow_engine::DocumentHooks;
    let mut instances = engine
        .launcher()
        .on_document_created(&DocumentRef::new(id, DOCUMENT_TYPE))
        .await
        .unwrap();
    assert_eq!(instances.len(), 1);
    instances.remove(0)
}
