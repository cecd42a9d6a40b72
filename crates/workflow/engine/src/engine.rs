//! The assembled workflow engine
//!
//! [`WorkflowEngine`] wires the definition service, transition engine,
//! launcher and event subscriber to one store and one set of
//! collaborators. It is cheap to clone and safe to share across tasks.

use crate::collaborators::{
    AccessOracle, DocumentSource, ErrorLog, InMemoryErrorLog, Indexer, NoopIndexer,
    StaticAccessOracle, TaskScheduler,
};
use crate::config::EngineConfig;
use crate::definitions::DefinitionService;
use crate::executor::ActionExecutor;
use crate::launcher::{LaunchSummary, Launcher};
use crate::subscriber::EventSubscriber;
use crate::tasks::{TaskRequest, LAUNCH_ALL_TASK, TRIGGER_TRANSITION_TASK};
use crate::transitions::{TransitionEngine, TransitionOutcome};
use crate::visualization::WorkflowDiagram;
use crate::{EngineError, EngineResult};
use std::sync::Arc;
use workflow_actions::ActionRegistry;
use workflow_storage::WorkflowStorage;
use workflow_types::{DocumentId, InstanceId, TransitionId, WorkflowError, WorkflowId, WorkflowState};

/// Result of running a background task
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    LaunchedAll(LaunchSummary),
    Transition(TransitionOutcome),
}

/// Builder for [`WorkflowEngine`]
pub struct WorkflowEngineBuilder {
    storage: Arc<dyn WorkflowStorage>,
    config: EngineConfig,
    actions: Option<ActionRegistry>,
    access: Arc<dyn AccessOracle>,
    indexer: Arc<dyn Indexer>,
    error_log: Arc<dyn ErrorLog>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
}

impl WorkflowEngineBuilder {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this registry instead of the built-in actions
    pub fn with_action_registry(mut self, actions: ActionRegistry) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn with_access_oracle(mut self, access: Arc<dyn AccessOracle>) -> Self {
        self.access = access;
        self
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn with_error_log(mut self, error_log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = error_log;
        self
    }

    pub fn with_task_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let actions = Arc::new(
            self.actions
                .unwrap_or_else(|| ActionRegistry::with_builtin_actions(self.config.action_http_default_timeout)),
        );

        let executor = ActionExecutor::new(self.storage.clone(), actions.clone(), self.error_log.clone())
            .with_debug_reraise(self.config.debug_reraise_action_errors);
        let transitions = TransitionEngine::new(
            self.storage.clone(),
            self.access.clone(),
            self.indexer.clone(),
            executor,
        );

        let mut launcher = Launcher::new(self.storage.clone(), self.indexer.clone());
        let mut subscriber = EventSubscriber::new(self.storage.clone(), transitions.clone());
        if let Some(scheduler) = &self.scheduler {
            launcher = launcher.with_scheduler(scheduler.clone());
            if let Some(queue) = &self.config.event_trigger_queue {
                subscriber = subscriber.with_deferral(queue.clone(), scheduler.clone());
            }
        } else if self.config.event_trigger_queue.is_some() {
            tracing::warn!("event_trigger_queue is set but no task scheduler is configured; triggers run inline");
        }

        tracing::debug!(
            actions = actions.len(),
            debug_reraise = self.config.debug_reraise_action_errors,
            "Workflow engine assembled"
        );

        WorkflowEngine {
            config: Arc::new(self.config),
            storage: self.storage.clone(),
            actions: actions.clone(),
            error_log: self.error_log,
            definitions: DefinitionService::new(self.storage, actions),
            transitions,
            launcher,
            subscriber,
        }
    }
}

/// Document workflow engine
#[derive(Clone)]
pub struct WorkflowEngine {
    config: Arc<EngineConfig>,
    storage: Arc<dyn WorkflowStorage>,
    actions: Arc<ActionRegistry>,
    error_log: Arc<dyn ErrorLog>,
    definitions: DefinitionService,
    transitions: TransitionEngine,
    launcher: Launcher,
    subscriber: EventSubscriber,
}

impl WorkflowEngine {
    /// Start building an engine over `storage` with in-memory collaborators
    /// and an access oracle that grants nothing.
    pub fn builder(storage: Arc<dyn WorkflowStorage>) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            storage,
            config: EngineConfig::default(),
            actions: None,
            access: Arc::new(StaticAccessOracle::new()),
            indexer: Arc::new(NoopIndexer),
            error_log: Arc::new(InMemoryErrorLog::new()),
            scheduler: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn WorkflowStorage> {
        &self.storage
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn error_log(&self) -> &Arc<dyn ErrorLog> {
        &self.error_log
    }

    pub fn definitions(&self) -> &DefinitionService {
        &self.definitions
    }

    pub fn transitions(&self) -> &TransitionEngine {
        &self.transitions
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    pub fn subscriber(&self) -> &EventSubscriber {
        &self.subscriber
    }

    /// Current state of a document in the workflow with the given internal name
    pub async fn document_current_state(
        &self,
        document_id: &DocumentId,
        internal_name: &str,
    ) -> EngineResult<Option<WorkflowState>> {
        self.transitions
            .document_current_state(document_id, internal_name)
            .await
    }

    /// Diagram of a workflow looked up by internal name
    pub async fn diagram(&self, internal_name: &str) -> EngineResult<WorkflowDiagram> {
        let workflow = self
            .storage
            .get_workflow_by_internal_name(internal_name)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(WorkflowId::new(internal_name)))?;
        WorkflowDiagram::load(self.storage.as_ref(), &workflow.id).await
    }

    /// Render a workflow diagram in the given Graphviz output format
    pub async fn render_workflow(&self, internal_name: &str, format: &str) -> EngineResult<Vec<u8>> {
        self.diagram(internal_name).await?.render(format).await
    }

    /// Run a task delivered by the scheduler.
    ///
    /// Tasks may be delivered more than once: launching is idempotent and a
    /// replayed transition is skipped once the instance has moved on.
    pub async fn run_task(&self, task: &TaskRequest, documents: &dyn DocumentSource) -> EngineResult<TaskOutcome> {
        tracing::debug!(task = %task.name, "Running task");
        match task.name.as_str() {
            LAUNCH_ALL_TASK => Ok(TaskOutcome::LaunchedAll(
                self.launcher.launch_all_documents(documents).await?,
            )),
            TRIGGER_TRANSITION_TASK => {
                let instance = task
                    .arg_str("instance_id")
                    .map(InstanceId::new)
                    .ok_or_else(|| missing_arg(task, "instance_id"))?;
                let transition = task
                    .arg_str("transition_id")
                    .map(TransitionId::new)
                    .ok_or_else(|| missing_arg(task, "transition_id"))?;
                let comment = task.arg_str("comment").unwrap_or_default();
                Ok(TaskOutcome::Transition(
                    self.transitions
                        .do_transition(&instance, &transition, None, comment)
                        .await?,
                ))
            }
            other => Err(EngineError::UnknownTask(other.to_string())),
        }
    }
}

fn missing_arg(task: &TaskRequest, name: &str) -> EngineError {
    WorkflowError::ValidationError(format!("task {} is missing argument '{}'", task.name, name)).into()
}
