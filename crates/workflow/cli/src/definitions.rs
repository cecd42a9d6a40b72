//! Workflow definitions files
//!
//! A definitions file describes workflows by label, so it can be written by
//! hand and loaded into any storage backend:
//!
//! ```yaml
//! workflows:
//!   - internal_name: invoice_review
//!     label: Invoice review
//!     document_types: [invoice]
//!     states:
//!       - label: Draft
//!         initial: true
//!       - label: Approved
//!         completion: 100
//!         actions:
//!           - label: Notify accounting
//!             action_path: workflow.http_post
//!             data: { url: "https://accounting.local/hook" }
//!     transitions:
//!       - label: Approve
//!         origin: Draft
//!         destination: Approved
//!         trigger_events: [approved]
//! ```

use crate::error::{read_file, CliError, CliResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use workflow_engine::DefinitionService;
use workflow_types::{
    ActionPath, ActionWhen, DocumentTypeId, StateAction, StateId, Transition, Workflow, WorkflowState,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefinitionsFile {
    #[serde(default)]
    pub workflows: Vec<WorkflowSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub internal_name: String,
    pub label: String,
    #[serde(default)]
    pub document_types: Vec<String>,
    #[serde(default)]
    pub states: Vec<StateSpec>,
    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpec {
    pub label: String,
    #[serde(default)]
    pub initial: bool,
    #[serde(default)]
    pub completion: u8,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub label: String,
    pub action_path: String,
    #[serde(default)]
    pub when: ActionWhen,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub label: String,
    /// Label of the origin state
    pub origin: String,
    /// Label of the destination state
    pub destination: String,
    #[serde(default)]
    pub trigger_events: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

/// Result of applying a definitions file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
}

impl DefinitionsFile {
    /// Read a YAML or JSON file, chosen by extension
    pub fn read(path: &str) -> CliResult<Self> {
        let content = read_file(path)?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &str, content: &str) -> CliResult<Self> {
        let parsed = if path.ends_with(".yaml") || path.ends_with(".yml") {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(content).map_err(|e| e.to_string())
        };
        parsed.map_err(|message| CliError::Parse {
            path: path.to_string(),
            message,
        })
    }

    /// Check label references before anything is written
    pub fn check(&self) -> CliResult<()> {
        let mut names = HashSet::new();
        for workflow in &self.workflows {
            if !names.insert(workflow.internal_name.as_str()) {
                return Err(CliError::Definitions(format!(
                    "workflow '{}' is defined twice",
                    workflow.internal_name
                )));
            }
            workflow.check()?;
        }
        Ok(())
    }

    /// Create every workflow not already present by internal name
    pub async fn apply(&self, definitions: &DefinitionService) -> CliResult<LoadSummary> {
        self.check()?;
        let mut summary = LoadSummary::default();
        for spec in &self.workflows {
            if definitions
                .workflow_by_internal_name(&spec.internal_name)
                .await?
                .is_some()
            {
                tracing::info!(workflow = %spec.internal_name, "Workflow already defined, skipping");
                summary.skipped.push(spec.internal_name.clone());
                continue;
            }
            spec.create(definitions).await?;
            summary.created.push(spec.internal_name.clone());
        }
        Ok(summary)
    }
}

impl WorkflowSpec {
    fn check(&self) -> CliResult<()> {
        let mut labels = HashSet::new();
        for state in &self.states {
            if !labels.insert(state.label.as_str()) {
                return Err(CliError::Definitions(format!(
                    "state '{}' appears twice in workflow '{}'",
                    state.label, self.internal_name
                )));
            }
        }
        if self.states.iter().filter(|s| s.initial).count() > 1 {
            return Err(CliError::Definitions(format!(
                "workflow '{}' has more than one initial state",
                self.internal_name
            )));
        }
        for transition in &self.transitions {
            for endpoint in [&transition.origin, &transition.destination] {
                if !labels.contains(endpoint.as_str()) {
                    return Err(CliError::Definitions(format!(
                        "transition '{}' of workflow '{}' refers to unknown state '{}'",
                        transition.label, self.internal_name, endpoint
                    )));
                }
            }
        }
        Ok(())
    }

    async fn create(&self, definitions: &DefinitionService) -> CliResult<Workflow> {
        let mut workflow = Workflow::new(&self.internal_name, &self.label)
            .map_err(|e| CliError::Definitions(e.to_string()))?;
        for document_type in &self.document_types {
            workflow = workflow.with_document_type(DocumentTypeId::new(document_type));
        }
        let workflow = definitions.create_workflow(workflow).await?;

        let mut states: HashMap<&str, StateId> = HashMap::new();
        for spec in &self.states {
            let mut state = WorkflowState::new(workflow.id.clone(), &spec.label).with_completion(spec.completion);
            if spec.initial {
                state = state.as_initial();
            }
            let state = definitions.create_state(state).await?;
            for action in &spec.actions {
                let mut record = StateAction::new(state.id.clone(), &action.label, ActionPath::new(&action.action_path))
                    .with_data(&action.data);
                record.when = action.when;
                record.enabled = action.enabled;
                definitions.create_action(record, None).await?;
            }
            states.insert(spec.label.as_str(), state.id);
        }

        for spec in &self.transitions {
            let (Some(origin), Some(destination)) = (
                states.get(spec.origin.as_str()),
                states.get(spec.destination.as_str()),
            ) else {
                return Err(CliError::Definitions(format!(
                    "transition '{}' refers to an unknown state",
                    spec.label
                )));
            };
            let mut transition = Transition::new(workflow.id.clone(), &spec.label, origin.clone(), destination.clone());
            for event in &spec.trigger_events {
                transition = transition.with_trigger_event(event);
            }
            definitions.create_transition(transition).await?;
        }

        tracing::info!(
            workflow = %workflow.internal_name,
            states = self.states.len(),
            transitions = self.transitions.len(),
            "Workflow loaded from definitions"
        );
        Ok(workflow)
    }
}
