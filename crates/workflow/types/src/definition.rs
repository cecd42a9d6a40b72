//! Workflow definitions: states, state actions and transitions.
//!
//! Definitions are plain records. Cross-record rules (one initial state per
//! workflow, transitions that stay inside their workflow, unique labels) are
//! enforced by the definition store and the engine's definition service.

use crate::{DocumentTypeId, StateActionId, StateId, TransitionId, WorkflowError, WorkflowId, WorkflowResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Check that an internal name is non-empty and uses only `[A-Za-z0-9_]`.
pub fn validate_internal_name(name: &str) -> WorkflowResult<()> {
    if name.is_empty() {
        return Err(WorkflowError::InvalidInternalName(
            "internal name must not be empty".into(),
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(WorkflowError::InvalidInternalName(format!(
            "'{}' contains '{}'; only letters, digits and underscores are allowed",
            name, bad
        )));
    }
    Ok(())
}

// ── Workflow ─────────────────────────────────────────────────────────

/// A named state machine attached to a set of document types
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    /// Programmatic name, used by indexing templates
    pub internal_name: String,
    pub label: String,
    /// Document types whose documents get an instance of this workflow
    #[serde(default)]
    pub document_types: BTreeSet<DocumentTypeId>,
}

impl Workflow {
    pub fn new(internal_name: impl Into<String>, label: impl Into<String>) -> WorkflowResult<Self> {
        let internal_name = internal_name.into();
        validate_internal_name(&internal_name)?;
        Ok(Self {
            id: WorkflowId::generate(),
            internal_name,
            label: label.into(),
            document_types: BTreeSet::new(),
        })
    }

    pub fn with_document_type(mut self, document_type: DocumentTypeId) -> Self {
        self.document_types.insert(document_type);
        self
    }

    pub fn applies_to(&self, document_type: &DocumentTypeId) -> bool {
        self.document_types.contains(document_type)
    }
}

// ── States ───────────────────────────────────────────────────────────

/// A node of a workflow's state machine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: StateId,
    pub workflow_id: WorkflowId,
    pub label: String,
    /// Instances without log entries are in this state
    #[serde(default)]
    pub initial: bool,
    /// Advisory progress percentage, 0 to 100
    #[serde(default)]
    pub completion: u8,
}

impl WorkflowState {
    pub fn new(workflow_id: WorkflowId, label: impl Into<String>) -> Self {
        Self {
            id: StateId::generate(),
            workflow_id,
            label: label.into(),
            initial: false,
            completion: 0,
        }
    }

    pub fn as_initial(mut self) -> Self {
        self.initial = true;
        self
    }

    pub fn with_completion(mut self, completion: u8) -> Self {
        self.completion = completion;
        self
    }
}

// ── State actions ────────────────────────────────────────────────────

/// Stable identifier of an action implementation in the action registry
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionPath(pub String);

impl ActionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// When a state action runs relative to its state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionWhen {
    #[default]
    OnEntry,
    OnExit,
}

impl ActionWhen {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionWhen::OnEntry => "on_entry",
            ActionWhen::OnExit => "on_exit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "on_entry" => Some(ActionWhen::OnEntry),
            "on_exit" => Some(ActionWhen::OnExit),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionWhen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionWhen::OnEntry => write!(f, "On entry"),
            ActionWhen::OnExit => write!(f, "On exit"),
        }
    }
}

/// A configured side effect attached to a state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAction {
    pub id: StateActionId,
    pub state_id: StateId,
    pub label: String,
    #[serde(default)]
    pub when: ActionWhen,
    pub enabled: bool,
    pub action_path: ActionPath,
    /// JSON object holding the action's configuration
    pub action_data: String,
}

impl StateAction {
    pub fn new(state_id: StateId, label: impl Into<String>, action_path: ActionPath) -> Self {
        Self {
            id: StateActionId::generate(),
            state_id,
            label: label.into(),
            when: ActionWhen::OnEntry,
            enabled: true,
            action_path,
            action_data: "{}".into(),
        }
    }

    pub fn on_exit(mut self) -> Self {
        self.when = ActionWhen::OnExit;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_data(mut self, data: &serde_json::Map<String, serde_json::Value>) -> Self {
        self.action_data = serde_json::Value::Object(data.clone()).to_string();
        self
    }

    /// Parse the stored configuration. Empty text is an empty map.
    pub fn loads(&self) -> WorkflowResult<serde_json::Map<String, serde_json::Value>> {
        if self.action_data.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        match serde_json::from_str::<serde_json::Value>(&self.action_data) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(WorkflowError::InvalidActionData {
                action: self.label.clone(),
                reason: format!("expected a JSON object, found {}", other),
            }),
            Err(e) => Err(WorkflowError::InvalidActionData {
                action: self.label.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

// ── Transitions ──────────────────────────────────────────────────────

/// A labeled, directed edge between two states of the same workflow
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    pub workflow_id: WorkflowId,
    pub label: String,
    pub origin_state_id: StateId,
    pub destination_state_id: StateId,
    /// Event names that fire this transition automatically
    #[serde(default)]
    pub trigger_events: BTreeSet<String>,
}

impl Transition {
    pub fn new(
        workflow_id: WorkflowId,
        label: impl Into<String>,
        origin_state_id: StateId,
        destination_state_id: StateId,
    ) -> Self {
        Self {
            id: TransitionId::generate(),
            workflow_id,
            label: label.into(),
            origin_state_id,
            destination_state_id,
            trigger_events: BTreeSet::new(),
        }
    }

    pub fn with_trigger_event(mut self, event_name: impl Into<String>) -> Self {
        self.trigger_events.insert(event_name.into());
        self
    }

    pub fn is_triggered_by(&self, event_name: &str) -> bool {
        self.trigger_events.contains(event_name)
    }

    /// Ordering key used wherever transitions are listed or tie-broken
    pub fn sort_key(&self) -> (&str, &str) {
        (self.label.as_str(), self.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_name_validation() {
        assert!(validate_internal_name("invoice_review_2").is_ok());
        assert!(validate_internal_name("").is_err());
        assert!(validate_internal_name("has space").is_err());
        assert!(validate_internal_name("dash-ed").is_err());
        assert!(Workflow::new("bad.name", "Bad").is_err());
    }

    #[test]
    fn test_workflow_document_types() {
        let wf = Workflow::new("review", "Review")
            .unwrap()
            .with_document_type(DocumentTypeId::new("invoice"));
        assert!(wf.applies_to(&DocumentTypeId::new("invoice")));
        assert!(!wf.applies_to(&DocumentTypeId::new("memo")));
    }

    #[test]
    fn test_action_when_round_trip() {
        for when in [ActionWhen::OnEntry, ActionWhen::OnExit] {
            assert_eq!(ActionWhen::parse(when.as_str()), Some(when));
        }
        assert_eq!(ActionWhen::parse("sometimes"), None);
        assert_eq!(ActionWhen::default(), ActionWhen::OnEntry);
    }

    #[test]
    fn test_action_data_loads() {
        let mut data = serde_json::Map::new();
        data.insert("url".into(), serde_json::json!("http://example.test"));
        let action = StateAction::new(StateId::new("s"), "Notify", ActionPath::new("workflow.http_post"))
            .with_data(&data);
        assert_eq!(action.loads().unwrap(), data);

        let mut broken = action.clone();
        broken.action_data = "[1, 2]".into();
        assert!(matches!(
            broken.loads(),
            Err(WorkflowError::InvalidActionData { .. })
        ));

        broken.action_data = "{not json".into();
        assert!(broken.loads().is_err());

        broken.action_data = String::new();
        assert!(broken.loads().unwrap().is_empty());
    }

    #[test]
    fn test_transition_triggers() {
        let t = Transition::new(WorkflowId::new("w"), "Approve", StateId::new("a"), StateId::new("b"))
            .with_trigger_event("document_checked_in");
        assert!(t.is_triggered_by("document_checked_in"));
        assert!(!t.is_triggered_by("document_checked_out"));
    }
}
