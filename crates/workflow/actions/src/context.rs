use serde_json::{json, Value};
use workflow_types::{LogEntry, StateAction, Transition, WorkflowInstance};

/// Everything an action may inspect while it runs
#[derive(Clone, Copy, Debug)]
pub struct ActionContext<'a> {
    /// The configured action being executed
    pub action: &'a StateAction,
    /// The log entry whose transition caused this execution
    pub entry_log: &'a LogEntry,
    pub instance: &'a WorkflowInstance,
    pub transition: &'a Transition,
}

impl<'a> ActionContext<'a> {
    /// JSON view of the context handed to templates.
    ///
    /// Paths such as `entry_log.transition.label` or
    /// `entry_log.workflow_instance.document_id` are available.
    pub fn to_template_value(&self) -> Value {
        json!({
            "action": {
                "id": self.action.id.as_str(),
                "label": self.action.label,
            },
            "entry_log": {
                "id": self.entry_log.id.as_str(),
                "datetime": self.entry_log.timestamp.to_rfc3339(),
                "comment": self.entry_log.comment,
                "user": self.entry_log.actor.as_ref().map(|p| p.as_str()),
                "transition": {
                    "id": self.transition.id.as_str(),
                    "label": self.transition.label,
                    "origin_state_id": self.transition.origin_state_id.as_str(),
                    "destination_state_id": self.transition.destination_state_id.as_str(),
                },
                "workflow_instance": {
                    "id": self.instance.id.as_str(),
                    "workflow_id": self.instance.workflow_id.as_str(),
                    "document_id": self.instance.document_id.as_str(),
                },
            },
            "document": {
                "id": self.instance.document_id.as_str(),
            },
        })
    }
}
