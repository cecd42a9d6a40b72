//! Background task requests exchanged with the task scheduler.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Create instances for every document of every attached type
pub const LAUNCH_ALL_TASK: &str = "workflow.launch_all";
/// Run an event-triggered transition that was deferred to a queue
pub const TRIGGER_TRANSITION_TASK: &str = "workflow.trigger_transition";
/// Reindex a document after its workflow state changed
pub const INDEX_DOCUMENT_TASK: &str = "document.index";

/// A unit of work for the background task queue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TaskRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: None,
            kwargs: Map::new(),
        }
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).and_then(Value::as_str)
    }
}
