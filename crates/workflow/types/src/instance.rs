//! Workflow instances and their append-only transition log.

use crate::{DocumentId, InstanceId, LogEntryId, Principal, TransitionId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The binding of one workflow to one document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub workflow_id: WorkflowId,
    pub document_id: DocumentId,
    pub created_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(workflow_id: WorkflowId, document_id: DocumentId) -> Self {
        Self {
            id: InstanceId::generate(),
            workflow_id,
            document_id,
            created_at: Utc::now(),
        }
    }
}

/// A transition taken by an instance. Never updated once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogEntryId,
    pub instance_id: InstanceId,
    /// Store-assigned tiebreaker for entries sharing a timestamp
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub transition_id: TransitionId,
    /// Absent when the transition was fired by an event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Principal>,
    #[serde(default)]
    pub comment: String,
}

impl LogEntry {
    /// Total order used to find the most recent entry
    pub fn ordering_key(&self) -> (DateTime<Utc>, i64) {
        (self.timestamp, self.sequence)
    }
}

/// Pick the most recent entry of an instance's log.
pub fn latest_entry<'a, I>(entries: I) -> Option<&'a LogEntry>
where
    I: IntoIterator<Item = &'a LogEntry>,
{
    entries.into_iter().max_by_key(|e| e.ordering_key())
}

/// A log entry about to be appended; the store assigns id, sequence and time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub transition_id: TransitionId,
    pub actor: Option<Principal>,
    pub comment: String,
}

impl NewLogEntry {
    pub fn new(transition_id: TransitionId) -> Self {
        Self {
            transition_id,
            actor: None,
            comment: String::new(),
        }
    }

    pub fn with_actor(mut self, actor: Option<Principal>) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}
