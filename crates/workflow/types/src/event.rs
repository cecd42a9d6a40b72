//! Events published by other subsystems and consumed by trigger transitions.

use crate::{DocumentId, DocumentRef};
use serde::{Deserialize, Serialize};

/// An object referenced by an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventObject {
    Document(DocumentRef),
    Other { type_name: String, id: String },
}

impl EventObject {
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            EventObject::Document(doc) => Some(&doc.id),
            EventObject::Other { .. } => None,
        }
    }
}

/// A named occurrence such as a check-in or a metadata edit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event name transitions subscribe to
    pub verb: String,
    /// Human readable name of the event type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EventObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_object: Option<EventObject>,
}

impl Event {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            label: None,
            actor: None,
            target: None,
            action_object: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_target(mut self, target: EventObject) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_action_object(mut self, action_object: EventObject) -> Self {
        self.action_object = Some(action_object);
        self
    }

    /// Label shown in log comments, falling back to the verb
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.verb)
    }

    /// The document an event is about: the target if it is a document,
    /// otherwise the action object.
    pub fn document_id(&self) -> Option<&DocumentId> {
        self.target
            .as_ref()
            .and_then(EventObject::document_id)
            .or_else(|| self.action_object.as_ref().and_then(EventObject::document_id))
    }
}
