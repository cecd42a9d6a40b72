//! Event subscriber: fires transitions bound to event verbs
//!
//! Event-triggered transitions run without a principal, so no access
//! check applies, and their log entries carry no actor.

use crate::collaborators::TaskScheduler;
use crate::tasks::{TaskRequest, TRIGGER_TRANSITION_TASK};
use crate::transitions::{TransitionEngine, TransitionOutcome};
use crate::EngineResult;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use workflow_storage::WorkflowStorage;
use workflow_types::{Event, InstanceId, Transition, TransitionId, WorkflowId};

/// What an event did to one instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The transition ran inline
    Applied {
        instance: InstanceId,
        outcome: TransitionOutcome,
    },
    /// No triggered transition leaves the instance's current state
    Skipped { instance: InstanceId },
    /// The transition was queued for a worker
    Deferred {
        instance: InstanceId,
        transition: TransitionId,
    },
}

/// Comment recorded on log entries written for an event
pub fn trigger_comment(event: &Event) -> String {
    format!("Event trigger: {}", event.display_label())
}

/// Receives events and applies the transitions they trigger
#[derive(Clone)]
pub struct EventSubscriber {
    storage: Arc<dyn WorkflowStorage>,
    transitions: TransitionEngine,
    deferral: Option<(String, Arc<dyn TaskScheduler>)>,
}

impl EventSubscriber {
    pub fn new(storage: Arc<dyn WorkflowStorage>, transitions: TransitionEngine) -> Self {
        Self {
            storage,
            transitions,
            deferral: None,
        }
    }

    /// Queue chosen transitions on `queue` instead of running them inline
    pub fn with_deferral(mut self, queue: impl Into<String>, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.deferral = Some((queue.into(), scheduler));
        self
    }

    /// Apply the transitions an event triggers on its document's instances.
    ///
    /// For each instance the eligible transition with the smallest
    /// `(label, id)` is chosen.
    pub async fn handle_event(&self, event: &Event) -> EngineResult<Vec<TriggerOutcome>> {
        let triggered = self.storage.transitions_triggered_by(&event.verb).await?;
        if triggered.is_empty() {
            return Ok(Vec::new());
        }
        let Some(document_id) = event.document_id() else {
            return Ok(Vec::new());
        };

        let workflows: HashSet<&WorkflowId> = triggered.iter().map(|t| &t.workflow_id).collect();
        let triggered_ids: HashSet<&TransitionId> = triggered.iter().map(|t| &t.id).collect();
        let comment = trigger_comment(event);

        let mut outcomes = Vec::new();
        for instance in self.storage.instances_for_document(document_id).await? {
            if !workflows.contains(&instance.workflow_id) {
                continue;
            }

            let available = self.transitions.available_transitions(&instance, None).await?;
            let chosen: Option<Transition> = available
                .into_iter()
                .filter(|t| triggered_ids.contains(&t.id))
                .min_by(|a, b| a.sort_key().cmp(&b.sort_key()));

            let Some(transition) = chosen else {
                tracing::debug!(
                    instance = %instance.id,
                    event = %event.verb,
                    "No triggered transition available"
                );
                outcomes.push(TriggerOutcome::Skipped { instance: instance.id });
                continue;
            };

            if let Some((queue, scheduler)) = &self.deferral {
                let task = TaskRequest::new(TRIGGER_TRANSITION_TASK)
                    .on_queue(queue.as_str())
                    .with_arg("instance_id", instance.id.as_str())
                    .with_arg("transition_id", transition.id.as_str())
                    .with_arg("comment", comment.as_str());
                scheduler.schedule(task).await?;
                tracing::debug!(
                    instance = %instance.id,
                    transition = %transition.label,
                    queue = %queue,
                    "Event-triggered transition deferred"
                );
                outcomes.push(TriggerOutcome::Deferred {
                    instance: instance.id,
                    transition: transition.id,
                });
                continue;
            }

            let outcome = self
                .transitions
                .do_transition(&instance.id, &transition.id, None, &comment)
                .await?;
            outcomes.push(TriggerOutcome::Applied {
                instance: instance.id,
                outcome,
            });
        }
        Ok(outcomes)
    }

    /// Handle events until the channel closes. Failures are logged.
    pub async fn run(&self, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(&event).await {
                tracing::error!(event = %event.verb, error = %e, "Event handling failed");
            }
        }
        tracing::debug!("Event channel closed");
    }
}
