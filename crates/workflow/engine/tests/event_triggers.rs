mod common;

use common::*;
use workflow_engine::tasks::TRIGGER_TRANSITION_TASK;
use workflow_engine::{
    EngineConfig, StaticAccessOracle, StaticDocumentSource, TaskOutcome, TriggerOutcome,
};
use workflow_storage::InstanceStore;
use workflow_types::{DocumentRef, Event, EventObject, Transition};

fn approved(document: &str) -> Event {
    Event::new("approved")
        .with_label("Document approved")
        .with_actor("reviewer")
        .with_target(EventObject::Document(DocumentRef::new(document, DOCUMENT_TYPE)))
}

async fn bind_trigger(h: &Harness, transition: &Transition, verb: &str) {
    let events = transition
        .trigger_events
        .iter()
        .cloned()
        .chain([verb.to_string()]);
    h.engine
        .definitions()
        .set_trigger_events(&transition.id, events)
        .await
        .unwrap();
}

#[tokio::test]
async fn event_driven_transition() {
    let h = Harness::default_engine();
    let w = linear_workflow(&h.engine, true).await;
    bind_trigger(&h, &w.t, "approved").await;
    let instance = create_document(&h.engine, "D").await;

    let outcomes = h.engine.subscriber().handle_event(&approved("D")).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(&outcomes[0], TriggerOutcome::Applied { outcome, .. } if outcome.is_applied()));

    let log = h.storage.log_entries(&instance.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].transition_id, w.t.id);
    assert_eq!(log[0].actor, None);
    assert!(log[0].comment.starts_with("Event trigger:"));
    assert_eq!(log[0].comment, "Event trigger: Document approved");
}

#[tokio::test]
async fn event_without_valid_transition_is_a_noop() {
    let h = Harness::default_engine();
    let w = linear_workflow(&h.engine, true).await;
    bind_trigger(&h, &w.t, "approved").await;
    let instance = create_document(&h.engine, "D").await;

    // Unbound verb
    let outcomes = h
        .engine
        .subscriber()
        .handle_event(&Event::new("rejected").with_target(EventObject::Document(DocumentRef::new("D", DOCUMENT_TYPE))))
        .await
        .unwrap();
    assert!(outcomes.is_empty());

    // Not about a document
    let outcomes = h
        .engine
        .subscriber()
        .handle_event(&Event::new("approved").with_target(EventObject::Other {
            type_name: "cabinet".into(),
            id: "c1".into(),
        }))
        .await
        .unwrap();
    assert!(outcomes.is_empty());

    // Replay: the second delivery finds the instance already in S1
    h.engine.subscriber().handle_event(&approved("D")).await.unwrap();
    let outcomes = h.engine.subscriber().handle_event(&approved("D")).await.unwrap();
    assert!(matches!(&outcomes[0], TriggerOutcome::Skipped { .. }));
    assert_eq!(h.storage.log_entries(&instance.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn tie_break_picks_smallest_label() {
    let h = Harness::default_engine();
    let w = linear_workflow(&h.engine, true).await;
    let zeta = h
        .engine
        .definitions()
        .create_transition(Transition::new(w.workflow.id.clone(), "Zeta", w.s0.id.clone(), w.s1.id.clone()))
        .await
        .unwrap();
    let alpha = h
        .engine
        .definitions()
        .create_transition(Transition::new(w.workflow.id.clone(), "Alpha", w.s0.id.clone(), w.s1.id.clone()))
        .await
        .unwrap();
    bind_trigger(&h, &zeta, "approved").await;
    bind_trigger(&h, &alpha, "approved").await;
    let instance = create_document(&h.engine, "D").await;

    h.engine.subscriber().handle_event(&approved("D")).await.unwrap();
    let log = h.storage.log_entries(&instance.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].transition_id, alpha.id);
}

#[tokio::test]
async fn deferred_mode_schedules_task() {
    let h = Harness::new(
        StaticAccessOracle::new(),
        EngineConfig {
            event_trigger_queue: Some("workflows".into()),
            ..EngineConfig::default()
        },
    );
    let w = linear_workflow(&h.engine, true).await;
    bind_trigger(&h, &w.t, "approved").await;
    let instance = create_document(&h.engine, "D").await;

    let outcomes = h.engine.subscriber().handle_event(&approved("D")).await.unwrap();
    assert_eq!(
        outcomes,
        vec![TriggerOutcome::Deferred {
            instance: instance.id.clone(),
            transition: w.t.id.clone(),
        }]
    );
    assert!(h.storage.log_entries(&instance.id).await.unwrap().is_empty());

    let tasks = h.scheduler.drain();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name, TRIGGER_TRANSITION_TASK);
    assert_eq!(tasks[0].queue.as_deref(), Some("workflows"));

    // At-least-once delivery: the second run is skipped
    let documents = StaticDocumentSource::default();
    let first = h.engine.run_task(&tasks[0], &documents).await.unwrap();
    let second = h.engine.run_task(&tasks[0], &documents).await.unwrap();
    assert!(matches!(first, TaskOutcome::Transition(ref o) if o.is_applied()));
    assert!(matches!(second, TaskOutcome::Transition(ref o) if !o.is_applied()));

    let log = h.storage.log_entries(&instance.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].comment, "Event trigger: Document approved");
}

#[tokio::test]
async fn subscriber_drains_channel() {
    let h = Harness::default_engine();
    let w = linear_workflow(&h.engine, true).await;
    bind_trigger(&h, &w.t, "approved").await;
    let instance = create_document(&h.engine, "D").await;

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let subscriber = h.engine.subscriber().clone();
    let worker = tokio::spawn(async move { subscriber.run(rx).await });

    tx.send(Event::new("user_logged_in")).await.unwrap();
    tx.send(approved("D")).await.unwrap();
    drop(tx);
    worker.await.unwrap();

    assert_eq!(h.storage.log_entries(&instance.id).await.unwrap().len(), 1);
}
