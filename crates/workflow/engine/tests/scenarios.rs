mod common;

use common::*;
use std::sync::Arc;
use workflow_engine::{
    EngineConfig, EngineError, ErrorLog, SkipReason, StaticAccessOracle, TransitionOutcome,
    WorkflowEngine,
};
use workflow_storage::InstanceStore;
use workflow_types::{
    AccessTarget, ErrorKind, Permission, Principal, Transition, Workflow, WorkflowInstance,
    WorkflowState,
};

#[tokio::test]
async fn linear_advance() {
    let h = Harness::default_engine();
    let w = linear_workflow(&h.engine, true).await;
    let instance = create_document(&h.engine, "D").await;
    let transitions = h.engine.transitions();

    assert_eq!(transitions.current_state(&instance).await.unwrap(), Some(w.s0.clone()));

    let user = Principal::new("U");
    let outcome = transitions
        .do_transition(&instance.id, &w.t.id, Some(user.clone()), "ok")
        .await
        .unwrap();
    assert!(outcome.is_applied());

    assert_eq!(transitions.current_state(&instance).await.unwrap(), Some(w.s1.clone()));
    assert_eq!(transitions.completion(&instance).await.unwrap(), 100);
    let log = transitions.log_entries(&instance).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].transition_id, w.t.id);
    assert_eq!(log[0].actor, Some(user));
    assert_eq!(log[0].comment, "ok");

    assert_eq!(
        h.engine
            .document_current_state(&instance.document_id, "w")
            .await
            .unwrap()
            .map(|s| s.id),
        Some(w.s1.id.clone())
    );
    assert_eq!(
        transitions.documents_in_state(&w.s1.id).await.unwrap(),
        vec![instance.document_id.clone()]
    );
    // launch, then the transition
    assert_eq!(h.indexer.indexed().len(), 2);
}

#[tokio::test]
async fn no_initial_state() {
    let h = Harness::default_engine();
    let w = linear_workflow(&h.engine, false).await;
    let instance = create_document(&h.engine, "D").await;
    let transitions = h.engine.transitions();

    assert!(transitions.current_state(&instance).await.unwrap().is_none());
    assert!(transitions
        .available_transitions(&instance, Some(&Principal::new("anyone")))
        .await
        .unwrap()
        .is_empty());
    assert!(transitions
        .available_transitions(&instance, None)
        .await
        .unwrap()
        .is_empty());

    let outcome = transitions
        .do_transition(&instance.id, &w.t.id, None, "")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TransitionOutcome::Skipped {
            reason: SkipReason::NoCurrentState
        }
    );
    assert!(transitions.log_entries(&instance).await.unwrap().is_empty());
}

async fn permission_fixture(access: StaticAccessOracle) -> (Harness, Vec<Transition>, WorkflowInstance) {
    let h = Harness::new(access, EngineConfig::default());
    let w = linear_workflow(&h.engine, true).await;
    let s2 = h
        .engine
        .definitions()
        .create_state(WorkflowState::new(w.workflow.id.clone(), "S2"))
        .await
        .unwrap();
    let other = h
        .engine
        .definitions()
        .create_transition(Transition::new(w.workflow.id.clone(), "Other", w.s0.id.clone(), s2.id))
        .await
        .unwrap();
    let instance = create_document(&h.engine, "D").await;
    (h, vec![w.t, other], instance)
}

fn engine_with(h: &Harness, access: StaticAccessOracle) -> WorkflowEngine {
    WorkflowEngine::builder(h.storage.clone())
        .with_access_oracle(Arc::new(access))
        .build()
}

#[tokio::test]
async fn permission_ladder() {
    let p = Principal::new("P");
    let (h, transitions, instance) = permission_fixture(StaticAccessOracle::new()).await;
    let t = transitions[0].clone();

    let available = h
        .engine
        .transitions()
        .available_transitions(&instance, Some(&p))
        .await
        .unwrap();
    assert!(available.is_empty());

    let on_transition = StaticAccessOracle::new().with_grant(
        Permission::WorkflowTransition,
        p.clone(),
        AccessTarget::Transition(t.id.clone()),
    );
    let available = engine_with(&h, on_transition)
        .transitions()
        .available_transitions(&instance, Some(&p))
        .await
        .unwrap();
    assert_eq!(available, vec![t.clone()]);

    let on_workflow = StaticAccessOracle::new().with_grant(
        Permission::WorkflowTransition,
        p.clone(),
        AccessTarget::Workflow(instance.workflow_id.clone()),
    );
    let available = engine_with(&h, on_workflow)
        .transitions()
        .available_transitions(&instance, Some(&p))
        .await
        .unwrap();
    assert_eq!(available.len(), 2);

    let global = StaticAccessOracle::new().with_global(Permission::WorkflowTransition, p.clone());
    let available = engine_with(&h, global)
        .transitions()
        .available_transitions(&instance, Some(&p))
        .await
        .unwrap();
    assert_eq!(available.len(), 2);

    // Permissions of one principal do not leak to another
    let available = engine_with(&h, StaticAccessOracle::new().with_global(Permission::WorkflowTransition, p))
        .transitions()
        .available_transitions(&instance, Some(&Principal::new("Q")))
        .await
        .unwrap();
    assert!(available.is_empty());
}

#[tokio::test]
async fn submit_transition_validates_availability() {
    let p = Principal::new("P");
    let (h, transitions, instance) = permission_fixture(StaticAccessOracle::new()).await;

    let err = h
        .engine
        .transitions()
        .submit_transition(&instance.id, &transitions[0].id, Some(p.clone()), "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    assert!(h.storage.log_entries(&instance.id).await.unwrap().is_empty());

    // Transition of another workflow
    let foreign = linear_workflow_named(&h, "x").await;
    let err = h
        .engine
        .transitions()
        .submit_transition(&instance.id, &foreign.id, None, "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    // System callers skip the permission filter
    let outcome = h
        .engine
        .transitions()
        .submit_transition(&instance.id, &transitions[0].id, None, "system")
        .await
        .unwrap();
    assert!(outcome.is_applied());
}

async fn linear_workflow_named(h: &Harness, name: &str) -> Transition {
    let defs = h.engine.definitions();
    let wf = defs
        .create_workflow(Workflow::new(name, name).unwrap())
        .await
        .unwrap();
    let a = defs
        .create_state(WorkflowState::new(wf.id.clone(), "A").as_initial())
        .await
        .unwrap();
    let b = defs
        .create_state(WorkflowState::new(wf.id.clone(), "B"))
        .await
        .unwrap();
    defs.create_transition(Transition::new(wf.id.clone(), "AB", a.id, b.id))
        .await
        .unwrap()
}

#[tokio::test]
async fn action_failure_isolation() {
    let h = Harness::default_engine();
    let w = linear_workflow(&h.engine, true).await;
    let a1 = add_action(&h.engine, &w.s1, "A1", FAIL_ACTION).await;
    let a2 = add_action(&h.engine, &w.s1, "A2", RECORD_ACTION).await;
    let exit = add_action(&h.engine, &w.s0, "Leaving S0", RECORD_ACTION).await;
    let exit = h
        .engine
        .definitions()
        .update_action(exit.on_exit(), None)
        .await
        .unwrap();
    let instance = create_document(&h.engine, "D").await;

    let outcome = h
        .engine
        .transitions()
        .do_transition(&instance.id, &w.t.id, None, "")
        .await
        .unwrap();

    let TransitionOutcome::Applied { report, .. } = outcome else {
        panic!("transition was skipped");
    };
    assert_eq!(report.executed, vec![exit.id.clone(), a2.id.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].action_id, a1.id);

    assert_eq!(
        h.engine.transitions().current_state(&instance).await.unwrap().map(|s| s.id),
        Some(w.s1.id.clone())
    );
    assert_eq!(h.storage.log_entries(&instance.id).await.unwrap().len(), 1);

    let errors = h.error_log.entries_for(&a1.id).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].text, "ActionFailed; remote service refused the request");
    assert_eq!(h.recorder.runs(), vec!["Leaving S0".to_string(), "A2".to_string()]);
}

#[tokio::test]
async fn debug_reraise_commits_entry_and_returns_failure() {
    let h = Harness::new(
        StaticAccessOracle::new(),
        EngineConfig {
            debug_reraise_action_errors: true,
            ..EngineConfig::default()
        },
    );
    let w = linear_workflow(&h.engine, true).await;
    let a1 = add_action(&h.engine, &w.s1, "A1", FAIL_ACTION).await;
    add_action(&h.engine, &w.s1, "A2", RECORD_ACTION).await;
    let instance = create_document(&h.engine, "D").await;

    let err = h
        .engine
        .transitions()
        .do_transition(&instance.id, &w.t.id, None, "")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ActionFailed { ref action, .. } if *action == a1.id));
    assert_eq!(err.kind(), ErrorKind::ActionFailure);

    assert_eq!(h.storage.log_entries(&instance.id).await.unwrap().len(), 1);
    assert_eq!(h.error_log.entries_for(&a1.id).await.unwrap().len(), 1);
    assert!(h.recorder.runs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transition_race() {
    let h = Harness::default_engine();
    let w = linear_workflow(&h.engine, true).await;
    let instance = create_document(&h.engine, "D").await;

    let mut handles = Vec::new();
    for worker in 0..2 {
        let engine = h.engine.clone();
        let instance_id = instance.id.clone();
        let transition_id = w.t.id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .transitions()
                .do_transition(&instance_id, &transition_id, None, &format!("worker {}", worker))
                .await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        match outcome {
            TransitionOutcome::Applied { .. } => applied += 1,
            TransitionOutcome::Skipped { reason } => {
                assert!(matches!(reason, SkipReason::OriginMismatch { .. }))
            }
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(h.storage.log_entries(&instance.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn launch_twice_yields_one_instance() {
    let h = Harness::default_engine();
    let w = linear_workflow(&h.engine, true).await;
    let instance = create_document(&h.engine, "D").await;

    let again = h
        .engine
        .launcher()
        .launch_for(&w.workflow.id, &instance.document_id)
        .await
        .unwrap();
    assert!(again.is_none());
    assert_eq!(
        h.storage
            .instances_for_document(&instance.document_id)
            .await
            .unwrap()
            .len(),
        1
    );
}
