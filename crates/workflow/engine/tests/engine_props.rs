//! Property tests for log monotonicity and current-state derivation.

mod common;

use common::*;
use proptest::prelude::*;
use workflow_storage::{DefinitionStore, InstanceStore};
use workflow_types::{latest_entry, Transition, WorkflowState};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random transition attempts over a ring of states. Every applied entry
    /// leaves from the state the previous entry arrived at, and the derived
    /// current state always matches the last entry.
    #[test]
    fn prop_log_follows_current_state(
        state_count in 2usize..5,
        attempts in prop::collection::vec(0usize..8, 1..25),
    ) {
        runtime().block_on(async {
            let h = Harness::default_engine();
            let defs = h.engine.definitions();
            let w = linear_workflow(&h.engine, true).await;

            let mut states = vec![w.s0.clone(), w.s1.clone()];
            for i in 2..state_count {
                let state = defs
                    .create_state(WorkflowState::new(w.workflow.id.clone(), format!("S{}", i)))
                    .await
                    .unwrap();
                states.push(state);
            }
            let mut transitions = vec![w.t.clone()];
            for i in 1..states.len() {
                let next = (i + 1) % states.len();
                let t = defs
                    .create_transition(Transition::new(
                        w.workflow.id.clone(),
                        format!("T{}", i),
                        states[i].id.clone(),
                        states[next].id.clone(),
                    ))
                    .await
                    .unwrap();
                transitions.push(t);
            }

            let instance = create_document(&h.engine, "D").await;
            let engine = h.engine.transitions();
            let mut expected = states[0].id.clone();
            for attempt in &attempts {
                let t = &transitions[attempt % transitions.len()];
                let outcome = engine.do_transition(&instance.id, &t.id, None, "").await.unwrap();
                assert_eq!(outcome.is_applied(), t.origin_state_id == expected);
                if outcome.is_applied() {
                    expected = t.destination_state_id.clone();
                }
                let current = engine.current_state(&instance).await.unwrap().unwrap();
                assert_eq!(current.id, expected);
            }

            let log = h.storage.log_entries(&instance.id).await.unwrap();
            let mut state = h.storage.initial_state(&w.workflow.id).await.unwrap().unwrap().id;
            for pair in log.windows(2) {
                assert!(pair[0].timestamp <= pair[1].timestamp);
            }
            for entry in &log {
                let t = h.storage.get_transition(&entry.transition_id).await.unwrap().unwrap();
                assert_eq!(t.origin_state_id, state);
                state = t.destination_state_id;
            }
            assert_eq!(state, expected);
            assert_eq!(latest_entry(&log), log.last());
        });
    }
}
