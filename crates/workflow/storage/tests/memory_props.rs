//! Property tests for the in-memory backend's structural invariants.

use proptest::prelude::*;
use std::collections::HashSet;
use workflow_storage::memory::InMemoryWorkflowStorage;
use workflow_storage::{DefinitionStore, InstanceStore};
use workflow_types::{DocumentId, NewLogEntry, Transition, Workflow, WorkflowState};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_at_most_one_initial_state(
        state_count in 1usize..8,
        flips in prop::collection::vec(0usize..8, 0..20),
    ) {
        runtime().block_on(async {
            let store = InMemoryWorkflowStorage::new();
            let wf = Workflow::new("wf", "Workflow").unwrap();
            store.insert_workflow(wf.clone()).await.unwrap();
            let mut states = Vec::new();
            for i in 0..state_count {
                let state = WorkflowState::new(wf.id.clone(), format!("S{}", i));
                store.insert_state(state.clone()).await.unwrap();
                states.push(state);
            }

            let mut last_flipped = None;
            for flip in &flips {
                let idx = flip % state_count;
                let mut state = store.get_state(&states[idx].id).await.unwrap().unwrap();
                state.initial = true;
                store.update_state(state).await.unwrap();
                last_flipped = Some(states[idx].id.clone());
            }

            let initial: Vec<_> = store
                .list_states(&wf.id)
                .await
                .unwrap()
                .into_iter()
                .filter(|s| s.initial)
                .collect();
            assert!(initial.len() <= 1);
            match last_flipped {
                Some(id) => assert_eq!(initial[0].id, id),
                None => assert!(initial.is_empty()),
            }
        });
    }

    #[test]
    fn prop_one_instance_per_document_and_workflow(
        launches in prop::collection::vec((0usize..4, 0usize..3), 0..30),
    ) {
        runtime().block_on(async {
            let store = InMemoryWorkflowStorage::new();
            let mut workflows = Vec::new();
            for i in 0..3 {
                let wf = Workflow::new(format!("wf{}", i), format!("Workflow {}", i)).unwrap();
                store.insert_workflow(wf.clone()).await.unwrap();
                workflows.push(wf);
            }

            let mut expected = HashSet::new();
            for (doc, wf) in &launches {
                let document = DocumentId::new(format!("doc-{}", doc));
                let created = store.create_instance(&workflows[*wf].id, &document).await.is_ok();
                assert_eq!(created, expected.insert((*doc, *wf)));
            }

            let mut total = 0;
            for doc in 0..4 {
                total += store
                    .instances_for_document(&DocumentId::new(format!("doc-{}", doc)))
                    .await
                    .unwrap()
                    .len();
            }
            assert_eq!(total, expected.len());
        });
    }

    #[test]
    fn prop_log_is_ordered_and_last_entry_is_latest(appends in 1usize..12) {
        runtime().block_on(async {
            let store = InMemoryWorkflowStorage::new();
            let wf = Workflow::new("wf", "Workflow").unwrap();
            store.insert_workflow(wf.clone()).await.unwrap();
            let a = WorkflowState::new(wf.id.clone(), "A").as_initial();
            let b = WorkflowState::new(wf.id.clone(), "B");
            store.insert_state(a.clone()).await.unwrap();
            store.insert_state(b.clone()).await.unwrap();
            let forward = Transition::new(wf.id.clone(), "Forward", a.id.clone(), b.id.clone());
            store.insert_transition(forward.clone()).await.unwrap();
            let instance = store
                .create_instance(&wf.id, &DocumentId::new("doc"))
                .await
                .unwrap();

            let mut last = None;
            for i in 0..appends {
                let mut tx = store.begin_transition(&instance.id).await.unwrap();
                let entry = tx
                    .append_log_entry(NewLogEntry::new(forward.id.clone()).with_comment(format!("#{}", i)))
                    .await
                    .unwrap();
                tx.commit().await.unwrap();
                last = Some(entry);
            }

            let entries = store.log_entries(&instance.id).await.unwrap();
            assert_eq!(entries.len(), appends);
            for pair in entries.windows(2) {
                assert!(pair[0].ordering_key() < pair[1].ordering_key());
            }
            assert_eq!(store.last_log_entry(&instance.id).await.unwrap(), last);
        });
    }
}
