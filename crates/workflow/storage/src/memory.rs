//! In-memory reference implementation of the workflow storage traits.
//!
//! This adapter is deterministic and test-friendly. Production deployments
//! should use a transactional backend (e.g. PostgreSQL) for source-of-truth
//! data.

use crate::traits::{DefinitionStore, InstanceStore, InstanceTransaction};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, RwLock};
use workflow_types::{
    latest_entry, DocumentId, DocumentTypeId, InstanceId, LogEntry, LogEntryId, NewLogEntry,
    StateAction, StateActionId, StateId, Transition, TransitionId, Workflow, WorkflowId,
    WorkflowInstance, WorkflowState,
};

type LogTable = HashMap<InstanceId, Vec<LogEntry>>;

#[derive(Default)]
struct Tables {
    workflows: HashMap<WorkflowId, Workflow>,
    states: HashMap<StateId, WorkflowState>,
    actions: HashMap<StateActionId, StateAction>,
    transitions: HashMap<TransitionId, Transition>,
    instances: HashMap<InstanceId, WorkflowInstance>,
}

impl Tables {
    fn check_workflow_unique(&self, workflow: &Workflow) -> StorageResult<()> {
        for other in self.workflows.values().filter(|w| w.id != workflow.id) {
            if other.internal_name == workflow.internal_name {
                return Err(StorageError::Conflict(format!(
                    "workflow internal name '{}' already in use",
                    workflow.internal_name
                )));
            }
            if other.label == workflow.label {
                return Err(StorageError::Conflict(format!(
                    "workflow label '{}' already in use",
                    workflow.label
                )));
            }
        }
        Ok(())
    }

    fn write_state(&mut self, state: WorkflowState) -> StorageResult<()> {
        if !self.workflows.contains_key(&state.workflow_id) {
            return Err(StorageError::NotFound(format!("workflow {}", state.workflow_id)));
        }
        if self
            .states
            .values()
            .any(|s| s.id != state.id && s.workflow_id == state.workflow_id && s.label == state.label)
        {
            return Err(StorageError::Conflict(format!(
                "state label '{}' already used in workflow {}",
                state.label, state.workflow_id
            )));
        }
        if state.initial {
            for sibling in self
                .states
                .values_mut()
                .filter(|s| s.workflow_id == state.workflow_id && s.id != state.id)
            {
                sibling.initial = false;
            }
        }
        self.states.insert(state.id.clone(), state);
        Ok(())
    }

    fn write_action(&mut self, action: StateAction) -> StorageResult<()> {
        if !self.states.contains_key(&action.state_id) {
            return Err(StorageError::NotFound(format!("state {}", action.state_id)));
        }
        if self
            .actions
            .values()
            .any(|a| a.id != action.id && a.state_id == action.state_id && a.label == action.label)
        {
            return Err(StorageError::Conflict(format!(
                "action label '{}' already used on state {}",
                action.label, action.state_id
            )));
        }
        self.actions.insert(action.id.clone(), action);
        Ok(())
    }

    fn write_transition(&mut self, transition: Transition) -> StorageResult<()> {
        if !self.workflows.contains_key(&transition.workflow_id) {
            return Err(StorageError::NotFound(format!(
                "workflow {}",
                transition.workflow_id
            )));
        }
        for endpoint in [&transition.origin_state_id, &transition.destination_state_id] {
            let state = self
                .states
                .get(endpoint)
                .ok_or_else(|| StorageError::NotFound(format!("state {}", endpoint)))?;
            if state.workflow_id != transition.workflow_id {
                return Err(StorageError::InvariantViolation(format!(
                    "state {} does not belong to workflow {}",
                    endpoint, transition.workflow_id
                )));
            }
        }
        if self.transitions.values().any(|t| {
            t.id != transition.id
                && t.workflow_id == transition.workflow_id
                && t.label == transition.label
                && t.origin_state_id == transition.origin_state_id
                && t.destination_state_id == transition.destination_state_id
        }) {
            return Err(StorageError::Conflict(format!(
                "transition '{}' already exists between these states",
                transition.label
            )));
        }
        self.transitions.insert(transition.id.clone(), transition);
        Ok(())
    }

    /// Remove transitions and return their ids so log entries can follow.
    fn remove_transitions<F>(&mut self, predicate: F) -> HashSet<TransitionId>
    where
        F: Fn(&Transition) -> bool,
    {
        let removed: HashSet<TransitionId> = self
            .transitions
            .values()
            .filter(|t| predicate(t))
            .map(|t| t.id.clone())
            .collect();
        self.transitions.retain(|id, _| !removed.contains(id));
        removed
    }
}

/// In-memory workflow storage adapter.
pub struct InMemoryWorkflowStorage {
    tables: Arc<RwLock<Tables>>,
    logs: Arc<RwLock<LogTable>>,
    instance_locks: Mutex<HashMap<InstanceId, Arc<tokio::sync::Mutex<()>>>>,
    sequence: Arc<AtomicI64>,
}

impl InMemoryWorkflowStorage {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            logs: Arc::new(RwLock::new(HashMap::new())),
            instance_locks: Mutex::new(HashMap::new()),
            sequence: Arc::new(AtomicI64::new(0)),
        }
    }

    fn instance_lock(&self, id: &InstanceId) -> StorageResult<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .instance_locks
            .lock()
            .map_err(|_| StorageError::Backend("instance lock table poisoned".to_string()))?;
        Ok(locks.entry(id.clone()).or_default().clone())
    }

    async fn purge_logs(&self, instances: &HashSet<InstanceId>, transitions: &HashSet<TransitionId>) {
        if instances.is_empty() && transitions.is_empty() {
            return;
        }
        let mut logs = self.logs.write().await;
        logs.retain(|id, _| !instances.contains(id));
        for entries in logs.values_mut() {
            entries.retain(|e| !transitions.contains(&e.transition_id));
        }
    }

    fn forget_locks(&self, instances: &HashSet<InstanceId>) {
        match self.instance_locks.lock() {
            Ok(mut locks) => locks.retain(|id, _| !instances.contains(id)),
            Err(_) => tracing::warn!(
                instances = instances.len(),
                "Instance lock table poisoned; locks for deleted instances were kept"
            ),
        }
    }
}

impl Default for InMemoryWorkflowStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_label<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> (&str, &str),
{
    items.sort_by(|a, b| key(a).cmp(&key(b)));
    items
}

#[async_trait]
impl DefinitionStore for InMemoryWorkflowStorage {
    async fn insert_workflow(&self, workflow: Workflow) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.workflows.contains_key(&workflow.id) {
            return Err(StorageError::Conflict(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }
        tables.check_workflow_unique(&workflow)?;
        tables.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn update_workflow(&self, workflow: Workflow) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.workflows.contains_key(&workflow.id) {
            return Err(StorageError::NotFound(format!("workflow {}", workflow.id)));
        }
        tables.check_workflow_unique(&workflow)?;
        tables.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn delete_workflow(&self, id: &WorkflowId) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.workflows.remove(id).is_none() {
            return Err(StorageError::NotFound(format!("workflow {}", id)));
        }
        let states: HashSet<StateId> = tables
            .states
            .values()
            .filter(|s| &s.workflow_id == id)
            .map(|s| s.id.clone())
            .collect();
        tables.states.retain(|sid, _| !states.contains(sid));
        tables.actions.retain(|_, a| !states.contains(&a.state_id));
        let transitions = tables.remove_transitions(|t| &t.workflow_id == id);
        let instances: HashSet<InstanceId> = tables
            .instances
            .values()
            .filter(|i| &i.workflow_id == id)
            .map(|i| i.id.clone())
            .collect();
        tables.instances.retain(|iid, _| !instances.contains(iid));
        self.purge_logs(&instances, &transitions).await;
        drop(tables);
        self.forget_locks(&instances);
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<Workflow>> {
        Ok(self.tables.read().await.workflows.get(id).cloned())
    }

    async fn get_workflow_by_internal_name(
        &self,
        internal_name: &str,
    ) -> StorageResult<Option<Workflow>> {
        Ok(self
            .tables
            .read()
            .await
            .workflows
            .values()
            .find(|w| w.internal_name == internal_name)
            .cloned())
    }

    async fn list_workflows(&self) -> StorageResult<Vec<Workflow>> {
        let items = self.tables.read().await.workflows.values().cloned().collect();
        Ok(sorted_by_label(items, |w: &Workflow| (w.label.as_str(), w.id.as_str())))
    }

    async fn workflows_for_document_type(
        &self,
        document_type: &DocumentTypeId,
    ) -> StorageResult<Vec<Workflow>> {
        let items = self
            .tables
            .read()
            .await
            .workflows
            .values()
            .filter(|w| w.applies_to(document_type))
            .cloned()
            .collect();
        Ok(sorted_by_label(items, |w: &Workflow| (w.label.as_str(), w.id.as_str())))
    }

    async fn attach_document_type(
        &self,
        workflow_id: &WorkflowId,
        document_type: &DocumentTypeId,
    ) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let workflow = tables
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| StorageError::NotFound(format!("workflow {}", workflow_id)))?;
        workflow.document_types.insert(document_type.clone());
        Ok(())
    }

    async fn detach_document_type(
        &self,
        workflow_id: &WorkflowId,
        document_type: &DocumentTypeId,
    ) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let workflow = tables
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| StorageError::NotFound(format!("workflow {}", workflow_id)))?;
        workflow.document_types.remove(document_type);
        Ok(())
    }

    async fn insert_state(&self, state: WorkflowState) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.states.contains_key(&state.id) {
            return Err(StorageError::Conflict(format!("state {} already exists", state.id)));
        }
        tables.write_state(state)
    }

    async fn update_state(&self, state: WorkflowState) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        match tables.states.get(&state.id) {
            None => return Err(StorageError::NotFound(format!("state {}", state.id))),
            Some(existing) if existing.workflow_id != state.workflow_id => {
                return Err(StorageError::InvalidInput(format!(
                    "state {} cannot move to another workflow",
                    state.id
                )))
            }
            Some(_) => {}
        }
        tables.write_state(state)
    }

    async fn delete_state(&self, id: &StateId) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.states.remove(id).is_none() {
            return Err(StorageError::NotFound(format!("state {}", id)));
        }
        tables.actions.retain(|_, a| &a.state_id != id);
        let transitions =
            tables.remove_transitions(|t| &t.origin_state_id == id || &t.destination_state_id == id);
        self.purge_logs(&HashSet::new(), &transitions).await;
        Ok(())
    }

    async fn get_state(&self, id: &StateId) -> StorageResult<Option<WorkflowState>> {
        Ok(self.tables.read().await.states.get(id).cloned())
    }

    async fn list_states(&self, workflow_id: &WorkflowId) -> StorageResult<Vec<WorkflowState>> {
        let items = self
            .tables
            .read()
            .await
            .states
            .values()
            .filter(|s| &s.workflow_id == workflow_id)
            .cloned()
            .collect();
        Ok(sorted_by_label(items, |s: &WorkflowState| (s.label.as_str(), s.id.as_str())))
    }

    async fn initial_state(&self, workflow_id: &WorkflowId) -> StorageResult<Option<WorkflowState>> {
        Ok(self
            .tables
            .read()
            .await
            .states
            .values()
            .find(|s| &s.workflow_id == workflow_id && s.initial)
            .cloned())
    }

    async fn insert_action(&self, action: StateAction) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.actions.contains_key(&action.id) {
            return Err(StorageError::Conflict(format!("action {} already exists", action.id)));
        }
        tables.write_action(action)
    }

    async fn update_action(&self, action: StateAction) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.actions.contains_key(&action.id) {
            return Err(StorageError::NotFound(format!("action {}", action.id)));
        }
        tables.write_action(action)
    }

    async fn delete_action(&self, id: &StateActionId) -> StorageResult<()> {
        match self.tables.write().await.actions.remove(id) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(format!("action {}", id))),
        }
    }

    async fn get_action(&self, id: &StateActionId) -> StorageResult<Option<StateAction>> {
        Ok(self.tables.read().await.actions.get(id).cloned())
    }

    async fn list_actions(&self, state_id: &StateId) -> StorageResult<Vec<StateAction>> {
        let items = self
            .tables
            .read()
            .await
            .actions
            .values()
            .filter(|a| &a.state_id == state_id)
            .cloned()
            .collect();
        Ok(sorted_by_label(items, |a: &StateAction| (a.label.as_str(), a.id.as_str())))
    }

    async fn insert_transition(&self, transition: Transition) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if tables.transitions.contains_key(&transition.id) {
            return Err(StorageError::Conflict(format!(
                "transition {} already exists",
                transition.id
            )));
        }
        tables.write_transition(transition)
    }

    async fn update_transition(&self, transition: Transition) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.transitions.contains_key(&transition.id) {
            return Err(StorageError::NotFound(format!("transition {}", transition.id)));
        }
        tables.write_transition(transition)
    }

    async fn delete_transition(&self, id: &TransitionId) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let removed = tables.remove_transitions(|t| &t.id == id);
        if removed.is_empty() {
            return Err(StorageError::NotFound(format!("transition {}", id)));
        }
        self.purge_logs(&HashSet::new(), &removed).await;
        Ok(())
    }

    async fn get_transition(&self, id: &TransitionId) -> StorageResult<Option<Transition>> {
        Ok(self.tables.read().await.transitions.get(id).cloned())
    }

    async fn list_transitions(&self, workflow_id: &WorkflowId) -> StorageResult<Vec<Transition>> {
        let items = self
            .tables
            .read()
            .await
            .transitions
            .values()
            .filter(|t| &t.workflow_id == workflow_id)
            .cloned()
            .collect();
        Ok(sorted_by_label(items, Transition::sort_key))
    }

    async fn transitions_from(&self, state_id: &StateId) -> StorageResult<Vec<Transition>> {
        let items = self
            .tables
            .read()
            .await
            .transitions
            .values()
            .filter(|t| &t.origin_state_id == state_id)
            .cloned()
            .collect();
        Ok(sorted_by_label(items, Transition::sort_key))
    }

    async fn transitions_triggered_by(&self, event_name: &str) -> StorageResult<Vec<Transition>> {
        let items = self
            .tables
            .read()
            .await
            .transitions
            .values()
            .filter(|t| t.is_triggered_by(event_name))
            .cloned()
            .collect();
        Ok(sorted_by_label(items, Transition::sort_key))
    }
}

#[async_trait]
impl InstanceStore for InMemoryWorkflowStorage {
    async fn create_instance(
        &self,
        workflow_id: &WorkflowId,
        document_id: &DocumentId,
    ) -> StorageResult<WorkflowInstance> {
        let mut tables = self.tables.write().await;
        if !tables.workflows.contains_key(workflow_id) {
            return Err(StorageError::NotFound(format!("workflow {}", workflow_id)));
        }
        if tables
            .instances
            .values()
            .any(|i| &i.workflow_id == workflow_id && &i.document_id == document_id)
        {
            return Err(StorageError::Conflict(format!(
                "document {} already has an instance of workflow {}",
                document_id, workflow_id
            )));
        }
        let instance = WorkflowInstance::new(workflow_id.clone(), document_id.clone());
        tables.instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn get_instance(&self, id: &InstanceId) -> StorageResult<Option<WorkflowInstance>> {
        Ok(self.tables.read().await.instances.get(id).cloned())
    }

    async fn instance_for(
        &self,
        document_id: &DocumentId,
        workflow_id: &WorkflowId,
    ) -> StorageResult<Option<WorkflowInstance>> {
        Ok(self
            .tables
            .read()
            .await
            .instances
            .values()
            .find(|i| &i.document_id == document_id && &i.workflow_id == workflow_id)
            .cloned())
    }

    async fn instances_for_document(
        &self,
        document_id: &DocumentId,
    ) -> StorageResult<Vec<WorkflowInstance>> {
        let mut items: Vec<WorkflowInstance> = self
            .tables
            .read()
            .await
            .instances
            .values()
            .filter(|i| &i.document_id == document_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(items)
    }

    async fn instances_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> StorageResult<Vec<WorkflowInstance>> {
        let mut items: Vec<WorkflowInstance> = self
            .tables
            .read()
            .await
            .instances
            .values()
            .filter(|i| &i.workflow_id == workflow_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(items)
    }

    async fn delete_instances_for_document(&self, document_id: &DocumentId) -> StorageResult<usize> {
        let mut tables = self.tables.write().await;
        let removed: HashSet<InstanceId> = tables
            .instances
            .values()
            .filter(|i| &i.document_id == document_id)
            .map(|i| i.id.clone())
            .collect();
        tables.instances.retain(|id, _| !removed.contains(id));
        self.purge_logs(&removed, &HashSet::new()).await;
        drop(tables);
        self.forget_locks(&removed);
        Ok(removed.len())
    }

    async fn log_entries(&self, instance_id: &InstanceId) -> StorageResult<Vec<LogEntry>> {
        let mut entries = self
            .logs
            .read()
            .await
            .get(instance_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(LogEntry::ordering_key);
        Ok(entries)
    }

    async fn last_log_entry(&self, instance_id: &InstanceId) -> StorageResult<Option<LogEntry>> {
        let logs = self.logs.read().await;
        Ok(logs
            .get(instance_id)
            .and_then(|entries| latest_entry(entries))
            .cloned())
    }

    async fn begin_transition(
        &self,
        instance_id: &InstanceId,
    ) -> StorageResult<Box<dyn InstanceTransaction>> {
        if self.get_instance(instance_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("instance {}", instance_id)));
        }
        let guard = self.instance_lock(instance_id)?.lock_owned().await;
        // The instance may have been deleted while we waited for the lock.
        let instance = self
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("instance {}", instance_id)))?;
        Ok(Box::new(MemoryInstanceTransaction {
            _guard: guard,
            instance,
            tables: Arc::clone(&self.tables),
            logs: Arc::clone(&self.logs),
            sequence: Arc::clone(&self.sequence),
            pending: Vec::new(),
        }))
    }
}

struct MemoryInstanceTransaction {
    _guard: OwnedMutexGuard<()>,
    instance: WorkflowInstance,
    tables: Arc<RwLock<Tables>>,
    logs: Arc<RwLock<LogTable>>,
    sequence: Arc<AtomicI64>,
    pending: Vec<LogEntry>,
}

#[async_trait]
impl InstanceTransaction for MemoryInstanceTransaction {
    fn instance(&self) -> &WorkflowInstance {
        &self.instance
    }

    async fn last_log_entry(&mut self) -> StorageResult<Option<LogEntry>> {
        if let Some(entry) = self.pending.last() {
            return Ok(Some(entry.clone()));
        }
        let logs = self.logs.read().await;
        Ok(logs
            .get(&self.instance.id)
            .and_then(|entries| latest_entry(entries))
            .cloned())
    }

    async fn append_log_entry(&mut self, entry: NewLogEntry) -> StorageResult<LogEntry> {
        let now = Utc::now();
        let timestamp = match self.last_log_entry().await? {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let record = LogEntry {
            id: LogEntryId::generate(),
            instance_id: self.instance.id.clone(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp,
            transition_id: entry.transition_id,
            actor: entry.actor,
            comment: entry.comment,
        };
        self.pending.push(record.clone());
        Ok(record)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        if this.pending.is_empty() {
            return Ok(());
        }
        // Deletes hold the table lock while purging logs, so holding it here
        // keeps a committed entry from outliving its instance.
        let tables = this.tables.read().await;
        if !tables.instances.contains_key(&this.instance.id) {
            tracing::warn!(
                instance = %this.instance.id,
                entries = this.pending.len(),
                "Instance deleted during transition; log entries discarded"
            );
            return Err(StorageError::NotFound(format!("instance {}", this.instance.id)));
        }
        let mut logs = this.logs.write().await;
        logs.entry(this.instance.id.clone())
            .or_default()
            .extend(this.pending);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
