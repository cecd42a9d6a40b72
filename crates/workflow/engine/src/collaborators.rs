//! Interfaces to the subsystems the engine depends on but does not own.
//!
//! Every collaborator reports failures as `anyhow::Error`; the engine wraps
//! them in [`EngineError::Collaborator`](crate::EngineError::Collaborator).
//! In-memory implementations are provided for tests and tooling.

use crate::tasks::{TaskRequest, INDEX_DOCUMENT_TASK};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use workflow_types::{AccessTarget, DocumentId, DocumentRef, Permission, Principal, StateActionId};

// ── Access control ───────────────────────────────────────────────────

/// Answers permission questions for principals
#[async_trait]
pub trait AccessOracle: Send + Sync {
    /// Whether the principal holds the permission on every object
    async fn has_global_permission(
        &self,
        permission: Permission,
        principal: &Principal,
    ) -> anyhow::Result<bool>;

    /// Whether an access grant on `target` gives the principal the permission
    async fn grants(
        &self,
        permission: Permission,
        principal: &Principal,
        target: &AccessTarget,
    ) -> anyhow::Result<bool>;

    /// Subset of `targets` on which the principal holds the permission
    async fn filter(
        &self,
        permission: Permission,
        principal: &Principal,
        targets: Vec<AccessTarget>,
    ) -> anyhow::Result<Vec<AccessTarget>> {
        let mut allowed = Vec::with_capacity(targets.len());
        for target in targets {
            if self.grants(permission, principal, &target).await? {
                allowed.push(target);
            }
        }
        Ok(allowed)
    }
}

/// Fixed table of permissions
#[derive(Debug, Default, Clone)]
pub struct StaticAccessOracle {
    global: HashSet<(Permission, Principal)>,
    grants: HashSet<(Permission, Principal, AccessTarget)>,
}

impl StaticAccessOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, permission: Permission, principal: Principal) -> Self {
        self.global.insert((permission, principal));
        self
    }

    pub fn with_grant(mut self, permission: Permission, principal: Principal, target: AccessTarget) -> Self {
        self.grants.insert((permission, principal, target));
        self
    }
}

#[async_trait]
impl AccessOracle for StaticAccessOracle {
    async fn has_global_permission(
        &self,
        permission: Permission,
        principal: &Principal,
    ) -> anyhow::Result<bool> {
        Ok(self.global.contains(&(permission, principal.clone())))
    }

    async fn grants(
        &self,
        permission: Permission,
        principal: &Principal,
        target: &AccessTarget,
    ) -> anyhow::Result<bool> {
        Ok(self
            .grants
            .contains(&(permission, principal.clone(), target.clone())))
    }
}

// ── Indexing ─────────────────────────────────────────────────────────

/// Receives the signal that a document's workflow state changed
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index_document(&self, document_id: &DocumentId) -> anyhow::Result<()>;
}

/// Indexer that ignores every signal
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndexer;

#[async_trait]
impl Indexer for NoopIndexer {
    async fn index_document(&self, _document_id: &DocumentId) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Indexer that remembers which documents it was asked to index
#[derive(Debug, Default)]
pub struct RecordingIndexer {
    indexed: Mutex<Vec<DocumentId>>,
}

impl RecordingIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn indexed(&self) -> Vec<DocumentId> {
        self.indexed.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Indexer for RecordingIndexer {
    async fn index_document(&self, document_id: &DocumentId) -> anyhow::Result<()> {
        self.indexed
            .lock()
            .map_err(|_| anyhow!("indexer lock poisoned"))?
            .push(document_id.clone());
        Ok(())
    }
}

/// Indexer that defers the work to the task queue
pub struct ScheduledIndexer {
    scheduler: Arc<dyn TaskScheduler>,
}

impl ScheduledIndexer {
    pub fn new(scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Indexer for ScheduledIndexer {
    async fn index_document(&self, document_id: &DocumentId) -> anyhow::Result<()> {
        self.scheduler
            .schedule(TaskRequest::new(INDEX_DOCUMENT_TASK).with_arg("document_id", document_id.as_str()))
            .await
    }
}

// ── Error log ────────────────────────────────────────────────────────

/// A failure recorded against a state action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub action_id: StateActionId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Stores action failures for administrators to inspect
#[async_trait]
pub trait ErrorLog: Send + Sync {
    async fn record(&self, action_id: &StateActionId, text: &str) -> anyhow::Result<()>;

    async fn entries_for(&self, action_id: &StateActionId) -> anyhow::Result<Vec<ErrorLogEntry>>;
}

#[derive(Debug, Default)]
pub struct InMemoryErrorLog {
    entries: Mutex<Vec<ErrorLogEntry>>,
}

impl InMemoryErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|v| v.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ErrorLog for InMemoryErrorLog {
    async fn record(&self, action_id: &StateActionId, text: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("error log lock poisoned"))?
            .push(ErrorLogEntry {
                action_id: action_id.clone(),
                text: text.to_string(),
                timestamp: Utc::now(),
            });
        Ok(())
    }

    async fn entries_for(&self, action_id: &StateActionId) -> anyhow::Result<Vec<ErrorLogEntry>> {
        Ok(self
            .entries
            .lock()
            .map_err(|_| anyhow!("error log lock poisoned"))?
            .iter()
            .filter(|e| &e.action_id == action_id)
            .cloned()
            .collect())
    }
}

// ── Task scheduling ──────────────────────────────────────────────────

/// At-least-once background task queue
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn schedule(&self, task: TaskRequest) -> anyhow::Result<()>;
}

/// Scheduler that queues tasks in memory until drained
#[derive(Debug, Default)]
pub struct InMemoryTaskScheduler {
    queued: Mutex<Vec<TaskRequest>>,
}

impl InMemoryTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<TaskRequest> {
        self.queued.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Take every queued task, oldest first
    pub fn drain(&self) -> Vec<TaskRequest> {
        self.queued
            .lock()
            .map(|mut v| std::mem::take(&mut *v))
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskScheduler for InMemoryTaskScheduler {
    async fn schedule(&self, task: TaskRequest) -> anyhow::Result<()> {
        tracing::debug!(task = %task.name, queue = ?task.queue, "Task scheduled");
        self.queued
            .lock()
            .map_err(|_| anyhow!("task queue lock poisoned"))?
            .push(task);
        Ok(())
    }
}

// ── Document enumeration ─────────────────────────────────────────────

/// Lists the documents known to the document subsystem
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn documents(&self) -> anyhow::Result<Vec<DocumentRef>>;
}

#[derive(Debug, Default, Clone)]
pub struct StaticDocumentSource {
    documents: Vec<DocumentRef>,
}

impl StaticDocumentSource {
    pub fn new(documents: Vec<DocumentRef>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentSource for StaticDocumentSource {
    async fn documents(&self) -> anyhow::Result<Vec<DocumentRef>> {
        Ok(self.documents.clone())
    }
}
