//! Launcher: binds documents to the workflows attached to their type
//!
//! Launching is idempotent. The store enforces one instance per
//! `(document, workflow)` pair; a conflicting launch means another worker
//! got there first and is skipped.

use crate::collaborators::{DocumentSource, Indexer, TaskScheduler};
use crate::tasks::{TaskRequest, LAUNCH_ALL_TASK};
use crate::{EngineError, EngineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use workflow_storage::{StorageError, WorkflowStorage};
use workflow_types::{DocumentId, DocumentRef, DocumentTypeId, WorkflowError, WorkflowId, WorkflowInstance};

/// Totals from a launch over many documents
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSummary {
    pub documents: usize,
    pub launched: usize,
    pub already_launched: usize,
}

/// Entry points the document subsystem calls on document lifecycle events
#[async_trait]
pub trait DocumentHooks: Send + Sync {
    async fn on_document_created(&self, document: &DocumentRef) -> EngineResult<Vec<WorkflowInstance>>;

    /// Launch the workflows of the new type. Instances of workflows that are
    /// no longer attached stay alive.
    async fn on_document_type_changed(
        &self,
        document: &DocumentRef,
        previous_type: &DocumentTypeId,
    ) -> EngineResult<Vec<WorkflowInstance>>;

    /// Remove the document's instances and their logs
    async fn on_document_deleted(&self, document_id: &DocumentId) -> EngineResult<usize>;
}

/// Creates workflow instances for documents
#[derive(Clone)]
pub struct Launcher {
    storage: Arc<dyn WorkflowStorage>,
    indexer: Arc<dyn Indexer>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
}

impl Launcher {
    pub fn new(storage: Arc<dyn WorkflowStorage>, indexer: Arc<dyn Indexer>) -> Self {
        Self {
            storage,
            indexer,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Launch one workflow for a document.
    ///
    /// Returns `None` when the document already has an instance of it.
    pub async fn launch_for(
        &self,
        workflow_id: &WorkflowId,
        document_id: &DocumentId,
    ) -> EngineResult<Option<WorkflowInstance>> {
        match self.storage.create_instance(workflow_id, document_id).await {
            Ok(instance) => {
                tracing::info!(
                    workflow = %workflow_id,
                    document = %document_id,
                    instance = %instance.id,
                    "Workflow launched"
                );
                if let Err(e) = self.indexer.index_document(document_id).await {
                    tracing::warn!(document = %document_id, error = %e, "Failed to signal indexer");
                }
                Ok(Some(instance))
            }
            Err(StorageError::Conflict(_)) => {
                tracing::info!(
                    workflow = %workflow_id,
                    document = %document_id,
                    "Workflow already launched for document"
                );
                Ok(None)
            }
            Err(StorageError::NotFound(_)) => Err(WorkflowError::WorkflowNotFound(workflow_id.clone()).into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Launch every workflow attached to the document's type
    pub async fn launch_all_for(&self, document: &DocumentRef) -> EngineResult<Vec<WorkflowInstance>> {
        let mut launched = Vec::new();
        for workflow in self
            .storage
            .workflows_for_document_type(&document.document_type)
            .await?
        {
            if let Some(instance) = self.launch_for(&workflow.id, &document.id).await? {
                launched.push(instance);
            }
        }
        Ok(launched)
    }

    /// Launch every attached workflow for every known document
    pub async fn launch_all_documents(&self, source: &dyn DocumentSource) -> EngineResult<LaunchSummary> {
        let documents = source.documents().await.map_err(EngineError::Collaborator)?;
        let mut summary = LaunchSummary {
            documents: documents.len(),
            ..LaunchSummary::default()
        };

        for document in &documents {
            let attached = self
                .storage
                .workflows_for_document_type(&document.document_type)
                .await?;
            let launched = self.launch_all_for(document).await?.len();
            summary.launched += launched;
            summary.already_launched += attached.len().saturating_sub(launched);
        }

        tracing::info!(
            documents = summary.documents,
            launched = summary.launched,
            already_launched = summary.already_launched,
            "Launch over all documents finished"
        );
        Ok(summary)
    }

    /// Queue [`launch_all_documents`](Self::launch_all_documents) as a background task
    pub async fn schedule_launch_all(&self) -> EngineResult<bool> {
        match &self.scheduler {
            Some(scheduler) => {
                scheduler.schedule(TaskRequest::new(LAUNCH_ALL_TASK)).await?;
                Ok(true)
            }
            None => {
                tracing::warn!("No task scheduler configured; launch-all not scheduled");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl DocumentHooks for Launcher {
    async fn on_document_created(&self, document: &DocumentRef) -> EngineResult<Vec<WorkflowInstance>> {
        self.launch_all_for(document).await
    }

    async fn on_document_type_changed(
        &self,
        document: &DocumentRef,
        previous_type: &DocumentTypeId,
    ) -> EngineResult<Vec<WorkflowInstance>> {
        tracing::debug!(
            document = %document.id,
            from = %previous_type,
            to = %document.document_type,
            "Document type changed"
        );
        self.launch_all_for(document).await
    }

    async fn on_document_deleted(&self, document_id: &DocumentId) -> EngineResult<usize> {
        let removed = self.storage.delete_instances_for_document(document_id).await?;
        tracing::info!(document = %document_id, instances = removed, "Document instances removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryTaskScheduler, RecordingIndexer, StaticDocumentSource};
    use workflow_storage::memory::InMemoryWorkflowStorage;
    use workflow_storage::{DefinitionStore, InstanceStore};
    use workflow_types::Workflow;

    async fn setup() -> (Arc<InMemoryWorkflowStorage>, Arc<RecordingIndexer>, Launcher, Workflow) {
        let storage = Arc::new(InMemoryWorkflowStorage::new());
        let wf = Workflow::new("review", "Review")
            .unwrap()
            .with_document_type(DocumentTypeId::new("invoice"));
        storage.insert_workflow(wf.clone()).await.unwrap();
        let indexer = Arc::new(RecordingIndexer::new());
        let launcher = Launcher::new(storage.clone(), indexer.clone());
        (storage, indexer, launcher, wf)
    }

    #[tokio::test]
    async fn test_launch_is_idempotent() {
        let (storage, indexer, launcher, wf) = setup().await;
        let doc = DocumentRef::new("d1", "invoice");

        assert_eq!(launcher.on_document_created(&doc).await.unwrap().len(), 1);
        assert!(launcher.launch_all_for(&doc).await.unwrap().is_empty());
        assert!(storage.instance_for(&doc.id, &wf.id).await.unwrap().is_some());
        assert_eq!(indexer.indexed(), vec![doc.id.clone()]);
    }

    #[tokio::test]
    async fn test_type_change_keeps_existing_instances() {
        let (storage, _, launcher, wf) = setup().await;
        let other = Workflow::new("filing", "Filing")
            .unwrap()
            .with_document_type(DocumentTypeId::new("contract"));
        storage.insert_workflow(other.clone()).await.unwrap();

        let doc = DocumentRef::new("d1", "invoice");
        launcher.on_document_created(&doc).await.unwrap();

        let changed = DocumentRef::new("d1", "contract");
        let launched = launcher
            .on_document_type_changed(&changed, &DocumentTypeId::new("invoice"))
            .await
            .unwrap();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].workflow_id, other.id);

        let instances = storage.instances_for_document(&doc.id).await.unwrap();
        assert_eq!(instances.len(), 2);
        assert!(instances.iter().any(|i| i.workflow_id == wf.id));

        assert_eq!(launcher.on_document_deleted(&doc.id).await.unwrap(), 2);
        assert!(storage.instances_for_document(&doc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_launch_all_documents_and_schedule() {
        let (_, _, launcher, _) = setup().await;
        let source = StaticDocumentSource::new(vec![
            DocumentRef::new("d1", "invoice"),
            DocumentRef::new("d2", "invoice"),
            DocumentRef::new("d3", "memo"),
        ]);

        let summary = launcher.launch_all_documents(&source).await.unwrap();
        assert_eq!(summary.documents, 3);
        assert_eq!(summary.launched, 2);
        let again = launcher.launch_all_documents(&source).await.unwrap();
        assert_eq!(again.launched, 0);
        assert_eq!(again.already_launched, 2);

        assert!(!launcher.schedule_launch_all().await.unwrap());
        let scheduler = Arc::new(InMemoryTaskScheduler::new());
        let launcher = launcher.with_scheduler(scheduler.clone());
        assert!(launcher.schedule_launch_all().await.unwrap());
        assert_eq!(scheduler.drain()[0].name, LAUNCH_ALL_TASK);
    }
}
