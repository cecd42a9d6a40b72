//! CLI command implementations

pub mod actions;
pub mod documents;
pub mod workflow;

use crate::config::{DocflowConfig, StorageConfig};
use crate::error::CliResult;
use std::sync::Arc;
use workflow_engine::WorkflowEngine;
use workflow_storage::memory::InMemoryWorkflowStorage;
use workflow_storage::postgres::PostgresWorkflowStorage;
use workflow_storage::WorkflowStorage;

/// Open the configured storage backend
pub async fn open_storage(config: &StorageConfig) -> CliResult<Arc<dyn WorkflowStorage>> {
    match config {
        StorageConfig::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(InMemoryWorkflowStorage::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            tracing::info!(max_connections, "Connecting to PostgreSQL storage");
            let storage =
                PostgresWorkflowStorage::connect_with_options(url, *max_connections, *connect_timeout_secs)
                    .await?;
            Ok(Arc::new(storage))
        }
    }
}

/// Assemble an engine over the configured storage
pub async fn build_engine(config: &DocflowConfig) -> CliResult<WorkflowEngine> {
    let storage = open_storage(&config.storage).await?;
    Ok(WorkflowEngine::builder(storage)
        .with_config(config.engine.clone())
        .build())
}
