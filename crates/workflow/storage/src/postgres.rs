//! PostgreSQL adapter for workflow storage.
//!
//! This adapter is the transactional source-of-truth backend. Instance
//! transactions lock the instance row with `SELECT ... FOR UPDATE`, so
//! concurrent transitions of one instance serialize across processes.

use crate::traits::{DefinitionStore, InstanceStore, InstanceTransaction};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction as SqlTransaction};
use std::collections::{BTreeSet, HashMap};
use workflow_types::{
    ActionPath, ActionWhen, DocumentId, DocumentTypeId, InstanceId, LogEntry, LogEntryId,
    NewLogEntry, Principal, StateAction, StateActionId, StateId, Transition, TransitionId, Workflow,
    WorkflowId, WorkflowInstance, WorkflowState,
};

/// PostgreSQL-backed workflow storage.
#[derive(Clone)]
pub struct PostgresWorkflowStorage {
    pool: PgPool,
}

impl PostgresWorkflowStorage {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS docflow_workflows (
                id TEXT PRIMARY KEY,
                internal_name TEXT NOT NULL UNIQUE,
                label TEXT NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS docflow_workflow_document_types (
                workflow_id TEXT NOT NULL REFERENCES docflow_workflows(id) ON DELETE CASCADE,
                document_type_id TEXT NOT NULL,
                PRIMARY KEY (workflow_id, document_type_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS docflow_states (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL REFERENCES docflow_workflows(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                initial BOOLEAN NOT NULL DEFAULT FALSE,
                completion SMALLINT NOT NULL DEFAULT 0,
                UNIQUE (workflow_id, label)
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS docflow_states_one_initial
                ON docflow_states (workflow_id) WHERE initial
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS docflow_state_actions (
                id TEXT PRIMARY KEY,
                state_id TEXT NOT NULL REFERENCES docflow_states(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                action_when TEXT NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                action_path TEXT NOT NULL,
                action_data TEXT NOT NULL,
                UNIQUE (state_id, label)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS docflow_transitions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL REFERENCES docflow_workflows(id) ON DELETE CASCADE,
                label TEXT NOT NULL,
                origin_state_id TEXT NOT NULL REFERENCES docflow_states(id) ON DELETE CASCADE,
                destination_state_id TEXT NOT NULL REFERENCES docflow_states(id) ON DELETE CASCADE,
                UNIQUE (workflow_id, label, origin_state_id, destination_state_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS docflow_transition_triggers (
                transition_id TEXT NOT NULL REFERENCES docflow_transitions(id) ON DELETE CASCADE,
                event_name TEXT NOT NULL,
                PRIMARY KEY (transition_id, event_name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS docflow_instances (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL REFERENCES docflow_workflows(id) ON DELETE CASCADE,
                document_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (document_id, workflow_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS docflow_log_entries (
                id TEXT PRIMARY KEY,
                instance_id TEXT NOT NULL REFERENCES docflow_instances(id) ON DELETE CASCADE,
                sequence BIGSERIAL NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                transition_id TEXT NOT NULL REFERENCES docflow_transitions(id) ON DELETE CASCADE,
                actor TEXT,
                comment TEXT NOT NULL DEFAULT ''
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS docflow_log_entries_by_instance
                ON docflow_log_entries (instance_id, created_at, sequence)
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    async fn begin(&self) -> StorageResult<SqlTransaction<'static, Postgres>> {
        self.pool.begin().await.map_err(backend)
    }

    async fn document_types_by_workflow(
        &self,
    ) -> StorageResult<HashMap<String, BTreeSet<DocumentTypeId>>> {
        let rows = sqlx::query(
            "SELECT workflow_id, document_type_id FROM docflow_workflow_document_types",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        let mut map: HashMap<String, BTreeSet<DocumentTypeId>> = HashMap::new();
        for row in rows {
            let workflow_id: String = row.try_get("workflow_id").map_err(backend)?;
            let document_type: String = row.try_get("document_type_id").map_err(backend)?;
            map.entry(workflow_id)
                .or_default()
                .insert(DocumentTypeId::new(document_type));
        }
        Ok(map)
    }

    async fn workflows_where(
        &self,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> StorageResult<Vec<Workflow>> {
        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;
        let mut document_types = self.document_types_by_workflow().await?;
        rows.into_iter()
            .map(|row| {
                let mut workflow = workflow_row(&row)?;
                workflow.document_types = document_types
                    .remove(workflow.id.as_str())
                    .unwrap_or_default();
                Ok(workflow)
            })
            .collect()
    }

    async fn transitions_where(
        &self,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> StorageResult<Vec<Transition>> {
        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;
        let mut transitions = rows
            .iter()
            .map(transition_row)
            .collect::<StorageResult<Vec<_>>>()?;
        if transitions.is_empty() {
            return Ok(transitions);
        }
        let ids: Vec<String> = transitions.iter().map(|t| t.id.0.clone()).collect();
        let trigger_rows = sqlx::query(
            "SELECT transition_id, event_name FROM docflow_transition_triggers WHERE transition_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        let mut triggers: HashMap<String, BTreeSet<String>> = HashMap::new();
        for row in trigger_rows {
            let transition_id: String = row.try_get("transition_id").map_err(backend)?;
            let event_name: String = row.try_get("event_name").map_err(backend)?;
            triggers.entry(transition_id).or_default().insert(event_name);
        }
        for transition in &mut transitions {
            transition.trigger_events = triggers.remove(transition.id.as_str()).unwrap_or_default();
        }
        Ok(transitions)
    }

    async fn write_state(&self, state: WorkflowState, insert: bool) -> StorageResult<()> {
        let mut tx = self.begin().await?;
        if state.initial {
            sqlx::query(
                "UPDATE docflow_states SET initial = FALSE WHERE workflow_id = $1 AND id <> $2 AND initial",
            )
            .bind(state.workflow_id.0.clone())
            .bind(state.id.0.clone())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        let sql = if insert {
            r#"
            INSERT INTO docflow_states (id, workflow_id, label, initial, completion)
            VALUES ($1, $2, $3, $4, $5)
            "#
        } else {
            r#"
            UPDATE docflow_states
               SET label = $3, initial = $4, completion = $5
             WHERE id = $1 AND workflow_id = $2
            "#
        };
        let result = sqlx::query(sql)
            .bind(state.id.0.clone())
            .bind(state.workflow_id.0.clone())
            .bind(state.label.clone())
            .bind(state.initial)
            .bind(i16::from(state.completion))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_conflict)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("state {}", state.id)));
        }
        tx.commit().await.map_err(backend)
    }

    async fn write_action(&self, action: StateAction, insert: bool) -> StorageResult<()> {
        let sql = if insert {
            r#"
            INSERT INTO docflow_state_actions
                (id, state_id, label, action_when, enabled, action_path, action_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#
        } else {
            r#"
            UPDATE docflow_state_actions
               SET state_id = $2, label = $3, action_when = $4, enabled = $5,
                   action_path = $6, action_data = $7
             WHERE id = $1
            "#
        };
        let result = sqlx::query(sql)
            .bind(action.id.0.clone())
            .bind(action.state_id.0.clone())
            .bind(action.label.clone())
            .bind(action.when.as_str())
            .bind(action.enabled)
            .bind(action.action_path.0.clone())
            .bind(action.action_data.clone())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_conflict)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("action {}", action.id)));
        }
        Ok(())
    }

    async fn write_transition(&self, transition: Transition, insert: bool) -> StorageResult<()> {
        let mut tx = self.begin().await?;

        let endpoint_rows = sqlx::query("SELECT id, workflow_id FROM docflow_states WHERE id = ANY($1)")
            .bind(vec![
                transition.origin_state_id.0.clone(),
                transition.destination_state_id.0.clone(),
            ])
            .fetch_all(&mut *tx)
            .await
            .map_err(backend)?;
        let owners: HashMap<String, String> = endpoint_rows
            .iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("workflow_id")?)))
            .collect::<Result<_, sqlx::Error>>()
            .map_err(backend)?;
        for endpoint in [&transition.origin_state_id, &transition.destination_state_id] {
            match owners.get(endpoint.as_str()) {
                None => return Err(StorageError::NotFound(format!("state {}", endpoint))),
                Some(owner) if owner != transition.workflow_id.as_str() => {
                    return Err(StorageError::InvariantViolation(format!(
                        "state {} does not belong to workflow {}",
                        endpoint, transition.workflow_id
                    )))
                }
                Some(_) => {}
            }
        }

        let sql = if insert {
            r#"
            INSERT INTO docflow_transitions
                (id, workflow_id, label, origin_state_id, destination_state_id)
            VALUES ($1, $2, $3, $4, $5)
            "#
        } else {
            r#"
            UPDATE docflow_transitions
               SET label = $3, origin_state_id = $4, destination_state_id = $5
             WHERE id = $1 AND workflow_id = $2
            "#
        };
        let result = sqlx::query(sql)
            .bind(transition.id.0.clone())
            .bind(transition.workflow_id.0.clone())
            .bind(transition.label.clone())
            .bind(transition.origin_state_id.0.clone())
            .bind(transition.destination_state_id.0.clone())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_conflict)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("transition {}", transition.id)));
        }

        sqlx::query("DELETE FROM docflow_transition_triggers WHERE transition_id = $1")
            .bind(transition.id.0.clone())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        for event_name in &transition.trigger_events {
            sqlx::query(
                "INSERT INTO docflow_transition_triggers (transition_id, event_name) VALUES ($1, $2)",
            )
            .bind(transition.id.0.clone())
            .bind(event_name.clone())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_conflict)?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn write_workflow(&self, workflow: Workflow, insert: bool) -> StorageResult<()> {
        let mut tx = self.begin().await?;
        let sql = if insert {
            "INSERT INTO docflow_workflows (id, internal_name, label) VALUES ($1, $2, $3)"
        } else {
            "UPDATE docflow_workflows SET internal_name = $2, label = $3 WHERE id = $1"
        };
        let result = sqlx::query(sql)
            .bind(workflow.id.0.clone())
            .bind(workflow.internal_name.clone())
            .bind(workflow.label.clone())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_conflict)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("workflow {}", workflow.id)));
        }
        sqlx::query("DELETE FROM docflow_workflow_document_types WHERE workflow_id = $1")
            .bind(workflow.id.0.clone())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        for document_type in &workflow.document_types {
            sqlx::query(
                "INSERT INTO docflow_workflow_document_types (workflow_id, document_type_id) VALUES ($1, $2)",
            )
            .bind(workflow.id.0.clone())
            .bind(document_type.0.clone())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_conflict)?;
        }
        tx.commit().await.map_err(backend)
    }
}

#[async_trait]
impl DefinitionStore for PostgresWorkflowStorage {
    async fn insert_workflow(&self, workflow: Workflow) -> StorageResult<()> {
        self.write_workflow(workflow, true).await
    }

    async fn update_workflow(&self, workflow: Workflow) -> StorageResult<()> {
        self.write_workflow(workflow, false).await
    }

    async fn delete_workflow(&self, id: &WorkflowId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM docflow_workflows WHERE id = $1")
            .bind(id.0.clone())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("workflow {}", id)));
        }
        Ok(())
    }

    async fn get_workflow(&self, id: &WorkflowId) -> StorageResult<Option<Workflow>> {
        let query = sqlx::query("SELECT id, internal_name, label FROM docflow_workflows WHERE id = $1")
            .bind(id.0.clone());
        Ok(self.workflows_where(query).await?.into_iter().next())
    }

    async fn get_workflow_by_internal_name(
        &self,
        internal_name: &str,
    ) -> StorageResult<Option<Workflow>> {
        let query = sqlx::query(
            "SELECT id, internal_name, label FROM docflow_workflows WHERE internal_name = $1",
        )
        .bind(internal_name.to_string());
        Ok(self.workflows_where(query).await?.into_iter().next())
    }

    async fn list_workflows(&self) -> StorageResult<Vec<Workflow>> {
        let query = sqlx::query("SELECT id, internal_name, label FROM docflow_workflows ORDER BY label, id");
        self.workflows_where(query).await
    }

    async fn workflows_for_document_type(
        &self,
        document_type: &DocumentTypeId,
    ) -> StorageResult<Vec<Workflow>> {
        let query = sqlx::query(
            r#"
            SELECT w.id, w.internal_name, w.label
              FROM docflow_workflows w
              JOIN docflow_workflow_document_types d ON d.workflow_id = w.id
             WHERE d.document_type_id = $1
             ORDER BY w.label, w.id
            "#,
        )
        .bind(document_type.0.clone());
        self.workflows_where(query).await
    }

    async fn attach_document_type(
        &self,
        workflow_id: &WorkflowId,
        document_type: &DocumentTypeId,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO docflow_workflow_document_types (workflow_id, document_type_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(workflow_id.0.clone())
        .bind(document_type.0.clone())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(())
    }

    async fn detach_document_type(
        &self,
        workflow_id: &WorkflowId,
        document_type: &DocumentTypeId,
    ) -> StorageResult<()> {
        sqlx::query(
            "DELETE FROM docflow_workflow_document_types WHERE workflow_id = $1 AND document_type_id = $2",
        )
        .bind(workflow_id.0.clone())
        .bind(document_type.0.clone())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn insert_state(&self, state: WorkflowState) -> StorageResult<()> {
        self.write_state(state, true).await
    }

    async fn update_state(&self, state: WorkflowState) -> StorageResult<()> {
        self.write_state(state, false).await
    }

    async fn delete_state(&self, id: &StateId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM docflow_states WHERE id = $1")
            .bind(id.0.clone())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("state {}", id)));
        }
        Ok(())
    }

    async fn get_state(&self, id: &StateId) -> StorageResult<Option<WorkflowState>> {
        let row = sqlx::query(
            "SELECT id, workflow_id, label, initial, completion FROM docflow_states WHERE id = $1",
        )
        .bind(id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(state_row).transpose()
    }

    async fn list_states(&self, workflow_id: &WorkflowId) -> StorageResult<Vec<WorkflowState>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, label, initial, completion
              FROM docflow_states
             WHERE workflow_id = $1
             ORDER BY label, id
            "#,
        )
        .bind(workflow_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(state_row).collect()
    }

    async fn initial_state(&self, workflow_id: &WorkflowId) -> StorageResult<Option<WorkflowState>> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, label, initial, completion
              FROM docflow_states
             WHERE workflow_id = $1 AND initial
            "#,
        )
        .bind(workflow_id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(state_row).transpose()
    }

    async fn insert_action(&self, action: StateAction) -> StorageResult<()> {
        self.write_action(action, true).await
    }

    async fn update_action(&self, action: StateAction) -> StorageResult<()> {
        self.write_action(action, false).await
    }

    async fn delete_action(&self, id: &StateActionId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM docflow_state_actions WHERE id = $1")
            .bind(id.0.clone())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("action {}", id)));
        }
        Ok(())
    }

    async fn get_action(&self, id: &StateActionId) -> StorageResult<Option<StateAction>> {
        let row = sqlx::query(
            r#"
            SELECT id, state_id, label, action_when, enabled, action_path, action_data
              FROM docflow_state_actions
             WHERE id = $1
            "#,
        )
        .bind(id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(action_row).transpose()
    }

    async fn list_actions(&self, state_id: &StateId) -> StorageResult<Vec<StateAction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, state_id, label, action_when, enabled, action_path, action_data
              FROM docflow_state_actions
             WHERE state_id = $1
             ORDER BY label, id
            "#,
        )
        .bind(state_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(action_row).collect()
    }

    async fn insert_transition(&self, transition: Transition) -> StorageResult<()> {
        self.write_transition(transition, true).await
    }

    async fn update_transition(&self, transition: Transition) -> StorageResult<()> {
        self.write_transition(transition, false).await
    }

    async fn delete_transition(&self, id: &TransitionId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM docflow_transitions WHERE id = $1")
            .bind(id.0.clone())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("transition {}", id)));
        }
        Ok(())
    }

    async fn get_transition(&self, id: &TransitionId) -> StorageResult<Option<Transition>> {
        let query = sqlx::query(
            r#"
            SELECT id, workflow_id, label, origin_state_id, destination_state_id
              FROM docflow_transitions
             WHERE id = $1
            "#,
        )
        .bind(id.0.clone());
        Ok(self.transitions_where(query).await?.into_iter().next())
    }

    async fn list_transitions(&self, workflow_id: &WorkflowId) -> StorageResult<Vec<Transition>> {
        let query = sqlx::query(
            r#"
            SELECT id, workflow_id, label, origin_state_id, destination_state_id
              FROM docflow_transitions
             WHERE workflow_id = $1
             ORDER BY label, id
            "#,
        )
        .bind(workflow_id.0.clone());
        self.transitions_where(query).await
    }

    async fn transitions_from(&self, state_id: &StateId) -> StorageResult<Vec<Transition>> {
        let query = sqlx::query(
            r#"
            SELECT id, workflow_id, label, origin_state_id, destination_state_id
              FROM docflow_transitions
             WHERE origin_state_id = $1
             ORDER BY label, id
            "#,
        )
        .bind(state_id.0.clone());
        self.transitions_where(query).await
    }

    async fn transitions_triggered_by(&self, event_name: &str) -> StorageResult<Vec<Transition>> {
        let query = sqlx::query(
            r#"
            SELECT t.id, t.workflow_id, t.label, t.origin_state_id, t.destination_state_id
              FROM docflow_transitions t
              JOIN docflow_transition_triggers g ON g.transition_id = t.id
             WHERE g.event_name = $1
             ORDER BY t.label, t.id
            "#,
        )
        .bind(event_name.to_string());
        self.transitions_where(query).await
    }
}

#[async_trait]
impl InstanceStore for PostgresWorkflowStorage {
    async fn create_instance(
        &self,
        workflow_id: &WorkflowId,
        document_id: &DocumentId,
    ) -> StorageResult<WorkflowInstance> {
        let instance = WorkflowInstance::new(workflow_id.clone(), document_id.clone());
        sqlx::query(
            r#"
            INSERT INTO docflow_instances (id, workflow_id, document_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(instance.id.0.clone())
        .bind(instance.workflow_id.0.clone())
        .bind(instance.document_id.0.clone())
        .bind(instance.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_conflict)?;
        Ok(instance)
    }

    async fn get_instance(&self, id: &InstanceId) -> StorageResult<Option<WorkflowInstance>> {
        let row = sqlx::query(
            "SELECT id, workflow_id, document_id, created_at FROM docflow_instances WHERE id = $1",
        )
        .bind(id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(instance_row).transpose()
    }

    async fn instance_for(
        &self,
        document_id: &DocumentId,
        workflow_id: &WorkflowId,
    ) -> StorageResult<Option<WorkflowInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, document_id, created_at
              FROM docflow_instances
             WHERE document_id = $1 AND workflow_id = $2
            "#,
        )
        .bind(document_id.0.clone())
        .bind(workflow_id.0.clone())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(instance_row).transpose()
    }

    async fn instances_for_document(
        &self,
        document_id: &DocumentId,
    ) -> StorageResult<Vec<WorkflowInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, document_id, created_at
              FROM docflow_instances
             WHERE document_id = $1
             ORDER BY created_at, id
            "#,
        )
        .bind(document_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(instance_row).collect()
    }

    async fn instances_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> StorageResult<Vec<WorkflowInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, document_id, created_at
              FROM docflow_instances
             WHERE workflow_id = $1
             ORDER BY created_at, id
            "#,
        )
        .bind(workflow_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(instance_row).collect()
    }

    async fn delete_instances_for_document(&self, document_id: &DocumentId) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM docflow_instances WHERE document_id = $1")
            .bind(document_id.0.clone())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        usize::try_from(result.rows_affected())
            .map_err(|_| StorageError::Backend("row count overflow".to_string()))
    }

    async fn log_entries(&self, instance_id: &InstanceId) -> StorageResult<Vec<LogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, instance_id, sequence, created_at, transition_id, actor, comment
              FROM docflow_log_entries
             WHERE instance_id = $1
             ORDER BY created_at, sequence
            "#,
        )
        .bind(instance_id.0.clone())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(log_entry_row).collect()
    }

    async fn last_log_entry(&self, instance_id: &InstanceId) -> StorageResult<Option<LogEntry>> {
        let row = sqlx::query(LAST_ENTRY_SQL)
            .bind(instance_id.0.clone())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(log_entry_row).transpose()
    }

    async fn begin_transition(
        &self,
        instance_id: &InstanceId,
    ) -> StorageResult<Box<dyn InstanceTransaction>> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, document_id, created_at
              FROM docflow_instances
             WHERE id = $1
             FOR UPDATE
            "#,
        )
        .bind(instance_id.0.clone())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;
        let instance = row
            .as_ref()
            .map(instance_row)
            .transpose()?
            .ok_or_else(|| StorageError::NotFound(format!("instance {}", instance_id)))?;
        Ok(Box::new(PgInstanceTransaction { tx, instance }))
    }
}

const LAST_ENTRY_SQL: &str = r#"
    SELECT id, instance_id, sequence, created_at, transition_id, actor, comment
      FROM docflow_log_entries
     WHERE instance_id = $1
     ORDER BY created_at DESC, sequence DESC
     LIMIT 1
"#;

struct PgInstanceTransaction {
    tx: SqlTransaction<'static, Postgres>,
    instance: WorkflowInstance,
}

#[async_trait]
impl InstanceTransaction for PgInstanceTransaction {
    fn instance(&self) -> &WorkflowInstance {
        &self.instance
    }

    async fn last_log_entry(&mut self) -> StorageResult<Option<LogEntry>> {
        let row = sqlx::query(LAST_ENTRY_SQL)
            .bind(self.instance.id.0.clone())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        row.as_ref().map(log_entry_row).transpose()
    }

    async fn append_log_entry(&mut self, entry: NewLogEntry) -> StorageResult<LogEntry> {
        let now = Utc::now();
        let timestamp = match self.last_log_entry().await? {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let id = LogEntryId::generate();
        let row = sqlx::query(
            r#"
            INSERT INTO docflow_log_entries (id, instance_id, created_at, transition_id, actor, comment)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING sequence
            "#,
        )
        .bind(id.0.clone())
        .bind(self.instance.id.0.clone())
        .bind(timestamp)
        .bind(entry.transition_id.0.clone())
        .bind(entry.actor.as_ref().map(|p| p.0.clone()))
        .bind(entry.comment.clone())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_conflict)?;
        let sequence: i64 = row.try_get("sequence").map_err(backend)?;
        Ok(LogEntry {
            id,
            instance_id: self.instance.id.clone(),
            sequence,
            timestamp,
            transition_id: entry.transition_id,
            actor: entry.actor,
            comment: entry.comment,
        })
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        this.tx.commit().await.map_err(backend)
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        this.tx.rollback().await.map_err(backend)
    }
}

// ── Row mapping ──────────────────────────────────────────────────────

fn workflow_row(row: &PgRow) -> StorageResult<Workflow> {
    Ok(Workflow {
        id: WorkflowId(row.try_get("id").map_err(backend)?),
        internal_name: row.try_get("internal_name").map_err(backend)?,
        label: row.try_get("label").map_err(backend)?,
        document_types: BTreeSet::new(),
    })
}

fn state_row(row: &PgRow) -> StorageResult<WorkflowState> {
    let completion: i16 = row.try_get("completion").map_err(backend)?;
    Ok(WorkflowState {
        id: StateId(row.try_get("id").map_err(backend)?),
        workflow_id: WorkflowId(row.try_get("workflow_id").map_err(backend)?),
        label: row.try_get("label").map_err(backend)?,
        initial: row.try_get("initial").map_err(backend)?,
        completion: u8::try_from(completion)
            .map_err(|_| StorageError::Serialization(format!("completion {completion} out of range")))?,
    })
}

fn action_row(row: &PgRow) -> StorageResult<StateAction> {
    let when: String = row.try_get("action_when").map_err(backend)?;
    Ok(StateAction {
        id: StateActionId(row.try_get("id").map_err(backend)?),
        state_id: StateId(row.try_get("state_id").map_err(backend)?),
        label: row.try_get("label").map_err(backend)?,
        when: ActionWhen::parse(&when)
            .ok_or_else(|| StorageError::Serialization(format!("unknown action timing `{when}`")))?,
        enabled: row.try_get("enabled").map_err(backend)?,
        action_path: ActionPath(row.try_get("action_path").map_err(backend)?),
        action_data: row.try_get("action_data").map_err(backend)?,
    })
}

fn transition_row(row: &PgRow) -> StorageResult<Transition> {
    Ok(Transition {
        id: TransitionId(row.try_get("id").map_err(backend)?),
        workflow_id: WorkflowId(row.try_get("workflow_id").map_err(backend)?),
        label: row.try_get("label").map_err(backend)?,
        origin_state_id: StateId(row.try_get("origin_state_id").map_err(backend)?),
        destination_state_id: StateId(row.try_get("destination_state_id").map_err(backend)?),
        trigger_events: BTreeSet::new(),
    })
}

fn instance_row(row: &PgRow) -> StorageResult<WorkflowInstance> {
    Ok(WorkflowInstance {
        id: InstanceId(row.try_get("id").map_err(backend)?),
        workflow_id: WorkflowId(row.try_get("workflow_id").map_err(backend)?),
        document_id: DocumentId(row.try_get("document_id").map_err(backend)?),
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

fn log_entry_row(row: &PgRow) -> StorageResult<LogEntry> {
    let actor: Option<String> = row.try_get("actor").map_err(backend)?;
    Ok(LogEntry {
        id: LogEntryId(row.try_get("id").map_err(backend)?),
        instance_id: InstanceId(row.try_get("instance_id").map_err(backend)?),
        sequence: row.try_get("sequence").map_err(backend)?,
        timestamp: row.try_get("created_at").map_err(backend)?,
        transition_id: TransitionId(row.try_get("transition_id").map_err(backend)?),
        actor: actor.map(Principal),
        comment: row.try_get("comment").map_err(backend)?,
    })
}

fn backend(err: sqlx::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn map_sqlx_conflict(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23505") => return StorageError::Conflict(db_err.message().to_string()),
            Some("23503") => return StorageError::NotFound(db_err.message().to_string()),
            _ => {}
        }
    }
    StorageError::Backend(err.to_string())
}
