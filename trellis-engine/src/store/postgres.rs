//! Postgres repository implementations.
//!
//! Runtime-bound queries only; the table shapes live in `migrations/`.
//! Uniqueness lives in the schema (unique indexes) and surfaces here as
//! `StoreError::Conflict`, so races between concurrent publishers and
//! starters resolve the same way the in-memory stores do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use trellis_contracts::{ActionCatalogEntry, ActionStatus};
use uuid::Uuid;

use crate::model::{
    ActionExecution, ExecutionStatus, Workflow, WorkflowDefinition, WorkflowExecution,
    WorkflowStatus, DRAFT_VERSION,
};

use super::{
    ActionExecutionRepository, CatalogRepository, DefinitionRepository, ExecutionRepository,
    StoreError, StoreResult, WorkflowRepository,
};

fn db_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Database(e.to_string()),
    }
}

fn parse_workflow_status(raw: &str) -> StoreResult<WorkflowStatus> {
    WorkflowStatus::parse(raw)
        .ok_or_else(|| StoreError::Serialization(format!("unknown workflow status '{}'", raw)))
}

fn parse_execution_status(raw: &str) -> StoreResult<ExecutionStatus> {
    ExecutionStatus::parse(raw)
        .ok_or_else(|| StoreError::Serialization(format!("unknown execution status '{}'", raw)))
}

fn parse_action_status(raw: &str) -> StoreResult<ActionStatus> {
    match raw {
        "Succeeded" => Ok(ActionStatus::Succeeded),
        "Failed" => Ok(ActionStatus::Failed),
        "RetriableFailure" => Ok(ActionStatus::RetriableFailure),
        "Skipped" => Ok(ActionStatus::Skipped),
        _ => Err(StoreError::Serialization(format!(
            "unknown action status '{}'",
            raw
        ))),
    }
}

fn map_workflow(row: &PgRow) -> StoreResult<Workflow> {
    let status: String = row.try_get("status").map_err(|e| db_err(e.into()))?;
    Ok(Workflow {
        id: row.try_get("id").map_err(|e| db_err(e.into()))?,
        display_name: row.try_get("display_name").map_err(|e| db_err(e.into()))?,
        description: row.try_get("description").map_err(|e| db_err(e.into()))?,
        current_version: row
            .try_get("current_version")
            .map_err(|e| db_err(e.into()))?,
        status: parse_workflow_status(&status)?,
        is_enabled: row.try_get("is_enabled").map_err(|e| db_err(e.into()))?,
        created_at: row.try_get("created_at").map_err(|e| db_err(e.into()))?,
        updated_at: row.try_get("updated_at").map_err(|e| db_err(e.into()))?,
    })
}

fn map_definition(row: &PgRow) -> StoreResult<WorkflowDefinition> {
    Ok(WorkflowDefinition {
        workflow_id: row.try_get("workflow_id").map_err(|e| db_err(e.into()))?,
        version: row.try_get("version").map_err(|e| db_err(e.into()))?,
        definition_json: row
            .try_get("definition_json")
            .map_err(|e| db_err(e.into()))?,
        checksum: row.try_get("checksum").map_err(|e| db_err(e.into()))?,
        created_at: row.try_get("created_at").map_err(|e| db_err(e.into()))?,
    })
}

fn map_execution(row: &PgRow) -> StoreResult<WorkflowExecution> {
    let status: String = row.try_get("status").map_err(|e| db_err(e.into()))?;
    Ok(WorkflowExecution {
        id: row.try_get("id").map_err(|e| db_err(e.into()))?,
        workflow_id: row.try_get("workflow_id").map_err(|e| db_err(e.into()))?,
        workflow_version: row
            .try_get("workflow_version")
            .map_err(|e| db_err(e.into()))?,
        workflow_request_id: row
            .try_get("workflow_request_id")
            .map_err(|e| db_err(e.into()))?,
        status: parse_execution_status(&status)?,
        trigger_payload: row
            .try_get("trigger_payload_json")
            .map_err(|e| db_err(e.into()))?,
        start_time: row.try_get("start_time").map_err(|e| db_err(e.into()))?,
        end_time: row.try_get("end_time").map_err(|e| db_err(e.into()))?,
        correlation_id: row
            .try_get("correlation_id")
            .map_err(|e| db_err(e.into()))?,
        context_snapshot: row
            .try_get("context_snapshot_json")
            .map_err(|e| db_err(e.into()))?,
    })
}

fn map_attempt(row: &PgRow) -> StoreResult<ActionExecution> {
    let status: String = row.try_get("status").map_err(|e| db_err(e.into()))?;
    let parameters: Option<Value> = row
        .try_get("parameters_json")
        .map_err(|e| db_err(e.into()))?;
    Ok(ActionExecution {
        id: row.try_get("id").map_err(|e| db_err(e.into()))?,
        workflow_execution_id: row
            .try_get("workflow_execution_id")
            .map_err(|e| db_err(e.into()))?,
        node_id: row.try_get("node_id").map_err(|e| db_err(e.into()))?,
        action_type: row.try_get("action_type").map_err(|e| db_err(e.into()))?,
        status: parse_action_status(&status)?,
        attempt: row.try_get("attempt").map_err(|e| db_err(e.into()))?,
        retry_count: row.try_get("retry_count").map_err(|e| db_err(e.into()))?,
        parameters_json: parameters.map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        }),
        outputs: row.try_get("outputs_json").map_err(|e| db_err(e.into()))?,
        error: row.try_get("error_json").map_err(|e| db_err(e.into()))?,
        start_time: row.try_get("start_time").map_err(|e| db_err(e.into()))?,
        end_time: row.try_get("end_time").map_err(|e| db_err(e.into()))?,
    })
}

fn map_catalog_entry(row: &PgRow) -> StoreResult<ActionCatalogEntry> {
    Ok(ActionCatalogEntry {
        action_type: row.try_get("action_type").map_err(|e| db_err(e.into()))?,
        connector_id: row.try_get("connector_id").map_err(|e| db_err(e.into()))?,
        display_name: row.try_get("display_name").map_err(|e| db_err(e.into()))?,
        description: row.try_get("description").map_err(|e| db_err(e.into()))?,
        parameter_schema: row
            .try_get("parameter_schema")
            .map_err(|e| db_err(e.into()))?,
        output_schema: row.try_get("output_schema").map_err(|e| db_err(e.into()))?,
        is_enabled: row.try_get("is_enabled").map_err(|e| db_err(e.into()))?,
        requires_auth: row.try_get("requires_auth").map_err(|e| db_err(e.into()))?,
        created_at: row.try_get("created_at").map_err(|e| db_err(e.into()))?,
        updated_at: row.try_get("updated_at").map_err(|e| db_err(e.into()))?,
    })
}

pub struct PgWorkflowRepository {
    pool: PgPool,
}

impl PgWorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conflict_or_missing(&self, id: &str, expectation: &str) -> StoreError {
        match sqlx::query("SELECT status FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => {
                let status: String = row.try_get("status").unwrap_or_default();
                StoreError::Conflict(format!("workflow '{}' is {}, {}", id, status, expectation))
            }
            Ok(None) => StoreError::NotFound(format!("workflow '{}'", id)),
            Err(e) => db_err(e),
        }
    }
}

#[async_trait]
impl WorkflowRepository for PgWorkflowRepository {
    async fn insert(&self, workflow: &Workflow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows (id, display_name, description, current_version, status, is_enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.display_name)
        .bind(&workflow.description)
        .bind(workflow.current_version)
        .bind(workflow.status.as_str())
        .bind(workflow.is_enabled)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_meta(
        &self,
        id: &str,
        display_name: &str,
        description: Option<&str>,
    ) -> StoreResult<Workflow> {
        let row = sqlx::query(
            r#"
            UPDATE workflows
            SET display_name = $2, description = $3, updated_at = now()
            WHERE id = $1 AND status = 'Draft'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(description)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => map_workflow(&row),
            None => Err(self
                .conflict_or_missing(id, "only Draft workflows are editable")
                .await),
        }
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(map_workflow).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<Workflow>> {
        let rows = sqlx::query("SELECT * FROM workflows ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(map_workflow).collect()
    }

    async fn mark_published(&self, id: &str, version: i32, activate: bool) -> StoreResult<Workflow> {
        let row = sqlx::query(
            r#"
            UPDATE workflows
            SET status = CASE WHEN $3 THEN 'Active' ELSE status END,
                current_version = CASE WHEN $3 THEN $2 ELSE current_version END,
                updated_at = now()
            WHERE id = $1 AND status IN ('Draft', 'Active')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(version)
        .bind(activate)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => map_workflow(&row),
            None => Err(self
                .conflict_or_missing(id, "Archived workflows cannot be published")
                .await),
        }
    }

    async fn archive(&self, id: &str) -> StoreResult<Workflow> {
        let row = sqlx::query(
            r#"
            UPDATE workflows
            SET status = 'Archived', is_enabled = FALSE, updated_at = now()
            WHERE id = $1 AND status = 'Active'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => map_workflow(&row),
            None => Err(self
                .conflict_or_missing(id, "only Active workflows can be archived")
                .await),
        }
    }

    async fn reactivate(&self, id: &str) -> StoreResult<Workflow> {
        let row = sqlx::query(
            r#"
            UPDATE workflows
            SET status = 'Active', is_enabled = TRUE, updated_at = now()
            WHERE id = $1 AND status = 'Archived'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => map_workflow(&row),
            None => Err(self
                .conflict_or_missing(id, "only Archived workflows can be reactivated")
                .await),
        }
    }
}

pub struct PgDefinitionRepository {
    pool: PgPool,
}

impl PgDefinitionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DefinitionRepository for PgDefinitionRepository {
    async fn save_draft(
        &self,
        workflow_id: &str,
        definition: &Value,
        checksum: &str,
    ) -> StoreResult<WorkflowDefinition> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_definitions (workflow_id, version, definition_json, checksum)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (workflow_id, version) DO UPDATE SET
                definition_json = EXCLUDED.definition_json,
                checksum = EXCLUDED.checksum
            RETURNING *
            "#,
        )
        .bind(workflow_id)
        .bind(DRAFT_VERSION)
        .bind(definition)
        .bind(checksum)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        map_definition(&row)
    }

    async fn get(&self, workflow_id: &str, version: i32) -> StoreResult<Option<WorkflowDefinition>> {
        let row = sqlx::query(
            "SELECT * FROM workflow_definitions WHERE workflow_id = $1 AND version = $2",
        )
        .bind(workflow_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(map_definition).transpose()
    }

    async fn find_by_checksum(
        &self,
        workflow_id: &str,
        checksum: &str,
    ) -> StoreResult<Option<WorkflowDefinition>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM workflow_definitions
            WHERE workflow_id = $1 AND checksum = $2 AND version > 0
            "#,
        )
        .bind(workflow_id)
        .bind(checksum)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(map_definition).transpose()
    }

    async fn max_version(&self, workflow_id: &str) -> StoreResult<i32> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS max_version FROM workflow_definitions WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        row.try_get("max_version").map_err(|e| db_err(e.into()))
    }

    async fn insert_version(
        &self,
        workflow_id: &str,
        version: i32,
        definition: &Value,
        checksum: &str,
    ) -> StoreResult<WorkflowDefinition> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_definitions (workflow_id, version, definition_json, checksum)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(workflow_id)
        .bind(version)
        .bind(definition)
        .bind(checksum)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        map_definition(&row)
    }
}

pub struct PgExecutionRepository {
    pool: PgPool,
}

impl PgExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepository for PgExecutionRepository {
    async fn insert(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, workflow_version, workflow_request_id, status,
                 trigger_payload_json, start_time, end_time, correlation_id, context_snapshot_json)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(execution.id)
        .bind(&execution.workflow_id)
        .bind(execution.workflow_version)
        .bind(&execution.workflow_request_id)
        .bind(execution.status.as_str())
        .bind(&execution.trigger_payload)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .bind(&execution.correlation_id)
        .bind(&execution.context_snapshot)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(map_execution).transpose()
    }

    async fn find_by_request_id(
        &self,
        workflow_id: &str,
        request_id: &str,
    ) -> StoreResult<Option<WorkflowExecution>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM workflow_executions
            WHERE workflow_id = $1 AND workflow_request_id = $2
            "#,
        )
        .bind(workflow_id)
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(map_execution).transpose()
    }

    async fn mark_running(&self, id: Uuid, start_time: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = 'Running', start_time = $2
            WHERE id = $1 AND status = 'Pending'
            "#,
        )
        .bind(id)
        .bind(start_time)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "execution '{}' is not Pending",
                id
            )));
        }
        Ok(())
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        end_time: DateTime<Utc>,
        context_snapshot: &Value,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2, end_time = $3, context_snapshot_json = $4
            WHERE id = $1 AND status = 'Running'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(end_time)
        .bind(context_snapshot)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "execution '{}' is not Running",
                id
            )));
        }
        Ok(())
    }
}

pub struct PgActionExecutionRepository {
    pool: PgPool,
}

impl PgActionExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActionExecutionRepository for PgActionExecutionRepository {
    async fn append(&self, record: &ActionExecution) -> StoreResult<()> {
        // Parameters are stored as a JSON string value to keep the rendered
        // bytes exactly as recorded for replay on retries.
        let parameters = record
            .parameters_json
            .as_ref()
            .map(|s| Value::String(s.clone()));
        sqlx::query(
            r#"
            INSERT INTO action_executions
                (id, workflow_execution_id, node_id, action_type, status, attempt,
                 retry_count, parameters_json, outputs_json, error_json, start_time, end_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(record.workflow_execution_id)
        .bind(&record.node_id)
        .bind(&record.action_type)
        .bind(record.status.to_string())
        .bind(record.attempt)
        .bind(record.retry_count)
        .bind(parameters)
        .bind(&record.outputs)
        .bind(&record.error)
        .bind(record.start_time)
        .bind(record.end_time)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_for_execution(&self, execution_id: Uuid) -> StoreResult<Vec<ActionExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM action_executions
            WHERE workflow_execution_id = $1
            ORDER BY node_id, attempt
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(map_attempt).collect()
    }

    async fn find_first_attempt(
        &self,
        execution_id: Uuid,
        node_id: &str,
    ) -> StoreResult<Option<ActionExecution>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM action_executions
            WHERE workflow_execution_id = $1 AND node_id = $2 AND attempt = 1
            "#,
        )
        .bind(execution_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(map_attempt).transpose()
    }
}

pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn upsert(&self, entry: &ActionCatalogEntry) -> StoreResult<ActionCatalogEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO action_catalog
                (action_type, connector_id, display_name, description,
                 parameter_schema, output_schema, is_enabled, requires_auth)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (connector_id, action_type) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                description = EXCLUDED.description,
                parameter_schema = EXCLUDED.parameter_schema,
                output_schema = EXCLUDED.output_schema,
                is_enabled = EXCLUDED.is_enabled,
                requires_auth = EXCLUDED.requires_auth,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(&entry.action_type)
        .bind(&entry.connector_id)
        .bind(&entry.display_name)
        .bind(&entry.description)
        .bind(&entry.parameter_schema)
        .bind(&entry.output_schema)
        .bind(entry.is_enabled)
        .bind(entry.requires_auth)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        map_catalog_entry(&row)
    }

    async fn list_all(&self) -> StoreResult<Vec<ActionCatalogEntry>> {
        let rows = sqlx::query("SELECT * FROM action_catalog ORDER BY action_type")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(map_catalog_entry).collect()
    }

    async fn set_enabled(
        &self,
        connector_id: &str,
        action_type: &str,
        enabled: bool,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE action_catalog
            SET is_enabled = $3, updated_at = now()
            WHERE connector_id = $1 AND action_type = $2
            "#,
        )
        .bind(connector_id)
        .bind(action_type)
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "catalog entry '{}'",
                action_type
            )));
        }
        Ok(())
    }
}
