//! In-memory repository implementations.
//!
//! Used by the test suites and by embedders that do not need durability.
//! Semantics mirror the Postgres implementations, including uniqueness and
//! precondition checks.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use trellis_contracts::ActionCatalogEntry;
use uuid::Uuid;

use crate::model::{
    ActionExecution, ExecutionStatus, Workflow, WorkflowDefinition, WorkflowExecution,
    WorkflowStatus, DRAFT_VERSION,
};

use super::{
    ActionExecutionRepository, CatalogRepository, DefinitionRepository, ExecutionRepository,
    StoreError, StoreResult, WorkflowRepository,
};

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    rows: Mutex<HashMap<String, Workflow>>,
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn insert(&self, workflow: &Workflow) -> StoreResult<()> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&workflow.id) {
            return Err(StoreError::Conflict(format!(
                "workflow '{}' already exists",
                workflow.id
            )));
        }
        rows.insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn update_meta(
        &self,
        id: &str,
        display_name: &str,
        description: Option<&str>,
    ) -> StoreResult<Workflow> {
        let mut rows = self.rows.lock();
        let workflow = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("workflow '{}'", id)))?;
        if workflow.status != WorkflowStatus::Draft {
            return Err(StoreError::Conflict(format!(
                "workflow '{}' is {}, only Draft workflows are editable",
                id, workflow.status
            )));
        }
        workflow.display_name = display_name.to_string();
        workflow.description = description.map(str::to_string);
        workflow.updated_at = Utc::now();
        Ok(workflow.clone())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Workflow>> {
        Ok(self.rows.lock().get(id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Workflow>> {
        let mut all: Vec<_> = self.rows.lock().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn mark_published(&self, id: &str, version: i32, activate: bool) -> StoreResult<Workflow> {
        let mut rows = self.rows.lock();
        let workflow = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("workflow '{}'", id)))?;
        if workflow.status == WorkflowStatus::Archived {
            return Err(StoreError::Conflict(format!(
                "workflow '{}' is Archived and cannot be published",
                id
            )));
        }
        if activate {
            workflow.status = WorkflowStatus::Active;
            workflow.current_version = Some(version);
        }
        workflow.updated_at = Utc::now();
        Ok(workflow.clone())
    }

    async fn archive(&self, id: &str) -> StoreResult<Workflow> {
        let mut rows = self.rows.lock();
        let workflow = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("workflow '{}'", id)))?;
        if workflow.status != WorkflowStatus::Active {
            return Err(StoreError::Conflict(format!(
                "workflow '{}' is {}, only Active workflows can be archived",
                id, workflow.status
            )));
        }
        workflow.status = WorkflowStatus::Archived;
        workflow.is_enabled = false;
        workflow.updated_at = Utc::now();
        Ok(workflow.clone())
    }

    async fn reactivate(&self, id: &str) -> StoreResult<Workflow> {
        let mut rows = self.rows.lock();
        let workflow = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("workflow '{}'", id)))?;
        if workflow.status != WorkflowStatus::Archived {
            return Err(StoreError::Conflict(format!(
                "workflow '{}' is {}, only Archived workflows can be reactivated",
                id, workflow.status
            )));
        }
        workflow.status = WorkflowStatus::Active;
        workflow.is_enabled = true;
        workflow.updated_at = Utc::now();
        Ok(workflow.clone())
    }
}

#[derive(Default)]
pub struct InMemoryDefinitionRepository {
    rows: Mutex<HashMap<(String, i32), WorkflowDefinition>>,
}

#[async_trait]
impl DefinitionRepository for InMemoryDefinitionRepository {
    async fn save_draft(
        &self,
        workflow_id: &str,
        definition: &Value,
        checksum: &str,
    ) -> StoreResult<WorkflowDefinition> {
        let row = WorkflowDefinition {
            workflow_id: workflow_id.to_string(),
            version: DRAFT_VERSION,
            definition_json: definition.clone(),
            checksum: checksum.to_string(),
            created_at: Utc::now(),
        };
        self.rows
            .lock()
            .insert((workflow_id.to_string(), DRAFT_VERSION), row.clone());
        Ok(row)
    }

    async fn get(&self, workflow_id: &str, version: i32) -> StoreResult<Option<WorkflowDefinition>> {
        Ok(self
            .rows
            .lock()
            .get(&(workflow_id.to_string(), version))
            .cloned())
    }

    async fn find_by_checksum(
        &self,
        workflow_id: &str,
        checksum: &str,
    ) -> StoreResult<Option<WorkflowDefinition>> {
        Ok(self
            .rows
            .lock()
            .values()
            .find(|d| d.workflow_id == workflow_id && d.version > 0 && d.checksum == checksum)
            .cloned())
    }

    async fn max_version(&self, workflow_id: &str) -> StoreResult<i32> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|d| d.workflow_id == workflow_id)
            .map(|d| d.version)
            .max()
            .unwrap_or(0))
    }

    async fn insert_version(
        &self,
        workflow_id: &str,
        version: i32,
        definition: &Value,
        checksum: &str,
    ) -> StoreResult<WorkflowDefinition> {
        let mut rows = self.rows.lock();
        if rows.contains_key(&(workflow_id.to_string(), version)) {
            return Err(StoreError::Conflict(format!(
                "definition version {} of '{}' already exists",
                version, workflow_id
            )));
        }
        if rows
            .values()
            .any(|d| d.workflow_id == workflow_id && d.version > 0 && d.checksum == checksum)
        {
            return Err(StoreError::Conflict(format!(
                "definition with checksum '{}' already published for '{}'",
                checksum, workflow_id
            )));
        }
        let row = WorkflowDefinition {
            workflow_id: workflow_id.to_string(),
            version,
            definition_json: definition.clone(),
            checksum: checksum.to_string(),
            created_at: Utc::now(),
        };
        rows.insert((workflow_id.to_string(), version), row.clone());
        Ok(row)
    }
}

#[derive(Default)]
pub struct InMemoryExecutionRepository {
    rows: Mutex<HashMap<Uuid, WorkflowExecution>>,
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn insert(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        let mut rows = self.rows.lock();
        if rows.values().any(|e| {
            e.workflow_id == execution.workflow_id
                && e.workflow_request_id == execution.workflow_request_id
        }) {
            return Err(StoreError::Conflict(format!(
                "execution with request id '{}' already exists for '{}'",
                execution.workflow_request_id, execution.workflow_id
            )));
        }
        rows.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        Ok(self.rows.lock().get(&id).cloned())
    }

    async fn find_by_request_id(
        &self,
        workflow_id: &str,
        request_id: &str,
    ) -> StoreResult<Option<WorkflowExecution>> {
        Ok(self
            .rows
            .lock()
            .values()
            .find(|e| e.workflow_id == workflow_id && e.workflow_request_id == request_id)
            .cloned())
    }

    async fn mark_running(&self, id: Uuid, start_time: DateTime<Utc>) -> StoreResult<()> {
        let mut rows = self.rows.lock();
        let execution = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("execution '{}'", id)))?;
        execution.status = ExecutionStatus::Running;
        execution.start_time = Some(start_time);
        Ok(())
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        end_time: DateTime<Utc>,
        context_snapshot: &Value,
    ) -> StoreResult<()> {
        let mut rows = self.rows.lock();
        let execution = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("execution '{}'", id)))?;
        execution.status = status;
        execution.end_time = Some(end_time);
        execution.context_snapshot = Some(context_snapshot.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryActionExecutionRepository {
    rows: Mutex<Vec<ActionExecution>>,
}

#[async_trait]
impl ActionExecutionRepository for InMemoryActionExecutionRepository {
    async fn append(&self, record: &ActionExecution) -> StoreResult<()> {
        self.rows.lock().push(record.clone());
        Ok(())
    }

    async fn list_for_execution(&self, execution_id: Uuid) -> StoreResult<Vec<ActionExecution>> {
        let mut records: Vec<_> = self
            .rows
            .lock()
            .iter()
            .filter(|r| r.workflow_execution_id == execution_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| (&a.node_id, a.attempt).cmp(&(&b.node_id, b.attempt)));
        Ok(records)
    }

    async fn find_first_attempt(
        &self,
        execution_id: Uuid,
        node_id: &str,
    ) -> StoreResult<Option<ActionExecution>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|r| {
                r.workflow_execution_id == execution_id && r.node_id == node_id && r.attempt == 1
            })
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryCatalogRepository {
    rows: Mutex<HashMap<(String, String), ActionCatalogEntry>>,
}

#[async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn upsert(&self, entry: &ActionCatalogEntry) -> StoreResult<ActionCatalogEntry> {
        let mut rows = self.rows.lock();
        let key = (entry.connector_id.clone(), entry.action_type.clone());
        let now = Utc::now();
        let stored = match rows.get(&key) {
            Some(existing) => ActionCatalogEntry {
                created_at: existing.created_at,
                updated_at: Some(now),
                ..entry.clone()
            },
            None => ActionCatalogEntry {
                created_at: Some(now),
                updated_at: Some(now),
                ..entry.clone()
            },
        };
        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_all(&self) -> StoreResult<Vec<ActionCatalogEntry>> {
        let mut all: Vec<_> = self.rows.lock().values().cloned().collect();
        all.sort_by(|a, b| a.action_type.cmp(&b.action_type));
        Ok(all)
    }

    async fn set_enabled(
        &self,
        connector_id: &str,
        action_type: &str,
        enabled: bool,
    ) -> StoreResult<()> {
        let mut rows = self.rows.lock();
        let entry = rows
            .get_mut(&(connector_id.to_string(), action_type.to_string()))
            .ok_or_else(|| StoreError::NotFound(format!("catalog entry '{}'", action_type)))?;
        entry.is_enabled = enabled;
        entry.updated_at = Some(Utc::now());
        Ok(())
    }
}
