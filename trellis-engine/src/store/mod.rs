//! Persistence adapters.
//!
//! Repository traits with two implementations: Postgres via sqlx for the
//! running engine, and in-memory stores for tests and embedders. State
//! transitions are preconditioned both here (at the domain level) and in
//! SQL, so a racing update cannot skip a lifecycle step.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use trellis_contracts::ActionCatalogEntry;
use uuid::Uuid;

use crate::model::{
    ActionExecution, ExecutionStatus, Workflow, WorkflowDefinition, WorkflowExecution,
};

/// Errors raised by the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// Uniqueness or precondition violation
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Workflow metadata with preconditioned lifecycle transitions.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new workflow; `Conflict` if the id exists.
    async fn insert(&self, workflow: &Workflow) -> StoreResult<()>;

    /// Update display metadata; only Draft workflows are editable.
    async fn update_meta(
        &self,
        id: &str,
        display_name: &str,
        description: Option<&str>,
    ) -> StoreResult<Workflow>;

    async fn get(&self, id: &str) -> StoreResult<Option<Workflow>>;

    async fn list(&self) -> StoreResult<Vec<Workflow>>;

    /// Record a published version; Draft or Active workflows only. When
    /// `activate` is set the workflow becomes Active with the new current
    /// version.
    async fn mark_published(&self, id: &str, version: i32, activate: bool) -> StoreResult<Workflow>;

    /// Active → Archived; archiving disables the workflow.
    async fn archive(&self, id: &str) -> StoreResult<Workflow>;

    /// Archived → Active.
    async fn reactivate(&self, id: &str) -> StoreResult<Workflow>;
}

/// Versioned definition payloads, content-addressed by checksum.
#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    /// Upsert the editable draft (version 0).
    async fn save_draft(
        &self,
        workflow_id: &str,
        definition: &Value,
        checksum: &str,
    ) -> StoreResult<WorkflowDefinition>;

    async fn get(&self, workflow_id: &str, version: i32) -> StoreResult<Option<WorkflowDefinition>>;

    /// Find a published version (≥ 1) with this content checksum.
    async fn find_by_checksum(
        &self,
        workflow_id: &str,
        checksum: &str,
    ) -> StoreResult<Option<WorkflowDefinition>>;

    /// Highest version on record, 0 when only a draft exists.
    async fn max_version(&self, workflow_id: &str) -> StoreResult<i32>;

    /// Insert an immutable version; `Conflict` if the version or the
    /// (workflow, checksum) pair already exists.
    async fn insert_version(
        &self,
        workflow_id: &str,
        version: i32,
        definition: &Value,
        checksum: &str,
    ) -> StoreResult<WorkflowDefinition>;
}

/// Workflow runs, idempotent per (workflow, request id).
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new run; `Conflict` on a duplicate (workflow, request id).
    async fn insert(&self, execution: &WorkflowExecution) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>>;

    async fn find_by_request_id(
        &self,
        workflow_id: &str,
        request_id: &str,
    ) -> StoreResult<Option<WorkflowExecution>>;

    async fn mark_running(&self, id: Uuid, start_time: DateTime<Utc>) -> StoreResult<()>;

    /// Persist the terminal status, end time and final context snapshot.
    async fn finalize(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        end_time: DateTime<Utc>,
        context_snapshot: &Value,
    ) -> StoreResult<()>;
}

/// Append-only per-attempt telemetry.
#[async_trait]
pub trait ActionExecutionRepository: Send + Sync {
    async fn append(&self, record: &ActionExecution) -> StoreResult<()>;

    async fn list_for_execution(&self, execution_id: Uuid) -> StoreResult<Vec<ActionExecution>>;

    /// The attempt=1 record for a node, used to replay parameters on
    /// retries that do not re-render.
    async fn find_first_attempt(
        &self,
        execution_id: Uuid,
        node_id: &str,
    ) -> StoreResult<Option<ActionExecution>>;
}

/// The persisted action catalog, upserted by connectors.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Upsert keyed by (connector id, action type); timestamps are managed
    /// by the store.
    async fn upsert(&self, entry: &ActionCatalogEntry) -> StoreResult<ActionCatalogEntry>;

    async fn list_all(&self) -> StoreResult<Vec<ActionCatalogEntry>>;

    /// Admin soft-disable switch.
    async fn set_enabled(
        &self,
        connector_id: &str,
        action_type: &str,
        enabled: bool,
    ) -> StoreResult<()>;
}

/// The five storage concerns bundled for construction.
#[derive(Clone)]
pub struct Stores {
    pub workflows: std::sync::Arc<dyn WorkflowRepository>,
    pub definitions: std::sync::Arc<dyn DefinitionRepository>,
    pub executions: std::sync::Arc<dyn ExecutionRepository>,
    pub attempts: std::sync::Arc<dyn ActionExecutionRepository>,
    pub catalog: std::sync::Arc<dyn CatalogRepository>,
}

impl Stores {
    /// In-memory stores for tests and embedders.
    pub fn in_memory() -> Self {
        use std::sync::Arc;
        Self {
            workflows: Arc::new(memory::InMemoryWorkflowRepository::default()),
            definitions: Arc::new(memory::InMemoryDefinitionRepository::default()),
            executions: Arc::new(memory::InMemoryExecutionRepository::default()),
            attempts: Arc::new(memory::InMemoryActionExecutionRepository::default()),
            catalog: Arc::new(memory::InMemoryCatalogRepository::default()),
        }
    }

    /// Postgres-backed stores sharing one pool.
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use std::sync::Arc;
        Self {
            workflows: Arc::new(postgres::PgWorkflowRepository::new(pool.clone())),
            definitions: Arc::new(postgres::PgDefinitionRepository::new(pool.clone())),
            executions: Arc::new(postgres::PgExecutionRepository::new(pool.clone())),
            attempts: Arc::new(postgres::PgActionExecutionRepository::new(pool.clone())),
            catalog: Arc::new(postgres::PgCatalogRepository::new(pool)),
        }
    }
}
