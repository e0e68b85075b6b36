//! Starting runs and reading their telemetry.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::catalog::ActionCatalogRegistry;
use crate::conductor::Conductor;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::model::{ActionExecution, WorkflowExecution, WorkflowStatus, DRAFT_VERSION};
use crate::parser::parse_document;
use crate::store::{StoreError, Stores};
use crate::validation::WorkflowValidator;

/// Input to start a run.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub trigger: Value,
    pub vars: Value,
    /// Client-provided idempotency key; generated when absent.
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
}

/// The accepted run. `handle` is present only when this call created the
/// run; idempotent replays return the existing execution.
#[derive(Debug)]
pub struct StartedExecution {
    pub execution: WorkflowExecution,
    pub created: bool,
    pub handle: Option<JoinHandle<EngineResult<WorkflowExecution>>>,
}

#[derive(Clone)]
pub struct ExecutionService {
    stores: Stores,
    conductor: Conductor,
    validator: WorkflowValidator,
    config: Arc<EngineConfig>,
    /// Cancellation hooks of in-flight runs.
    running: Arc<DashMap<Uuid, CancellationToken>>,
}

impl ExecutionService {
    pub fn new(
        stores: Stores,
        conductor: Conductor,
        registry: Arc<ActionCatalogRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            stores,
            conductor,
            validator: WorkflowValidator::new(registry),
            config,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Start a run of a workflow version. Idempotent per
    /// (workflow, request id): a replay returns the existing execution.
    pub async fn start(
        &self,
        workflow_id: &str,
        version: Option<i32>,
        request: StartRequest,
    ) -> EngineResult<StartedExecution> {
        let workflow = self
            .stores
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("workflow '{}'", workflow_id)))?;

        let version = match version {
            Some(version) => version,
            None => workflow
                .current_version
                .ok_or_else(|| {
                    EngineError::Conflict(format!(
                        "workflow '{}' has never been published",
                        workflow_id
                    ))
                })?,
        };

        let draft_run = version == DRAFT_VERSION || workflow.status == WorkflowStatus::Draft;
        if draft_run {
            if !self.config.allow_draft_execution {
                return Err(EngineError::BadRequest(format!(
                    "workflow '{}' is not published and draft execution is disabled",
                    workflow_id
                )));
            }
            tracing::warn!(workflow_id = %workflow_id, draft = true, "starting draft execution");
        } else if workflow.status != WorkflowStatus::Active || !workflow.is_enabled {
            return Err(EngineError::Conflict(format!(
                "workflow '{}' is not active and enabled",
                workflow_id
            )));
        }

        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Some(existing) = self
            .stores
            .executions
            .find_by_request_id(workflow_id, &request_id)
            .await?
        {
            return Ok(StartedExecution {
                execution: existing,
                created: false,
                handle: None,
            });
        }

        let definition = self
            .stores
            .definitions
            .get(workflow_id, version)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "definition version {} of workflow '{}'",
                    version, workflow_id
                ))
            })?;
        let doc = parse_document(&definition.definition_json)?;
        let report = self.validator.validate(&doc);
        if !report.is_valid {
            return Err(EngineError::Validation(report));
        }

        let trigger = normalize_payload(request.trigger);
        let vars = normalize_payload(request.vars);
        let execution = WorkflowExecution::new(
            workflow_id.to_string(),
            version,
            request_id.clone(),
            trigger,
            request.correlation_id.clone(),
        );
        match self.stores.executions.insert(&execution).await {
            Ok(()) => {}
            // A concurrent starter with the same request id won the race
            Err(StoreError::Conflict(_)) => {
                let existing = self
                    .stores
                    .executions
                    .find_by_request_id(workflow_id, &request_id)
                    .await?
                    .ok_or_else(|| {
                        EngineError::Conflict(format!(
                            "request id '{}' raced and no execution exists",
                            request_id
                        ))
                    })?;
                return Ok(StartedExecution {
                    execution: existing,
                    created: false,
                    handle: None,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let cancel = CancellationToken::new();
        self.running.insert(execution.id, cancel.clone());
        let handle = {
            let conductor = self.conductor.clone();
            let running = Arc::clone(&self.running);
            let execution = execution.clone();
            let execution_id = execution.id;
            tokio::spawn(async move {
                let finished = conductor.execute(execution, doc, vars, cancel).await;
                running.remove(&execution_id);
                if let Err(e) = &finished {
                    tracing::error!(execution_id = %execution_id, error = %e, "run aborted");
                }
                finished
            })
        };

        Ok(StartedExecution {
            execution,
            created: true,
            handle: Some(handle),
        })
    }

    /// Current state plus per-node attempts.
    pub async fn get_with_attempts(
        &self,
        id: Uuid,
    ) -> EngineResult<Option<(WorkflowExecution, Vec<ActionExecution>)>> {
        let Some(execution) = self.stores.executions.get(id).await? else {
            return Ok(None);
        };
        let attempts = self.stores.attempts.list_for_execution(id).await?;
        Ok(Some((execution, attempts)))
    }

    /// External-cancel hook for an in-flight run.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.running.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Triggers and vars are object maps on the wire; anything absent becomes
/// an empty object.
fn normalize_payload(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        Value::Null => Value::Object(serde_json::Map::new()),
        other => serde_json::json!({ "value": other }),
    }
}
