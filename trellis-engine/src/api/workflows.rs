//! Workflow lifecycle and execution handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::model::Workflow;
use crate::service::{PublishOutcome, StartRequest};
use crate::validation::ValidationReport;

use super::models::{
    ExecuteQuery, ExecuteRequest, ExecuteResponse, ExecutionStatusResponse, PublishQuery,
    SaveDraftRequest,
};
use super::{ApiError, AppState};

pub async fn save_draft(
    State(state): State<AppState>,
    Json(request): Json<SaveDraftRequest>,
) -> Result<Json<Workflow>, ApiError> {
    let workflow = state.workflows.save_draft(request.definition).await?;
    Ok(Json(workflow))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Workflow>>, ApiError> {
    Ok(Json(state.workflows.list().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    let workflow = state
        .workflows
        .get(&id)
        .await?
        .ok_or_else(|| crate::error::EngineError::NotFound(format!("workflow '{}'", id)))?;
    Ok(Json(workflow))
}

pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<SaveDraftRequest>,
) -> Json<ValidationReport> {
    Json(state.workflows.validate_definition(&request.definition))
}

pub async fn publish(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PublishQuery>,
) -> Result<Json<PublishOutcome>, ApiError> {
    let outcome = state.workflows.publish(&id, query.auto_activate).await?;
    Ok(Json(outcome))
}

pub async fn archive(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.workflows.archive(&id).await?))
}

pub async fn reactivate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(state.workflows.reactivate(&id).await?))
}

pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExecuteQuery>,
    Json(request): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), ApiError> {
    let started = state
        .executions
        .start(
            &id,
            query.version,
            StartRequest {
                trigger: request.trigger,
                vars: request.vars,
                request_id: request.request_id,
                correlation_id: request.correlation_id,
            },
        )
        .await?;
    let execution_id = started.execution.id;
    Ok((
        StatusCode::ACCEPTED,
        Json(ExecuteResponse {
            execution_id,
            status: started.execution.status,
            status_url: format!("/api/v1/executions/{}", execution_id),
        }),
    ))
}

pub async fn execution_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionStatusResponse>, ApiError> {
    let (execution, attempts) = state
        .executions
        .get_with_attempts(id)
        .await?
        .ok_or_else(|| crate::error::EngineError::NotFound(format!("execution '{}'", id)))?;
    Ok(Json(ExecutionStatusResponse {
        execution,
        attempts,
    }))
}
