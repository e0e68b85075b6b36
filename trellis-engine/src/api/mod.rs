//! HTTP surface.
//!
//! Thin adapters over the services: deserialize, call, translate. Errors
//! become status codes here and nowhere else.

pub mod admin;
pub mod models;
pub mod workflows;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::catalog::ActionCatalogRegistry;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::service::{ExecutionService, WorkflowService};
use crate::store::{StoreError, Stores};

use models::ErrorBody;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub workflows: WorkflowService,
    pub executions: ExecutionService,
    pub registry: Arc<ActionCatalogRegistry>,
    pub stores: Stores,
    pub config: Arc<EngineConfig>,
}

/// Build the engine router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/workflows", post(workflows::save_draft).get(workflows::list))
        .route("/api/v1/workflows/validate", post(workflows::validate))
        .route("/api/v1/workflows/:id", get(workflows::get))
        .route("/api/v1/workflows/:id/publish", post(workflows::publish))
        .route("/api/v1/workflows/:id/archive", post(workflows::archive))
        .route("/api/v1/workflows/:id/reactivate", post(workflows::reactivate))
        .route("/api/v1/workflows/:id/execute", post(workflows::execute))
        .route("/api/v1/executions/:id", get(workflows::execution_status))
        .route("/api/v1/admin/actions", get(admin::list_actions))
        .route("/api/v1/admin/actions/register", post(admin::register_actions))
        .route("/api/v1/admin/actions/refresh", post(admin::refresh_catalog))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Engine errors translated at the edge.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            EngineError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                ErrorBody::message(format!("{} not found", what)),
            ),
            EngineError::Conflict(message) => (StatusCode::CONFLICT, ErrorBody::message(message)),
            EngineError::Validation(report) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "validation failed".to_string(),
                    errors: Some(report.errors),
                    warnings: Some(report.warnings),
                },
            ),
            EngineError::Parse(message) => (StatusCode::BAD_REQUEST, ErrorBody::message(message)),
            EngineError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, ErrorBody::message(message))
            }
            EngineError::Store(StoreError::NotFound(what)) => (
                StatusCode::NOT_FOUND,
                ErrorBody::message(format!("{} not found", what)),
            ),
            EngineError::Store(StoreError::Conflict(message)) => {
                (StatusCode::CONFLICT, ErrorBody::message(message))
            }
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::message("internal error".to_string()),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
