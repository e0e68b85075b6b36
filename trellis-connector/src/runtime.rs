//! The hosting runtime: routes the execute contract onto hosted actions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use trellis_contracts::{ActionCatalogEntry, ActionResult, ExecuteActionRequest};

use crate::action::ConnectorAction;

/// Hosts a connector's actions behind the generic execute endpoint.
///
/// Every logical outcome is HTTP 200; non-200 responses are reserved for
/// connector-internal breakage, which the engine treats as retriable.
pub struct ConnectorRuntime {
    connector_id: String,
    actions: HashMap<String, Arc<dyn ConnectorAction>>,
}

impl ConnectorRuntime {
    pub fn new(connector_id: impl Into<String>) -> Self {
        Self {
            connector_id: connector_id.into(),
            actions: HashMap::new(),
        }
    }

    /// Host an action. Panics in debug builds if the descriptor's action
    /// type does not carry this connector's prefix; registration would be
    /// rejected by the engine anyway.
    pub fn with_action(mut self, action: Arc<dyn ConnectorAction>) -> Self {
        let action_type = action.descriptor().action_type;
        debug_assert!(
            action_type.starts_with(&format!("{}.", self.connector_id)),
            "action type '{}' must start with '{}.'",
            action_type,
            self.connector_id
        );
        self.actions.insert(action_type, action);
        self
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }

    /// Descriptors of every hosted action, for registration.
    pub fn descriptors(&self) -> Vec<ActionCatalogEntry> {
        let mut entries: Vec<_> = self.actions.values().map(|a| a.descriptor()).collect();
        entries.sort_by(|a, b| a.action_type.cmp(&b.action_type));
        entries
    }

    /// Build the HTTP router for this connector.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/api/v1/actions/execute", post(execute))
            .with_state(self)
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn execute(
    State(runtime): State<Arc<ConnectorRuntime>>,
    Json(request): Json<ExecuteActionRequest>,
) -> Json<ActionResult> {
    let Some(action) = runtime.actions.get(&request.action_type) else {
        return Json(ActionResult::failed(format!(
            "connector '{}' does not host action '{}'",
            runtime.connector_id, request.action_type
        )));
    };

    tracing::debug!(
        action_type = %request.action_type,
        execution_id = %request.execution_context.workflow_execution_id,
        node_id = %request.execution_context.node_id,
        "executing action"
    );
    let result = action
        .execute(request.parameters, request.execution_context)
        .await;
    Json(match result {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(
                action_type = %request.action_type,
                error = %e,
                "action raised instead of reporting a result"
            );
            ActionResult::failed(e.to_string())
        }
    })
}
