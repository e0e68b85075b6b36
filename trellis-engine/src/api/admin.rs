//! Admin surface: connector registration and catalog management.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use trellis_contracts::{ActionCatalogEntry, RegisterActionsRequest, RegisterActionsResponse};

use crate::error::EngineError;

use super::models::RefreshResponse;
use super::{ApiError, AppState};

/// Connector catalog upsert. Every action type must carry the connector's
/// own prefix; the whole batch is rejected otherwise.
pub async fn register_actions(
    State(state): State<AppState>,
    Json(request): Json<RegisterActionsRequest>,
) -> Result<Json<RegisterActionsResponse>, ApiError> {
    if request.connector_id.trim().is_empty() {
        return Err(EngineError::Parse("connectorId must not be empty".to_string()).into());
    }
    let prefix = format!("{}.", request.connector_id);
    for action in &request.actions {
        if !action.action_type.starts_with(&prefix) {
            return Err(EngineError::Parse(format!(
                "action type '{}' must start with '{}'",
                action.action_type, prefix
            ))
            .into());
        }
    }

    let mut registered = 0;
    for action in &request.actions {
        let entry = ActionCatalogEntry {
            connector_id: request.connector_id.clone(),
            ..action.clone()
        };
        state.stores.catalog.upsert(&entry).await.map_err(EngineError::from)?;
        registered += 1;
    }
    state.registry.refresh().await?;
    tracing::info!(
        connector_id = %request.connector_id,
        registered,
        "connector actions registered"
    );

    Ok(Json(RegisterActionsResponse {
        registered,
        timestamp: Utc::now(),
    }))
}

/// Force a registry refresh.
pub async fn refresh_catalog(
    State(state): State<AppState>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let entries = state.registry.refresh().await?;
    Ok(Json(RefreshResponse {
        entries,
        last_refreshed_at: state.registry.last_refreshed_at(),
    }))
}

/// Enabled catalog entries as currently cached.
pub async fn list_actions(State(state): State<AppState>) -> Json<Vec<ActionCatalogEntry>> {
    Json(state.registry.get_all_enabled())
}
