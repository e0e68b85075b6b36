//! Dispatch resolution: local action first, then catalog lookup → connector
//! URL → remote call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use trellis_contracts::{ActionResult, ExecuteActionRequest};

use crate::catalog::ActionCatalogRegistry;

use super::{ActionExecutor, LocalActionRegistry, RemoteActionExecutor};

pub struct DispatchingExecutor {
    local: Arc<LocalActionRegistry>,
    registry: Arc<ActionCatalogRegistry>,
    remote: RemoteActionExecutor,
    connector_urls: HashMap<String, String>,
}

impl DispatchingExecutor {
    pub fn new(
        local: Arc<LocalActionRegistry>,
        registry: Arc<ActionCatalogRegistry>,
        remote: RemoteActionExecutor,
        connector_urls: HashMap<String, String>,
    ) -> Self {
        Self {
            local,
            registry,
            remote,
            connector_urls,
        }
    }
}

#[async_trait]
impl ActionExecutor for DispatchingExecutor {
    async fn execute(&self, request: ExecuteActionRequest) -> ActionResult {
        // 1. Process-local implementation wins
        if let Some(action) = self.local.get(&request.action_type) {
            tracing::debug!(action_type = %request.action_type, "dispatching locally");
            return action
                .execute(request.parameters, request.execution_context)
                .await;
        }

        // 2. Catalog entry → connector id → configured URL → remote call
        if self
            .registry
            .get_by_action_type(&request.action_type, false)
            .is_none()
        {
            return ActionResult::failed(format!(
                "action '{}' is not registered or is disabled",
                request.action_type
            ));
        }

        let connector_id = match request.action_type.split('.').next() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return ActionResult::failed(format!(
                    "action type '{}' has no connector prefix",
                    request.action_type
                ));
            }
        };

        let base_url = match self.connector_urls.get(&connector_id.to_lowercase()) {
            Some(url) => url.clone(),
            None => {
                return ActionResult::failed(format!(
                    "no URL configured for connector '{}'",
                    connector_id
                ));
            }
        };

        tracing::debug!(
            action_type = %request.action_type,
            connector = %connector_id,
            "dispatching to connector"
        );
        self.remote.execute(&base_url, &request).await
    }
}
