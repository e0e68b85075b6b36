//! Process-local actions.
//!
//! The engine ships a small `core` connector that runs in-process: echo,
//! noop and log. Its descriptors are upserted into the catalog on startup
//! exactly like a remote connector's, so publish validation treats local
//! and remote actions the same way.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use trellis_contracts::{ActionCatalogEntry, ActionResult, ExecutionContext};

/// An action implemented inside the engine process.
#[async_trait]
pub trait LocalAction: Send + Sync {
    /// Catalog descriptor published for this action.
    fn descriptor(&self) -> ActionCatalogEntry;

    async fn execute(&self, parameters: Map<String, Value>, context: ExecutionContext)
        -> ActionResult;
}

fn core_entry(verb: &str, display_name: &str, parameter_schema: Value) -> ActionCatalogEntry {
    ActionCatalogEntry {
        action_type: format!("core.{}", verb),
        connector_id: "core".to_string(),
        display_name: display_name.to_string(),
        description: None,
        parameter_schema,
        output_schema: json!({}),
        is_enabled: true,
        requires_auth: false,
        created_at: None,
        updated_at: None,
    }
}

/// `core.echo`: returns its message back as `outputs.echo`.
pub struct EchoAction;

#[async_trait]
impl LocalAction for EchoAction {
    fn descriptor(&self) -> ActionCatalogEntry {
        core_entry(
            "echo",
            "Echo",
            json!({
                "type": "object",
                "properties": {"message": {}},
                "required": ["message"]
            }),
        )
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        _context: ExecutionContext,
    ) -> ActionResult {
        let mut outputs = Map::new();
        outputs.insert(
            "echo".to_string(),
            parameters.get("message").cloned().unwrap_or(Value::Null),
        );
        ActionResult::succeeded(outputs)
    }
}

/// `core.noop`: succeeds with no outputs.
pub struct NoopAction;

#[async_trait]
impl LocalAction for NoopAction {
    fn descriptor(&self) -> ActionCatalogEntry {
        core_entry("noop", "No-op", json!({}))
    }

    async fn execute(
        &self,
        _parameters: Map<String, Value>,
        _context: ExecutionContext,
    ) -> ActionResult {
        ActionResult::succeeded(Map::new())
    }
}

/// `core.log`: emits its message into the engine log.
pub struct LogAction;

#[async_trait]
impl LocalAction for LogAction {
    fn descriptor(&self) -> ActionCatalogEntry {
        core_entry(
            "log",
            "Log",
            json!({
                "type": "object",
                "properties": {"message": {}, "level": {"type": "string"}}
            }),
        )
    }

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        context: ExecutionContext,
    ) -> ActionResult {
        let message = parameters
            .get("message")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        tracing::info!(
            execution_id = %context.workflow_execution_id,
            node_id = %context.node_id,
            "{}",
            message
        );
        let mut outputs = Map::new();
        outputs.insert("logged".to_string(), Value::Bool(true));
        ActionResult::succeeded(outputs)
    }
}

/// Registry of process-local actions, consulted before any remote dispatch.
pub struct LocalActionRegistry {
    actions: HashMap<String, Arc<dyn LocalAction>>,
}

impl LocalActionRegistry {
    /// Registry preloaded with the built-in `core` actions.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            actions: HashMap::new(),
        };
        registry.register(Arc::new(EchoAction));
        registry.register(Arc::new(NoopAction));
        registry.register(Arc::new(LogAction));
        registry
    }

    pub fn empty() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    pub fn register(&mut self, action: Arc<dyn LocalAction>) {
        self.actions
            .insert(action.descriptor().action_type, action);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn LocalAction>> {
        self.actions.get(action_type).cloned()
    }

    /// Descriptors of every local action, for catalog registration.
    pub fn descriptors(&self) -> Vec<ActionCatalogEntry> {
        let mut entries: Vec<_> = self.actions.values().map(|a| a.descriptor()).collect();
        entries.sort_by(|a, b| a.action_type.cmp(&b.action_type));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn context() -> ExecutionContext {
        ExecutionContext {
            workflow_execution_id: Uuid::new_v4(),
            node_id: "n".to_string(),
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn echo_returns_its_message() {
        let mut parameters = Map::new();
        parameters.insert("message".to_string(), json!("Hello"));
        let result = EchoAction.execute(parameters, context()).await;
        assert_eq!(result.outputs["echo"], json!("Hello"));
    }

    #[test]
    fn builtins_are_registered_with_core_prefix() {
        let registry = LocalActionRegistry::with_builtins();
        assert!(registry.get("core.echo").is_some());
        assert!(registry.get("core.noop").is_some());
        assert!(registry.get("core.log").is_some());
        assert!(registry.get("slack.post").is_none());
        assert!(registry
            .descriptors()
            .iter()
            .all(|d| d.action_type.starts_with("core.")));
    }
}
