//! Action execution: local in-process actions, remote connector calls, and
//! the dispatcher that picks between them. Local and remote invocations
//! return the same result shape, so the conductor never cares where an
//! action ran.

pub mod dispatch;
pub mod local;
pub mod remote;

use async_trait::async_trait;
use trellis_contracts::{ActionCatalogEntry, ActionResult, ActionStatus, ExecuteActionRequest};

pub use dispatch::DispatchingExecutor;
pub use local::{EchoAction, LocalAction, LocalActionRegistry, LogAction, NoopAction};
pub use remote::RemoteActionExecutor;

use crate::schema::{is_trivial_schema, validate_json};

/// Executes one action attempt. Every failure mode is folded into the
/// returned status; implementations never raise.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: ExecuteActionRequest) -> ActionResult;
}

/// Downgrade a successful result whose outputs violate the declared output
/// schema to a failure. Connectors own their idempotency; the engine owns
/// the contract.
pub fn enforce_output_schema(entry: &ActionCatalogEntry, result: ActionResult) -> ActionResult {
    if result.status != ActionStatus::Succeeded || is_trivial_schema(&entry.output_schema) {
        return result;
    }
    let outputs = serde_json::Value::Object(result.outputs.clone());
    match validate_json(&entry.output_schema, &outputs) {
        Ok(()) => result,
        Err(errors) => ActionResult::failed(format!(
            "schema-violation: outputs of '{}' do not match the declared output schema: {}",
            entry.action_type,
            errors.join("; ")
        )),
    }
}
