//! The action trait connectors implement.

use async_trait::async_trait;
use serde_json::{Map, Value};
use trellis_contracts::{ActionCatalogEntry, ActionResult, ExecutionContext};

use crate::error::ConnectorResult;

/// One hosted action.
///
/// The engine delivers at-least-once: an action may see the same
/// (execution, node) pair again after a retry, and idempotency is the
/// action's responsibility. Logical failures belong in the returned
/// `ActionResult`; an `Err` is reported to the engine as a plain `Failed`.
#[async_trait]
pub trait ConnectorAction: Send + Sync {
    /// Catalog descriptor registered with the engine. The action type must
    /// carry the connector's id prefix (`"connector.verb"`).
    fn descriptor(&self) -> ActionCatalogEntry;

    async fn execute(
        &self,
        parameters: Map<String, Value>,
        context: ExecutionContext,
    ) -> ConnectorResult<ActionResult>;
}
