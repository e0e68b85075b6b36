//! The action invocation contract.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Logical outcome of one action attempt.
///
/// Connectors report all of these over HTTP 200; transport-level failures
/// are mapped onto `RetriableFailure`/`Failed` by the engine's executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Succeeded,
    Failed,
    RetriableFailure,
    Skipped,
}

impl ActionStatus {
    /// Whether this status terminates the node without another attempt.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionStatus::RetriableFailure)
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionStatus::Succeeded => "Succeeded",
            ActionStatus::Failed => "Failed",
            ActionStatus::RetriableFailure => "RetriableFailure",
            ActionStatus::Skipped => "Skipped",
        };
        write!(f, "{}", s)
    }
}

/// Uniform result shape returned by every action, local or remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub status: ActionStatus,
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn succeeded(outputs: Map<String, Value>) -> Self {
        Self {
            status: ActionStatus::Succeeded,
            outputs,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failed,
            outputs: Map::new(),
            error: Some(error.into()),
        }
    }

    pub fn retriable(error: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::RetriableFailure,
            outputs: Map::new(),
            error: Some(error.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: ActionStatus::Skipped,
            outputs: Map::new(),
            error: None,
        }
    }
}

/// Identifies the run and node an action invocation belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub workflow_execution_id: Uuid,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Body of `POST /api/v1/actions/execute` on every connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteActionRequest {
    pub action_type: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub execution_context: ExecutionContext,
}
