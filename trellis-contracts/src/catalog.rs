//! The action catalog registration contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A registered action as published by a connector and persisted by the
/// engine.
///
/// `action_type` is globally unique and must start with `connector_id`
/// followed by a dot; the register endpoint enforces the prefix. Timestamps
/// are assigned server-side and omitted by connectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCatalogEntry {
    pub action_type: String,
    pub connector_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_schema")]
    pub parameter_schema: Value,
    #[serde(default = "default_schema")]
    pub output_schema: Value,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_schema() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_true() -> bool {
    true
}

/// Body of `POST /api/v1/admin/actions/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterActionsRequest {
    pub connector_id: String,
    pub actions: Vec<ActionCatalogEntry>,
}

/// Response of a successful register call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterActionsResponse {
    pub registered: usize,
    pub timestamp: DateTime<Utc>,
}
