//! The parsed workflow document: a DAG of typed action nodes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status guard on an edge: which parent outcome lets it fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeWhen {
    #[default]
    Success,
    Failure,
    Always,
}

/// How satisfied outgoing edges are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoutePolicy {
    /// Emit every satisfied edge (fan-out).
    #[serde(rename = "parallel")]
    #[default]
    Parallel,
    /// Emit the first satisfied edge in declaration order only.
    #[serde(rename = "firstMatch")]
    FirstMatch,
}

/// Per-node execution policies.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePolicies {
    /// Re-render parameters on every retry instead of reusing the first
    /// attempt's rendered parameters.
    #[serde(default)]
    pub rerender_on_retry: bool,
}

/// A directed transition guarded by a when-status and an optional condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub target_node: String,
    #[serde(default)]
    pub when: EdgeWhen,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub action_type: String,
    /// Free-form templatable parameter tree, preserved as JSON.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub route_policy: RoutePolicy,
    #[serde(default)]
    pub policies: NodePolicies,
    /// Handler node enqueued when this node finally fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
}

/// A parsed workflow definition document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start_node: String,
    pub nodes: Vec<Node>,
}

impl WorkflowDocument {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
