//! Workflow identity and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a workflow.
///
/// Draft is the only status in which edit operations are permitted. Active
/// requires a published version; Archived implies disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Draft,
    Active,
    Archived,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Draft => "Draft",
            WorkflowStatus::Active => "Active",
            WorkflowStatus::Archived => "Archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Draft" => Some(WorkflowStatus::Draft),
            "Active" => Some(WorkflowStatus::Active),
            "Archived" => Some(WorkflowStatus::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The identity of a business flow, independent of its versioned content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub current_version: Option<i32>,
    pub status: WorkflowStatus,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// A freshly created draft.
    pub fn new_draft(id: String, display_name: String, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            display_name,
            description,
            current_version: None,
            status: WorkflowStatus::Draft,
            is_enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}
