//! Workflow document parsing.
//!
//! Deserialization is fail-fast and preserves parameter subtrees as raw
//! JSON; nothing is coerced before templating.

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::model::WorkflowDocument;

/// Parse a definition document from its stored JSON value.
pub fn parse_document(definition: &Value) -> EngineResult<WorkflowDocument> {
    serde_json::from_value(definition.clone())
        .map_err(|e| EngineError::Parse(format!("invalid workflow document: {}", e)))
}

/// Parse a definition document from raw text.
pub fn parse_document_str(definition: &str) -> EngineResult<WorkflowDocument> {
    serde_json::from_str(definition)
        .map_err(|e| EngineError::Parse(format!("invalid workflow document: {}", e)))
}
