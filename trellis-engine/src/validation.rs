//! Publish/execute validation: graph structure, catalog cross-references,
//! declared parameter schemas, and edge condition syntax.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use trellis_sandbox::check_condition;

use crate::catalog::ActionCatalogRegistry;
use crate::graph::validate_graph;
use crate::model::WorkflowDocument;
use crate::schema::validate_declared_parameters;

/// The outcome of validating a workflow document. Warnings never block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self::from_parts(errors, Vec::new())
    }
}

/// Validates documents against the graph rules and the action catalog.
#[derive(Clone)]
pub struct WorkflowValidator {
    registry: Arc<ActionCatalogRegistry>,
}

impl WorkflowValidator {
    pub fn new(registry: Arc<ActionCatalogRegistry>) -> Self {
        Self { registry }
    }

    pub fn validate(&self, doc: &WorkflowDocument) -> ValidationReport {
        let mut errors = validate_graph(doc);
        let mut warnings = Vec::new();

        for node in &doc.nodes {
            match self.registry.get_by_action_type(&node.action_type, false) {
                Some(entry) => {
                    if let Err(schema_errors) =
                        validate_declared_parameters(&entry.parameter_schema, &node.parameters)
                    {
                        for error in schema_errors {
                            errors.push(format!("node '{}' parameters: {}", node.id, error));
                        }
                    }
                }
                None => {
                    errors.push(format!(
                        "node '{}' references unknown or disabled action '{}'",
                        node.id, node.action_type
                    ));
                }
            }

            let mut seen_edges = HashSet::new();
            for edge in &node.edges {
                if let Some(condition) = &edge.condition {
                    if let Err(e) = check_condition(condition) {
                        errors.push(format!(
                            "node '{}' edge to '{}': condition does not evaluate: {}",
                            node.id, edge.target_node, e
                        ));
                    }
                }
                let key = (
                    edge.target_node.clone(),
                    edge.when,
                    edge.condition.clone().unwrap_or_default(),
                );
                if !seen_edges.insert(key) {
                    warnings.push(format!(
                        "node '{}' declares duplicate edges to '{}'",
                        node.id, edge.target_node
                    ));
                }
            }
        }

        ValidationReport::from_parts(errors, warnings)
    }
}
