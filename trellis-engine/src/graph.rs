//! Structural validation of the workflow graph.
//!
//! Pure functions; every finding is an error, never a warning. Cycle
//! detection is a DFS with an explicit recursion stack, and reachability
//! follows both regular edges and onFailure references.

use std::collections::{HashMap, HashSet};

use crate::model::WorkflowDocument;

/// Validate the graph shape. Returns human-readable errors; empty means ok.
pub fn validate_graph(doc: &WorkflowDocument) -> Vec<String> {
    let mut errors = Vec::new();

    if doc.nodes.is_empty() {
        errors.push("workflow has no nodes".to_string());
        return errors;
    }

    let mut ids = HashSet::new();
    for node in &doc.nodes {
        if !ids.insert(node.id.as_str()) {
            errors.push(format!("duplicate node id '{}'", node.id));
        }
    }

    if !ids.contains(doc.start_node.as_str()) {
        errors.push(format!("start node '{}' does not exist", doc.start_node));
    }

    for node in &doc.nodes {
        for edge in &node.edges {
            if !ids.contains(edge.target_node.as_str()) {
                errors.push(format!(
                    "node '{}' has an edge to unknown node '{}'",
                    node.id, edge.target_node
                ));
            }
        }
        if let Some(handler) = &node.on_failure {
            if !ids.contains(handler.as_str()) {
                errors.push(format!(
                    "node '{}' references unknown onFailure node '{}'",
                    node.id, handler
                ));
            }
        }
    }

    // Bail before traversals if the node set itself is inconsistent
    if !errors.is_empty() {
        return errors;
    }

    let successors: HashMap<&str, Vec<&str>> = doc
        .nodes
        .iter()
        .map(|node| {
            let mut targets: Vec<&str> = node.edges.iter().map(|e| e.target_node.as_str()).collect();
            if let Some(handler) = &node.on_failure {
                targets.push(handler.as_str());
            }
            (node.id.as_str(), targets)
        })
        .collect();

    errors.extend(find_cycles(doc, &successors));
    errors.extend(find_unreachable(doc, &successors));
    errors
}

fn find_cycles(doc: &WorkflowDocument, successors: &HashMap<&str, Vec<&str>>) -> Vec<String> {
    let mut errors = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_stack: HashSet<&str> = HashSet::new();

    fn dfs<'a>(
        node: &'a str,
        successors: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        in_stack: &mut HashSet<&'a str>,
        errors: &mut Vec<String>,
    ) {
        visited.insert(node);
        in_stack.insert(node);
        if let Some(targets) = successors.get(node) {
            for target in targets {
                if in_stack.contains(target) {
                    errors.push(format!(
                        "cycle detected: edge from '{}' back to '{}'",
                        node, target
                    ));
                } else if !visited.contains(target) {
                    dfs(target, successors, visited, in_stack, errors);
                }
            }
        }
        in_stack.remove(node);
    }

    for node in &doc.nodes {
        if !visited.contains(node.id.as_str()) {
            dfs(
                node.id.as_str(),
                successors,
                &mut visited,
                &mut in_stack,
                &mut errors,
            );
        }
    }
    errors
}

fn find_unreachable(doc: &WorkflowDocument, successors: &HashMap<&str, Vec<&str>>) -> Vec<String> {
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut stack = vec![doc.start_node.as_str()];
    while let Some(node) = stack.pop() {
        if !reachable.insert(node) {
            continue;
        }
        if let Some(targets) = successors.get(node) {
            stack.extend(targets.iter().copied());
        }
    }
    doc.nodes
        .iter()
        .filter(|node| !reachable.contains(node.id.as_str()))
        .map(|node| format!("node '{}' is unreachable from the start node", node.id))
        .collect()
}
