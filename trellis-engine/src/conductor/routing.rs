//! Edge routing after a node's final attempt.
//!
//! Conditions are evaluated against a context snapshot before the routing
//! lock is taken; recording outcomes and deciding enqueues happens under
//! the lock, so a join's last parent always sees every prior decision.

use std::sync::Arc;

use trellis_sandbox::evaluate_condition;

use crate::model::{EdgeWhen, RoutePolicy};

use super::node::NodeOutcome;
use super::state::{EdgeKey, EdgeOutcome, RoutingState, RunState};
use super::Conductor;

impl Conductor {
    pub(super) fn route_after(&self, state: &Arc<RunState>, node_id: &str, outcome: &NodeOutcome) {
        let node = match state.doc.node(node_id) {
            Some(node) => node.clone(),
            None => return,
        };

        // A skipped node decides nothing itself; its edges go unsatisfied
        // so downstream joins still resolve.
        let succeeded = match outcome {
            NodeOutcome::Succeeded => true,
            NodeOutcome::Failed(_) => false,
            NodeOutcome::Skipped => false,
        };
        let evaluate = !matches!(outcome, NodeOutcome::Skipped);

        let scope = state.scope();
        let mut decisions: Vec<(EdgeKey, String, bool)> = Vec::new();
        let mut matched = false;
        for (index, edge) in node.edges.iter().enumerate() {
            let mut satisfied = false;
            let short_circuited = node.route_policy == RoutePolicy::FirstMatch && matched;
            if evaluate && !short_circuited {
                let guard_ok = match edge.when {
                    EdgeWhen::Success => succeeded,
                    EdgeWhen::Failure => !succeeded,
                    EdgeWhen::Always => true,
                };
                if guard_ok {
                    satisfied = match &edge.condition {
                        None => true,
                        Some(condition) => {
                            let result =
                                evaluate_condition(condition, &scope, self.config.condition_timeout);
                            if let Some(reason) = &result.failure {
                                tracing::warn!(
                                    execution_id = %state.execution_id,
                                    node_id = %node.id,
                                    target = %edge.target_node,
                                    reason = %reason,
                                    "edge condition evaluation failed, treating as unsatisfied"
                                );
                            }
                            result.value
                        }
                    };
                }
            }
            if satisfied {
                matched = true;
            }
            decisions.push((
                (node.id.clone(), index),
                edge.target_node.clone(),
                satisfied,
            ));
        }

        let mut ready = Vec::new();
        {
            let mut routing = state.routing.lock();
            let mut touched = Vec::new();
            for (key, target, satisfied) in decisions {
                if let Some(edges) = routing.incoming.get_mut(&target) {
                    edges.insert(
                        key,
                        if satisfied {
                            EdgeOutcome::Satisfied
                        } else {
                            EdgeOutcome::Unsatisfied
                        },
                    );
                }
                touched.push(target);
            }
            self.resolve_targets(state, &mut routing, touched, &mut ready);

            // Unified failure handling: a final failure is handled by an
            // onFailure handler or a satisfied failure/always edge;
            // anything else is fatal for the run.
            if let NodeOutcome::Failed(reason) = outcome {
                let mut handled = matched;
                if let Some(handler) = &node.on_failure {
                    handled = true;
                    if state.try_enqueue(&mut routing, handler) {
                        tracing::info!(
                            execution_id = %state.execution_id,
                            node_id = %node.id,
                            handler = %handler,
                            "routing failure to handler"
                        );
                    }
                }
                if !handled && !state.cancel.is_cancelled() {
                    state.set_fatal(format!("node '{}' failed: {}", node.id, reason));
                }
            }
        }

        for target in ready {
            tracing::debug!(
                execution_id = %state.execution_id,
                parent = %node.id,
                node_id = %target,
                "node ready"
            );
        }
    }

    /// Decide every touched target whose incoming edges are now settled:
    /// enqueue it if any edge is satisfied, otherwise cascade the skip into
    /// its own outgoing edges so further joins can settle too. FIFO keeps
    /// enqueue order aligned with edge declaration order.
    fn resolve_targets(
        &self,
        state: &Arc<RunState>,
        routing: &mut RoutingState,
        worklist: Vec<String>,
        ready: &mut Vec<String>,
    ) {
        let mut worklist: std::collections::VecDeque<String> = worklist.into();
        while let Some(target) = worklist.pop_front() {
            if routing.enqueued.contains(&target) {
                continue;
            }
            let Some(edges) = routing.incoming.get(&target) else {
                continue;
            };
            if edges.values().any(|o| *o == EdgeOutcome::Unknown) {
                continue;
            }
            let any_satisfied = edges.values().any(|o| *o == EdgeOutcome::Satisfied);
            if any_satisfied {
                if state.try_enqueue(routing, &target) {
                    ready.push(target);
                }
                continue;
            }

            // No parent will ever hand control to this node; settle its
            // outgoing edges as unsatisfied.
            let Some(node) = state.doc.node(&target) else {
                continue;
            };
            for (index, edge) in node.edges.iter().enumerate() {
                if let Some(child_edges) = routing.incoming.get_mut(&edge.target_node) {
                    let key: EdgeKey = (target.clone(), index);
                    if child_edges.get(&key) == Some(&EdgeOutcome::Unknown) {
                        child_edges.insert(key, EdgeOutcome::Unsatisfied);
                        worklist.push_back(edge.target_node.clone());
                    }
                }
            }
        }
    }
}
