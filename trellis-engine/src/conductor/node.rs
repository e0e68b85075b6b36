//! Per-node execution: parameter rendering, schema validation, dispatch,
//! attempt telemetry and the retry loop.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use trellis_contracts::{
    ActionCatalogEntry, ActionResult, ActionStatus, ExecuteActionRequest, ExecutionContext,
};
use trellis_sandbox::render_parameters;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::executor::enforce_output_schema;
use crate::model::{ActionExecution, Node};
use crate::schema::validate_parameters;

use super::state::RunState;
use super::Conductor;

/// Terminal outcome of a node, fed into edge routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NodeOutcome {
    Succeeded,
    Failed(String),
    Skipped,
}

struct AttemptOutput {
    result: ActionResult,
    parameters_json: Option<String>,
}

impl Conductor {
    /// One worker: execute the node to a terminal outcome, route its edges,
    /// release the slot.
    pub(super) async fn run_node(
        &self,
        state: Arc<RunState>,
        node_id: String,
        semaphore: Arc<Semaphore>,
    ) {
        match self.execute_node(&state, &node_id, semaphore).await {
            Ok(outcome) => self.route_after(&state, &node_id, &outcome),
            Err(e) => {
                // Attempt telemetry could not be written; the run cannot be
                // trusted to continue.
                tracing::error!(
                    execution_id = %state.execution_id,
                    node_id = %node_id,
                    error = %e,
                    "node bookkeeping failed"
                );
                state.set_fatal(format!("node '{}': {}", node_id, e));
            }
        }
        state.finish_node();
    }

    async fn execute_node(
        &self,
        state: &Arc<RunState>,
        node_id: &str,
        semaphore: Arc<Semaphore>,
    ) -> EngineResult<NodeOutcome> {
        // (a) bounded parallelism; cancellation may win the wait
        let _permit = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => return Ok(NodeOutcome::Skipped),
            permit = semaphore.acquire_owned() => {
                permit.map_err(|_| EngineError::Internal("worker semaphore closed".to_string()))?
            }
        };

        let node = state
            .doc
            .node(node_id)
            .ok_or_else(|| EngineError::Internal(format!("node '{}' not in run graph", node_id)))?
            .clone();
        let entry = self.registry.get_by_action_type(&node.action_type, true);
        let max_attempts = self.config.retry.max_attempts;
        let mut attempt: u32 = 1;

        loop {
            let started_at = Utc::now();
            let AttemptOutput {
                mut result,
                parameters_json,
            } = self.run_attempt(state, &node, entry.as_ref(), attempt).await;

            // (h) a retriable failure with no attempts left, or one racing
            // the workflow's cancellation, is final
            if result.status == ActionStatus::RetriableFailure
                && (attempt >= max_attempts || state.cancel.is_cancelled())
            {
                result.status = ActionStatus::Failed;
            }

            // (f) record the attempt before acting on it
            let record = ActionExecution {
                id: Uuid::new_v4(),
                workflow_execution_id: state.execution_id,
                node_id: node.id.clone(),
                action_type: node.action_type.clone(),
                status: result.status,
                attempt: attempt as i32,
                retry_count: attempt as i32 - 1,
                parameters_json,
                outputs: if result.outputs.is_empty() {
                    None
                } else {
                    Some(Value::Object(result.outputs.clone()))
                },
                error: result
                    .error
                    .as_ref()
                    .map(|message| serde_json::json!({ "message": message })),
                start_time: Some(started_at),
                end_time: Some(Utc::now()),
            };
            self.stores.attempts.append(&record).await?;

            tracing::debug!(
                workflow_id = %state.workflow_id,
                execution_id = %state.execution_id,
                node_id = %node.id,
                attempt,
                status = %result.status,
                "attempt recorded"
            );

            match result.status {
                ActionStatus::Succeeded => {
                    // (g) publish outputs before routing evaluates conditions
                    state.store_outputs(&node.id, result.outputs);
                    return Ok(NodeOutcome::Succeeded);
                }
                ActionStatus::Failed => {
                    return Ok(NodeOutcome::Failed(
                        result.error.unwrap_or_else(|| "action failed".to_string()),
                    ));
                }
                ActionStatus::Skipped => return Ok(NodeOutcome::Skipped),
                ActionStatus::RetriableFailure => {
                    tracing::warn!(
                        execution_id = %state.execution_id,
                        node_id = %node.id,
                        attempt,
                        error = result.error.as_deref().unwrap_or(""),
                        "attempt failed, retrying"
                    );
                    let delay = self
                        .config
                        .retry
                        .backoff_after(attempt, self.config.default_action_timeout);
                    tokio::select! {
                        _ = state.cancel.cancelled() => {
                            return Ok(NodeOutcome::Failed(
                                result.error.unwrap_or_else(|| "workflow cancelled".to_string()),
                            ));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One attempt: render or replay parameters, validate, dispatch.
    async fn run_attempt(
        &self,
        state: &Arc<RunState>,
        node: &Node,
        entry: Option<&ActionCatalogEntry>,
        attempt: u32,
    ) -> AttemptOutput {
        // (c) replay attempt 1's recorded parameters verbatim unless this is
        // the first attempt or the author opted into re-rendering. An
        // attempt that failed before rendering recorded nothing, so there
        // is nothing to replay and rendering runs again.
        let replayed = if attempt > 1 && !node.policies.rerender_on_retry {
            match self
                .stores
                .attempts
                .find_first_attempt(state.execution_id, &node.id)
                .await
            {
                Ok(first) => match first.and_then(|f| f.parameters_json) {
                    Some(serialized) => {
                        match serde_json::from_str::<Map<String, Value>>(&serialized) {
                            Ok(parameters) => Some((parameters, serialized)),
                            Err(e) => {
                                return AttemptOutput {
                                    result: ActionResult::failed(format!(
                                        "recorded parameters are unreadable: {}",
                                        e
                                    )),
                                    parameters_json: None,
                                };
                            }
                        }
                    }
                    None => None,
                },
                Err(e) => {
                    return AttemptOutput {
                        result: ActionResult::retriable(format!(
                            "failed to load recorded parameters: {}",
                            e
                        )),
                        parameters_json: None,
                    };
                }
            }
        } else {
            None
        };
        let (parameters, parameters_json) = match replayed {
            Some(replayed) => replayed,
            None => {
                let scope = state.scope();
                match render_parameters(&node.parameters, &scope, &self.config.template_options) {
                    Ok(rendered) => {
                        let serialized = serde_json::to_string(&Value::Object(rendered.clone()))
                            .unwrap_or_default();
                        (rendered, serialized)
                    }
                    Err(e) => {
                        return AttemptOutput {
                            result: ActionResult::retriable(format!(
                                "template render failed: {}",
                                e
                            )),
                            parameters_json: None,
                        };
                    }
                }
            }
        };

        // (d) validate the rendered parameters
        let entry = match entry {
            Some(entry) => entry,
            None => {
                return AttemptOutput {
                    result: ActionResult::failed(format!(
                        "action '{}' is not in the catalog",
                        node.action_type
                    )),
                    parameters_json: Some(parameters_json),
                };
            }
        };
        if let Err(errors) = validate_parameters(&entry.parameter_schema, &parameters) {
            return AttemptOutput {
                result: ActionResult::retriable(format!(
                    "parameter validation failed: {}",
                    errors.join("; ")
                )),
                parameters_json: Some(parameters_json),
            };
        }

        // (e) dispatch under the per-action timeout, linked to the
        // workflow's cancellation
        let request = ExecuteActionRequest {
            action_type: node.action_type.clone(),
            parameters,
            execution_context: ExecutionContext {
                workflow_execution_id: state.execution_id,
                node_id: node.id.clone(),
                correlation_id: state.correlation_id.clone(),
            },
        };
        let timeout = self.config.default_action_timeout;
        let result = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => {
                ActionResult::failed("workflow cancelled".to_string())
            }
            dispatched = tokio::time::timeout(timeout, self.executor.execute(request)) => {
                match dispatched {
                    Ok(result) => result,
                    Err(_) => ActionResult::retriable(format!(
                        "action timed out after {:?}",
                        timeout
                    )),
                }
            }
        };

        AttemptOutput {
            result: enforce_output_schema(entry, result),
            parameters_json: Some(parameters_json),
        }
    }
}
