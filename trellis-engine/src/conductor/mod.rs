//! The workflow conductor: ready-set scheduling over a bounded worker pool.
//!
//! A run is a queue of ready nodes drained by workers behind a semaphore.
//! Each worker executes one node to a terminal outcome, updates the
//! incoming-edge state of its targets, and enqueues every target whose join
//! is settled. The run ends when the ready set drains or cancellation wins.

mod node;
mod routing;
mod state;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::catalog::ActionCatalogRegistry;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::executor::ActionExecutor;
use crate::model::{ExecutionStatus, WorkflowDocument, WorkflowExecution};
use crate::store::Stores;

use state::RunState;

/// Executes validated workflow documents.
#[derive(Clone)]
pub struct Conductor {
    stores: Stores,
    executor: Arc<dyn ActionExecutor>,
    registry: Arc<ActionCatalogRegistry>,
    config: Arc<EngineConfig>,
}

impl Conductor {
    pub fn new(
        stores: Stores,
        executor: Arc<dyn ActionExecutor>,
        registry: Arc<ActionCatalogRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            stores,
            executor,
            registry,
            config,
        }
    }

    /// Run one execution to a terminal status. The execution row must exist
    /// in Pending state; `cancel` is the external-cancel hook.
    pub async fn execute(
        &self,
        execution: WorkflowExecution,
        doc: WorkflowDocument,
        vars: Value,
        cancel: CancellationToken,
    ) -> EngineResult<WorkflowExecution> {
        let started_at = Utc::now();
        self.stores
            .executions
            .mark_running(execution.id, started_at)
            .await?;
        tracing::info!(
            workflow_id = %execution.workflow_id,
            execution_id = %execution.id,
            version = execution.workflow_version,
            "execution running"
        );

        let (state, mut queue) = RunState::new(doc, &execution, vars, cancel);
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_actions));

        // Workflow-level timeout; fatal failures cancel the same token.
        let watchdog = {
            let state = Arc::clone(&state);
            let timeout = self.config.default_workflow_timeout;
            tokio::spawn(async move {
                tokio::select! {
                    _ = state.cancel.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        state.timed_out.store(true, Ordering::SeqCst);
                        tracing::warn!(
                            execution_id = %state.execution_id,
                            "workflow timeout reached, cancelling run"
                        );
                        state.cancel.cancel();
                    }
                }
            })
        };

        let mut workers = JoinSet::new();
        loop {
            tokio::select! {
                maybe_node = queue.recv() => match maybe_node {
                    Some(node_id) => {
                        let conductor = self.clone();
                        let state = Arc::clone(&state);
                        let semaphore = Arc::clone(&semaphore);
                        workers.spawn(async move {
                            conductor.run_node(state, node_id, semaphore).await;
                        });
                    }
                    // Queue closed: the ready set drained
                    None => break,
                },
                _ = state.cancel.cancelled() => break,
            }
        }
        // In-flight workers run to completion or their own cancellation
        while workers.join_next().await.is_some() {}
        watchdog.abort();

        let status = if let Some(reason) = state.fatal_reason() {
            tracing::warn!(
                execution_id = %execution.id,
                reason = %reason,
                "execution failed"
            );
            ExecutionStatus::Failed
        } else if state.cancel.is_cancelled() {
            if state.timed_out.load(Ordering::SeqCst) {
                tracing::warn!(
                    execution_id = %execution.id,
                    "execution cancelled by workflow timeout"
                );
            }
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Succeeded
        };

        let snapshot = Value::Object(state.context_snapshot());
        let ended_at = Utc::now();
        self.stores
            .executions
            .finalize(execution.id, status, ended_at, &snapshot)
            .await?;
        tracing::info!(
            workflow_id = %execution.workflow_id,
            execution_id = %execution.id,
            status = %status,
            "execution finished"
        );

        let mut finished = execution;
        finished.status = status;
        finished.start_time = Some(started_at);
        finished.end_time = Some(ended_at);
        finished.context_snapshot = Some(snapshot);
        Ok(finished)
    }
}
