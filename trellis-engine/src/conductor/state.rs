//! Shared run state: the ready queue, per-target incoming-edge outcomes,
//! the run context, and the cancellation plumbing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use trellis_sandbox::Scope;
use uuid::Uuid;

use crate::model::{WorkflowDocument, WorkflowExecution};

/// Outcome of one incoming edge of a target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EdgeOutcome {
    Unknown,
    Satisfied,
    Unsatisfied,
}

/// An edge is identified by its parent node and declaration index.
pub(crate) type EdgeKey = (String, usize);

/// Edge bookkeeping guarded by one lock so a decision and the enqueue that
/// follows it are atomic per (parent, child) pair.
pub(crate) struct RoutingState {
    /// target node → its incoming edges → decided outcome
    pub incoming: HashMap<String, HashMap<EdgeKey, EdgeOutcome>>,
    /// nodes ever placed on the ready queue (enqueuing is idempotent)
    pub enqueued: HashSet<String>,
}

/// State shared by every worker of one run.
pub(crate) struct RunState {
    pub doc: WorkflowDocument,
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub correlation_id: Option<String>,
    pub trigger: Value,
    pub vars: Value,
    /// node id → outputs; written only by the worker that completed the node
    context: RwLock<Map<String, Value>>,
    pub routing: Mutex<RoutingState>,
    /// Sender side of the ready queue; dropped when the last node finishes
    queue_tx: Mutex<Option<UnboundedSender<String>>>,
    /// Nodes enqueued but not yet finished
    pending: AtomicUsize,
    pub cancel: CancellationToken,
    /// First fatal error; set once
    fatal: Mutex<Option<String>>,
    pub timed_out: AtomicBool,
}

impl RunState {
    /// Build the run graph and seed the ready queue with the start node.
    pub fn new(
        doc: WorkflowDocument,
        execution: &WorkflowExecution,
        vars: Value,
        cancel: CancellationToken,
    ) -> (std::sync::Arc<Self>, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut incoming: HashMap<String, HashMap<EdgeKey, EdgeOutcome>> = HashMap::new();
        for node in &doc.nodes {
            for (index, edge) in node.edges.iter().enumerate() {
                incoming
                    .entry(edge.target_node.clone())
                    .or_default()
                    .insert((node.id.clone(), index), EdgeOutcome::Unknown);
            }
        }

        let start = doc.start_node.clone();
        let mut enqueued = HashSet::new();
        enqueued.insert(start.clone());
        let _ = tx.send(start);

        let state = std::sync::Arc::new(Self {
            execution_id: execution.id,
            workflow_id: execution.workflow_id.clone(),
            correlation_id: execution.correlation_id.clone(),
            trigger: execution.trigger_payload.clone(),
            vars,
            doc,
            context: RwLock::new(Map::new()),
            routing: Mutex::new(RoutingState {
                incoming,
                enqueued,
            }),
            queue_tx: Mutex::new(Some(tx)),
            pending: AtomicUsize::new(1),
            cancel,
            fatal: Mutex::new(None),
            timed_out: AtomicBool::new(false),
        });
        (state, rx)
    }

    /// Put a node on the ready queue unless it has been enqueued before.
    /// Callers hold the routing lock, making decide-then-enqueue atomic.
    pub fn try_enqueue(&self, routing: &mut RoutingState, node_id: &str) -> bool {
        if !routing.enqueued.insert(node_id.to_string()) {
            return false;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.queue_tx.lock().as_ref() {
            let _ = tx.send(node_id.to_string());
        }
        true
    }

    /// Called exactly once per dequeued node; closes the queue when the
    /// ready set drains.
    pub fn finish_node(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.queue_tx.lock().take();
        }
    }

    /// Record the first fatal error and cancel the run.
    pub fn set_fatal(&self, reason: String) {
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    pub fn fatal_reason(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    pub fn store_outputs(&self, node_id: &str, outputs: Map<String, Value>) {
        self.context
            .write()
            .insert(node_id.to_string(), Value::Object(outputs));
    }

    pub fn context_snapshot(&self) -> Map<String, Value> {
        self.context.read().clone()
    }

    /// Read-only evaluation scope over the current context snapshot.
    pub fn scope(&self) -> Scope {
        Scope::new(
            self.trigger.clone(),
            json!({ "data": Value::Object(self.context_snapshot()) }),
            self.vars.clone(),
        )
    }
}
