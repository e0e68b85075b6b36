//! Shared harness: in-memory stores, a scripted executor, and helpers to
//! wire a conductor or the full service stack without a database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use trellis_contracts::{ActionCatalogEntry, ActionResult, ExecuteActionRequest};
use trellis_engine::catalog::ActionCatalogRegistry;
use trellis_engine::conductor::Conductor;
use trellis_engine::config::{EngineConfig, RetryPolicy};
use trellis_engine::executor::ActionExecutor;
use trellis_engine::model::{ActionExecution, WorkflowDocument, WorkflowExecution};
use trellis_engine::parser::parse_document;
use trellis_engine::service::{ExecutionService, WorkflowService};
use trellis_engine::store::Stores;

/// Engine configuration tuned for fast tests: tiny backoff, no jitter.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy {
            initial_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
            max_attempts: 3,
            use_jitter: false,
        },
        default_action_timeout: Duration::from_secs(2),
        default_workflow_timeout: Duration::from_secs(10),
        condition_timeout: Duration::from_millis(500),
        ..EngineConfig::default()
    }
}

/// Test double for the action executor: per-node scripted results with an
/// optional artificial latency, plus concurrency accounting.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, Vec<ActionResult>>>,
    pub calls: Mutex<Vec<ExecuteActionRequest>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Queue results for a node; consumed in order, default is success with
    /// empty outputs once the script runs dry.
    pub fn script(&self, node_id: &str, results: Vec<ActionResult>) {
        let mut scripts = self.scripts.lock();
        let queue = scripts.entry(node_id.to_string()).or_default();
        let mut results = results;
        results.reverse();
        queue.extend(results);
    }

    pub fn calls_for(&self, node_id: &str) -> Vec<ExecuteActionRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.execution_context.node_id == node_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn execute(&self, request: ExecuteActionRequest) -> ActionResult {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let node_id = request.execution_context.node_id.clone();
        self.calls.lock().push(request);
        let result = self
            .scripts
            .lock()
            .get_mut(&node_id)
            .and_then(Vec::pop)
            .unwrap_or_else(|| ActionResult::succeeded(serde_json::Map::new()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn doc(definition: Value) -> WorkflowDocument {
    parse_document(&definition).expect("test document must parse")
}

pub fn catalog_entry(action_type: &str) -> ActionCatalogEntry {
    ActionCatalogEntry {
        action_type: action_type.to_string(),
        connector_id: action_type
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string(),
        display_name: action_type.to_string(),
        description: None,
        parameter_schema: json!({}),
        output_schema: json!({}),
        is_enabled: true,
        requires_auth: false,
        created_at: None,
        updated_at: None,
    }
}

/// Seed the catalog with an entry per distinct action type in the document.
pub async fn seed_catalog_for(stores: &Stores, document: &WorkflowDocument) {
    for node in &document.nodes {
        stores
            .catalog
            .upsert(&catalog_entry(&node.action_type))
            .await
            .expect("seeding catalog");
    }
}

/// A conductor over in-memory stores and the given executor.
pub async fn conductor_harness(
    document: &WorkflowDocument,
    executor: Arc<dyn ActionExecutor>,
    config: EngineConfig,
) -> (Conductor, Stores) {
    let stores = Stores::in_memory();
    seed_catalog_for(&stores, document).await;
    let registry = Arc::new(ActionCatalogRegistry::new(stores.catalog.clone()));
    registry.refresh().await.expect("warming registry");
    let conductor = Conductor::new(
        stores.clone(),
        executor,
        registry,
        Arc::new(config),
    );
    (conductor, stores)
}

/// Insert a Pending execution row and run it to completion.
pub async fn run_to_completion(
    conductor: &Conductor,
    stores: &Stores,
    document: WorkflowDocument,
    trigger: Value,
    vars: Value,
) -> (WorkflowExecution, Vec<ActionExecution>) {
    let execution = WorkflowExecution::new(
        document.id.clone(),
        1,
        uuid::Uuid::new_v4().to_string(),
        trigger,
        None,
    );
    stores
        .executions
        .insert(&execution)
        .await
        .expect("inserting execution");
    let finished = conductor
        .execute(execution, document, vars, CancellationToken::new())
        .await
        .expect("conductor run");
    let attempts = stores
        .attempts
        .list_for_execution(finished.id)
        .await
        .expect("listing attempts");
    (finished, attempts)
}

/// Full service stack over in-memory stores with the scripted executor.
pub struct ServiceHarness {
    pub stores: Stores,
    pub registry: Arc<ActionCatalogRegistry>,
    pub workflows: WorkflowService,
    pub executions: ExecutionService,
    pub executor: Arc<ScriptedExecutor>,
    pub config: Arc<EngineConfig>,
}

pub async fn service_harness(config: EngineConfig) -> ServiceHarness {
    let stores = Stores::in_memory();
    let registry = Arc::new(ActionCatalogRegistry::new(stores.catalog.clone()));
    let executor = Arc::new(ScriptedExecutor::new());
    let config = Arc::new(config);
    let conductor = Conductor::new(
        stores.clone(),
        executor.clone(),
        Arc::clone(&registry),
        Arc::clone(&config),
    );
    ServiceHarness {
        workflows: WorkflowService::new(stores.clone(), Arc::clone(&registry)),
        executions: ExecutionService::new(
            stores.clone(),
            conductor,
            Arc::clone(&registry),
            Arc::clone(&config),
        ),
        stores,
        registry,
        executor,
        config,
    }
}

/// Register an action type and refresh the registry.
pub async fn register_action(harness: &ServiceHarness, action_type: &str) {
    harness
        .stores
        .catalog
        .upsert(&catalog_entry(action_type))
        .await
        .expect("seeding catalog");
    harness.registry.refresh().await.expect("refreshing registry");
}
