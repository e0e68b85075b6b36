//! Engine entry point: configuration, storage, catalog warm-up, HTTP serve.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use trellis_engine::api::{self, AppState};
use trellis_engine::catalog::ActionCatalogRegistry;
use trellis_engine::conductor::Conductor;
use trellis_engine::config::EngineConfig;
use trellis_engine::executor::{DispatchingExecutor, LocalActionRegistry, RemoteActionExecutor};
use trellis_engine::service::{ExecutionService, WorkflowService};
use trellis_engine::store::Stores;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(EngineConfig::from_env().context("loading configuration")?);

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL is required")?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(16)
        .connect(&database_url)
        .await
        .context("connecting to Postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;
    let stores = Stores::postgres(pool);

    // The in-process `core` connector registers like any other connector:
    // its descriptors land in the persisted catalog before the first refresh.
    let local = Arc::new(LocalActionRegistry::with_builtins());
    for descriptor in local.descriptors() {
        stores
            .catalog
            .upsert(&descriptor)
            .await
            .context("registering local actions")?;
    }

    let registry = Arc::new(ActionCatalogRegistry::new(stores.catalog.clone()));
    registry.refresh().await.context("warming action catalog")?;
    let shutdown = CancellationToken::new();
    let refresh_task = registry.spawn_refresh_task(config.catalog_refresh, shutdown.clone());

    let remote = RemoteActionExecutor::new(config.default_action_timeout)
        .context("building remote executor")?;
    let executor = Arc::new(DispatchingExecutor::new(
        Arc::clone(&local),
        Arc::clone(&registry),
        remote,
        config.connector_urls.clone(),
    ));
    let conductor = Conductor::new(
        stores.clone(),
        executor,
        Arc::clone(&registry),
        Arc::clone(&config),
    );

    let state = AppState {
        workflows: WorkflowService::new(stores.clone(), Arc::clone(&registry)),
        executions: ExecutionService::new(
            stores.clone(),
            conductor,
            Arc::clone(&registry),
            Arc::clone(&config),
        ),
        registry,
        stores,
        config: Arc::clone(&config),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "engine listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("serving")?;

    shutdown.cancel();
    let _ = refresh_task.await;
    Ok(())
}
