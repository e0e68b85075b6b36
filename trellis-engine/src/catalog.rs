//! In-memory action catalog registry.
//!
//! Reads are lock-free snapshots: the backing map lives behind an `Arc` that
//! refresh swaps atomically, so readers never see a partially loaded
//! catalog. A background task refreshes on a fixed interval; a successful
//! register call triggers an on-demand refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trellis_contracts::ActionCatalogEntry;

use crate::error::EngineResult;
use crate::store::CatalogRepository;

type Snapshot = Arc<HashMap<String, ActionCatalogEntry>>;

/// Cached view of the persisted action catalog, keyed by action type.
pub struct ActionCatalogRegistry {
    repo: Arc<dyn CatalogRepository>,
    snapshot: RwLock<Snapshot>,
    last_refreshed: RwLock<Option<DateTime<Utc>>>,
}

impl ActionCatalogRegistry {
    pub fn new(repo: Arc<dyn CatalogRepository>) -> Self {
        Self {
            repo,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            last_refreshed: RwLock::new(None),
        }
    }

    /// Reload the snapshot from the store. Returns the entry count.
    pub async fn refresh(&self) -> EngineResult<usize> {
        let entries = self.repo.list_all().await?;
        let map: HashMap<String, ActionCatalogEntry> = entries
            .into_iter()
            .map(|entry| (entry.action_type.clone(), entry))
            .collect();
        let count = map.len();
        *self.snapshot.write() = Arc::new(map);
        *self.last_refreshed.write() = Some(Utc::now());
        tracing::debug!(entries = count, "action catalog refreshed");
        Ok(count)
    }

    /// Look up an action type. Disabled entries are absent unless requested.
    pub fn get_by_action_type(
        &self,
        action_type: &str,
        include_disabled: bool,
    ) -> Option<ActionCatalogEntry> {
        let snapshot = self.snapshot.read().clone();
        snapshot
            .get(action_type)
            .filter(|entry| include_disabled || entry.is_enabled)
            .cloned()
    }

    pub fn get_all_enabled(&self) -> Vec<ActionCatalogEntry> {
        let snapshot = self.snapshot.read().clone();
        let mut entries: Vec<_> = snapshot
            .values()
            .filter(|entry| entry.is_enabled)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.action_type.cmp(&b.action_type));
        entries
    }

    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        *self.last_refreshed.read()
    }

    /// Periodic refresh until cancelled.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it, startup refreshed
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = registry.refresh().await {
                            tracing::warn!(error = %e, "scheduled catalog refresh failed");
                        }
                    }
                }
            }
        })
    }
}
