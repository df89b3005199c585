// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Planner engine.
//!
//! [`PlannerEngine`] wires the sync core together for a host application:
//! - a [`LocalStore`] primary layer, plus a SQLite secondary layer when
//!   `secondary_db_url` is configured
//! - the [`StorageSizeGuard`] and its background sweep
//! - a campaign and a budget [`RecordRepository`], each with its own
//!   [`DivergenceMonitor`]
//! - the [`DataRecoveryService`] and, when configured, remote sync
//!
//! # Lifecycle
//!
//! ```text
//! Created → Loading → Ready → Running → ShuttingDown
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use campaign_sync::{EngineState, PlannerEngine, SyncConfig};
//! use campaign_sync::model::Campaign;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = PlannerEngine::new(SyncConfig::default());
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! engine.start().await.expect("start");
//! engine.campaigns().update(|c| c.push(Campaign::new("Webinars", 100.0, 10_000.0)));
//! engine.shutdown().await;
//! # }
//! ```

mod lifecycle;
mod types;

pub use types::{EngineError, EngineState, UnloadReport};

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::warn;

use crate::config::SyncConfig;
use crate::events::{EventBus, SyncEvent};
use crate::guard::{GuardConfig, StorageSizeGuard, StorageUsage};
use crate::model::{Budget, Campaign};
use crate::monitor::{DivergenceMonitor, MonitorConfig};
use crate::recovery::{DataRecoveryService, RecoveryError};
use crate::remote::{RemoteSync, RemoteSyncAdapter};
use crate::repository::RecordRepository;
use crate::scheduler::Scheduler;
use crate::storage::{LocalStore, MultiLayerPersistence, SqliteLayer};

/// Storage key of the campaign collection.
pub const CAMPAIGNS_KEY: &str = "campaigns";
/// Storage key of the budget collection.
pub const BUDGETS_KEY: &str = "budgets";

pub struct PlannerEngine {
    pub(super) config: SyncConfig,
    pub(super) state: watch::Sender<EngineState>,
    pub(super) events: EventBus,

    pub(super) store: Arc<LocalStore>,
    pub(super) secondary: Mutex<Option<Arc<SqliteLayer>>>,
    pub(super) persistence: Arc<MultiLayerPersistence>,
    pub(super) guard: Arc<StorageSizeGuard>,

    pub(super) campaigns: Arc<RecordRepository<Campaign>>,
    pub(super) budgets: Arc<RecordRepository<Budget>>,
    pub(super) campaign_monitor: Arc<DivergenceMonitor<Campaign>>,
    pub(super) budget_monitor: Arc<DivergenceMonitor<Budget>>,

    pub(super) recovery: DataRecoveryService,
    pub(super) remote: Option<Arc<RemoteSyncAdapter>>,

    /// Guard sweep and refresh handling
    pub(super) scheduler: Scheduler,
}

impl PlannerEngine {
    /// Build an engine without remote sync.
    pub fn new(config: SyncConfig) -> Self {
        let store = Arc::new(LocalStore::new(config.storage_capacity_bytes));
        Self::build(config, store, None)
    }

    /// Build an engine that pushes explicit saves through `client`.
    ///
    /// The client is only used if `config.remote` names a target.
    pub fn with_remote(config: SyncConfig, client: Arc<dyn RemoteSync>) -> Self {
        let store = Arc::new(LocalStore::new(config.storage_capacity_bytes));
        Self::build(config, store, Some(client))
    }

    /// Build an engine on an existing primary store.
    pub fn with_store(config: SyncConfig, store: Arc<LocalStore>, client: Option<Arc<dyn RemoteSync>>) -> Self {
        Self::build(config, store, client)
    }

    fn build(config: SyncConfig, store: Arc<LocalStore>, client: Option<Arc<dyn RemoteSync>>) -> Self {
        let events = EventBus::new(config.event_capacity);

        let guard = Arc::new(
            StorageSizeGuard::new(store.clone(), GuardConfig::from(&config)).with_events(events.clone()),
        );
        let persistence = Arc::new(
            MultiLayerPersistence::new(store.clone())
                .with_guard(Arc::clone(&guard))
                .with_events(events.clone()),
        );

        let remote = match (client, &config.remote) {
            (Some(client), Some(target)) => Some(Arc::new(RemoteSyncAdapter::new(client, target.clone()))),
            (Some(_), None) => {
                warn!("Remote client supplied without a remote target, remote sync disabled");
                None
            }
            (None, _) => None,
        };

        let campaigns = Arc::new(Self::repository(CAMPAIGNS_KEY, &persistence, &events, &config, &remote));
        let budgets = Arc::new(Self::repository(BUDGETS_KEY, &persistence, &events, &config, &remote));

        let monitor_config = MonitorConfig::from(&config);
        let campaign_monitor = Arc::new(DivergenceMonitor::new(
            Arc::clone(&campaigns),
            events.clone(),
            monitor_config.clone(),
        ));
        let budget_monitor = Arc::new(DivergenceMonitor::new(Arc::clone(&budgets), events.clone(), monitor_config));

        let recovery = DataRecoveryService::new(Arc::clone(&persistence), events.clone(), config.download_dir());
        let (state, _rx) = watch::channel(EngineState::Created);

        Self {
            config,
            state,
            events,
            store,
            secondary: Mutex::new(None),
            persistence,
            guard,
            campaigns,
            budgets,
            campaign_monitor,
            budget_monitor,
            recovery,
            remote,
            scheduler: Scheduler::new("engine"),
        }
    }

    fn repository<R: crate::model::Record>(
        key: &str,
        persistence: &Arc<MultiLayerPersistence>,
        events: &EventBus,
        config: &SyncConfig,
        remote: &Option<Arc<RemoteSyncAdapter>>,
    ) -> RecordRepository<R> {
        let repo = RecordRepository::new(key, Arc::clone(persistence), events.clone(), config.debounce());
        match remote {
            Some(remote) => repo.with_remote(Arc::clone(remote)),
            None => repo,
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn campaigns(&self) -> &Arc<RecordRepository<Campaign>> {
        &self.campaigns
    }

    #[must_use]
    pub fn budgets(&self) -> &Arc<RecordRepository<Budget>> {
        &self.budgets
    }

    #[must_use]
    pub fn campaign_monitor(&self) -> &Arc<DivergenceMonitor<Campaign>> {
        &self.campaign_monitor
    }

    #[must_use]
    pub fn budget_monitor(&self) -> &Arc<DivergenceMonitor<Budget>> {
        &self.budget_monitor
    }

    #[must_use]
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    #[must_use]
    pub fn persistence(&self) -> &Arc<MultiLayerPersistence> {
        &self.persistence
    }

    #[must_use]
    pub fn guard(&self) -> &Arc<StorageSizeGuard> {
        &self.guard
    }

    #[must_use]
    pub fn recovery(&self) -> &DataRecoveryService {
        &self.recovery
    }

    #[must_use]
    pub fn remote(&self) -> Option<&Arc<RemoteSyncAdapter>> {
        self.remote.as_ref()
    }

    /// Secondary layer, once attached by `start()`.
    #[must_use]
    pub fn secondary(&self) -> Option<Arc<SqliteLayer>> {
        self.secondary.lock().clone()
    }

    #[must_use]
    pub fn storage_usage(&self) -> StorageUsage {
        self.guard.get_usage()
    }

    /// Export the current campaigns as a backup file.
    pub fn export_campaigns(&self) -> Result<PathBuf, RecoveryError> {
        self.recovery.export_backup(&self.campaigns.records())
    }

    /// Export the current budgets as a backup file.
    pub fn export_budgets(&self) -> Result<PathBuf, RecoveryError> {
        self.recovery.export_backup(&self.budgets.records())
    }

    pub(super) fn set_state(&self, next: EngineState) {
        self.state.send_replace(next);
        crate::metrics::set_engine_state(next.as_str());
    }
}
