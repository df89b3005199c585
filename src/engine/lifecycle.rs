// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle: start, unload, shutdown and full reset.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::events::{Advisory, SyncEvent};
use crate::model::Record;
use crate::recovery::ResetOutcome;
use crate::repository::RecordRepository;
use crate::storage::SqliteLayer;

use super::{EngineError, EngineState, PlannerEngine, UnloadReport, BUDGETS_KEY, CAMPAIGNS_KEY};

impl PlannerEngine {
    /// Start the engine.
    ///
    /// 1. Attach the SQLite secondary layer if configured. A connection
    ///    failure is not fatal: the engine runs on the primary layer alone
    ///    and publishes an advisory.
    /// 2. Load campaigns and budgets (repairing whatever needs it).
    /// 3. Run one guard sweep, then start the monitors, the background
    ///    sweeper and refresh handling.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), EngineError> {
        let current = self.state();
        if current != EngineState::Created {
            return Err(EngineError::InvalidState { operation: "start", state: current });
        }

        let started = Instant::now();
        info!("Starting planner engine");
        self.set_state(EngineState::Loading);

        // ========== PHASE 1: secondary layer ==========
        if let Some(url) = self.config.secondary_db_url.clone() {
            match SqliteLayer::connect(&url).await {
                Ok(layer) => {
                    let layer = Arc::new(layer);
                    self.persistence.attach_layer(layer.clone());
                    *self.secondary.lock() = Some(layer);
                    info!("Secondary layer attached");
                }
                Err(e) => {
                    warn!(error = %e, "Secondary layer unavailable, continuing on primary only");
                    crate::metrics::record_error("sqlite", "connect", e.kind());
                    self.events.advise(Advisory::warning(
                        "Backup storage is unavailable; changes are kept in local storage only",
                    ));
                }
            }
        }

        // ========== PHASE 2: load collections ==========
        let campaigns = self.campaigns.load().await.len();
        let budgets = self.budgets.load().await.len();
        self.set_state(EngineState::Ready);

        // ========== PHASE 3: background work ==========
        let sweep = self.guard.sweep();
        debug!(pressure = %sweep.pressure, reclaimed = sweep.reclaimed, "Startup sweep");

        self.campaign_monitor.spawn();
        self.budget_monitor.spawn();
        if self.config.guard_sweep_interval_secs > 0 {
            self.guard
                .spawn_sweeper(&self.scheduler, Duration::from_secs(self.config.guard_sweep_interval_secs));
        }
        self.spawn_refresh_handler();

        self.set_state(EngineState::Running);
        crate::metrics::record_startup(started.elapsed());
        info!(
            campaigns,
            budgets,
            layers = ?self.persistence.layer_names(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Planner engine running"
        );
        Ok(())
    }

    /// Reload a collection when its monitor reports the store ahead, unless
    /// local edits are still waiting to be committed.
    fn spawn_refresh_handler(&self) {
        let mut events = self.events.subscribe();
        let campaigns = Arc::clone(&self.campaigns);
        let budgets = Arc::clone(&self.budgets);

        self.scheduler.spawn("refresh", async move {
            loop {
                match events.recv().await {
                    Ok(SyncEvent::RefreshRequested { key }) if key == CAMPAIGNS_KEY => {
                        refresh(campaigns.as_ref()).await;
                    }
                    Ok(SyncEvent::RefreshRequested { key }) if key == BUDGETS_KEY => {
                        refresh(budgets.as_ref()).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "Refresh handler lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Page-unload path: stop every timer and write each collection to the
    /// primary layer synchronously.
    pub fn unload(&self) -> UnloadReport {
        self.stop_background();
        let results = vec![
            (CAMPAIGNS_KEY.to_string(), self.campaigns.on_unload()),
            (BUDGETS_KEY.to_string(), self.budgets.on_unload()),
        ];
        self.set_state(EngineState::ShuttingDown);

        let report = UnloadReport { results };
        if report.success() {
            info!("Unload write complete");
        } else {
            warn!("Unload write incomplete");
        }
        report
    }

    /// Graceful shutdown: stop background work, save both collections
    /// (including the remote push) and close the secondary layer.
    ///
    /// An engine that never loaded is not saved, so it cannot overwrite
    /// stored data with empty collections.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let previous = self.state();
        if previous == EngineState::ShuttingDown {
            debug!("Already shut down");
            return;
        }
        info!("Shutting down planner engine");
        self.set_state(EngineState::ShuttingDown);
        self.stop_background();

        if matches!(previous, EngineState::Ready | EngineState::Running) {
            let campaigns = self.campaigns.force_save().await;
            let budgets = self.budgets.force_save().await;
            if !campaigns.saved_locally() || !budgets.saved_locally() {
                warn!(
                    campaigns = campaigns.saved_locally(),
                    budgets = budgets.saved_locally(),
                    "Final save incomplete"
                );
            }
        }
        self.campaigns.dispose();
        self.budgets.dispose();

        let secondary = self.secondary.lock().take();
        if let Some(layer) = secondary {
            layer.close().await;
        }
        info!("Planner engine stopped");
    }

    /// Clear every storage layer and empty both collections.
    ///
    /// Pending commits are dropped and the monitors are paused for the
    /// duration, so nothing re-persists the old data.
    #[tracing::instrument(skip(self))]
    pub async fn reset_all(&self) -> ResetOutcome {
        let was_running = self.is_running();
        self.campaign_monitor.stop();
        self.budget_monitor.stop();
        self.campaigns.dispose();
        self.budgets.dispose();

        let outcome = self.recovery.reset_all().await;
        self.campaigns.reload().await;
        self.budgets.reload().await;

        if was_running {
            self.campaign_monitor.spawn();
            self.budget_monitor.spawn();
        }
        outcome
    }

    fn stop_background(&self) {
        self.campaign_monitor.stop();
        self.budget_monitor.stop();
        let cancelled = self.scheduler.cancel_all();
        debug!(cancelled, "Background tasks stopped");
    }
}

async fn refresh<R: Record>(repository: &RecordRepository<R>) {
    if repository.has_pending_commit() {
        debug!(key = repository.key(), "Refresh deferred, local commit pending");
        return;
    }
    let records = repository.reload().await;
    info!(key = repository.key(), records = records.len(), "Refreshed from storage");
}
