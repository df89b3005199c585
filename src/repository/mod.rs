// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record repository: the stateful core of one record collection.
//!
//! A [`RecordRepository`] owns the authoritative in-memory copy of a
//! collection for the session. The backing layers are a mirror of it:
//!
//! ```text
//!   mutate() ──▶ in-memory copy ──▶ debounce window ──▶ commit()
//!                      │                                   │
//!                      │                                   ▼
//!                      │                     MultiLayerPersistence::write
//!                      │                                   │
//!   on_unload() ───────┴──▶ primary layer only (sync)      ├──▶ beacon lastSaved:<key>
//!                                                          └──▶ SyncEvent::Saved
//!   force_save() ──▶ cancel window ──▶ commit() ──▶ RemoteSyncAdapter::push
//! ```
//!
//! # Ordering
//!
//! Mutations are applied in call order under a write lock. Commits are
//! serialised by a commit lock and snapshot the copy only once they hold it,
//! so a commit never persists a state older than the last mutation made
//! before it started.

mod types;

pub use types::{beacon_key, SaveBeacon, SaveOutcome, SaveStatus, BEACON_PREFIX};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::events::{Advisory, EventBus, SyncEvent};
use crate::model::Record;
use crate::recovery::repair_collection;
use crate::remote::RemoteSyncAdapter;
use crate::scheduler::Scheduler;
use crate::storage::{MultiLayerPersistence, RejectReason, StorageError, WriteOutcome};

const COMMIT_SLOT: &str = "commit";

pub struct RecordRepository<R: Record> {
    key: String,
    persistence: Arc<MultiLayerPersistence>,
    remote: Option<Arc<RemoteSyncAdapter>>,
    events: EventBus,
    scheduler: Scheduler,
    debounce: Duration,
    records: RwLock<Vec<R>>,
    commit_lock: Mutex<()>,
    status: watch::Sender<SaveStatus>,
}

impl<R: Record> RecordRepository<R> {
    pub fn new(
        key: impl Into<String>,
        persistence: Arc<MultiLayerPersistence>,
        events: EventBus,
        debounce: Duration,
    ) -> Self {
        let key = key.into();
        let (status, _rx) = watch::channel(SaveStatus::default());
        Self {
            scheduler: Scheduler::new(format!("repository:{}", key)),
            key,
            persistence,
            remote: None,
            events,
            debounce,
            records: RwLock::new(Vec::new()),
            commit_lock: Mutex::new(()),
            status,
        }
    }

    /// Push snapshots to a remote store on explicit saves.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<RemoteSyncAdapter>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn persistence(&self) -> &Arc<MultiLayerPersistence> {
        &self.persistence
    }

    /// Load the collection from storage into memory.
    ///
    /// Never fails: malformed data is repaired, unreadable data yields an
    /// empty collection, and either case publishes an advisory. A repaired
    /// collection is written back so the next load is clean.
    #[instrument(skip(self), fields(key = %self.key, kind = R::KIND))]
    pub async fn load(&self) -> Vec<R> {
        let report = self.persistence.read_collection(&self.key).await;

        let source = report.source.clone();
        // Value came from a later layer: the primary is missing it
        let restored = report.value.is_some() && !report.rejections.is_empty();
        let fell_back = report
            .rejections
            .iter()
            .any(|r| !matches!(r.reason, RejectReason::Absent));

        let (records, needs_write_back) = match (report.value.as_ref(), report.salvageable()) {
            (Some(value), _) | (None, Some(value)) => {
                let repaired = repair_collection::<R>(value);
                let clean = repaired.is_clean() && report.value.is_some();
                if !clean {
                    warn!(
                        records = repaired.records.len(),
                        fixes = repaired.fixes,
                        rekeyed = repaired.rekeyed,
                        "Stored collection was malformed and has been repaired"
                    );
                    crate::metrics::record_repair(R::KIND, repaired.fixes, repaired.rekeyed);
                    self.events.advise(Advisory::warning(format!(
                        "Some saved {} data was damaged and has been repaired",
                        R::KIND
                    )));
                } else if fell_back {
                    info!(source = ?source, "Primary data unusable, loaded from a fallback layer");
                    self.events.advise(Advisory::info(format!(
                        "Restored {} data from backup storage",
                        R::KIND
                    )));
                }
                (repaired.records, !clean || restored)
            }
            (None, None) if report.is_cold_start() => {
                debug!("Cold start, nothing stored");
                (Vec::new(), false)
            }
            (None, None) => {
                warn!(rejections = report.rejections.len(), "No layer held readable data");
                self.events.advise(Advisory::warning(format!(
                    "Saved {} data could not be read; starting empty",
                    R::KIND
                )));
                (Vec::new(), false)
            }
        };

        *self.records.write() = records.clone();
        self.restore_last_saved();

        if needs_write_back {
            let outcome = self.persistence.write(&self.key, &records).await;
            if !outcome.success {
                warn!("Write-back of repaired collection failed");
            }
        }

        info!(records = records.len(), source = ?source, "Collection loaded");
        records
    }

    /// Discard any pending commit and load again from storage.
    pub async fn reload(&self) -> Vec<R> {
        if self.scheduler.cancel(COMMIT_SLOT) {
            debug!(key = %self.key, "Pending commit discarded by reload");
        }
        self.load().await
    }

    fn restore_last_saved(&self) {
        let beacon = match self.persistence.primary().get_item(&beacon_key(&self.key)) {
            Ok(Some(raw)) => serde_json::from_str::<SaveBeacon>(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!(key = %self.key, error = %e, "Beacon unreadable");
                None
            }
        };
        if let Some(saved) = beacon.and_then(|b| b.saved_at()) {
            self.status.send_modify(|s| s.last_saved = Some(saved));
        }
    }

    /// Snapshot of the in-memory copy.
    #[must_use]
    pub fn records(&self) -> Vec<R> {
        self.records.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Replace the in-memory copy and schedule a debounced commit.
    pub fn mutate(self: &Arc<Self>, records: Vec<R>) {
        *self.records.write() = records;
        self.after_mutation();
    }

    /// Edit the in-memory copy in place and schedule a debounced commit.
    pub fn update<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&mut Vec<R>),
    {
        {
            let mut records = self.records.write();
            f(&mut *records);
        }
        self.after_mutation();
    }

    fn after_mutation(self: &Arc<Self>) {
        // Scheduled before `Mutated` goes out, so listeners already see the
        // commit as pending
        let weak = Arc::downgrade(self);
        let replaced = self.scheduler.debounce(COMMIT_SLOT, self.debounce, async move {
            if let Some(repo) = weak.upgrade() {
                repo.commit().await;
            }
        });
        if replaced {
            crate::metrics::record_debounced(&self.key);
        }

        self.events.publish(SyncEvent::Mutated { key: self.key.clone() });
    }

    /// A debounced commit is waiting for its window to elapse.
    #[must_use]
    pub fn has_pending_commit(&self) -> bool {
        self.scheduler.is_pending(COMMIT_SLOT)
    }

    async fn commit(&self) -> WriteOutcome {
        let _guard = self.commit_lock.lock().await;
        let snapshot = self.records();
        let started = Instant::now();

        self.status.send_modify(|s| {
            s.in_flight = true;
            s.last_error = None;
        });

        let outcome = self.persistence.write(&self.key, &snapshot).await;

        if outcome.success {
            let beacon = self.write_beacon();
            self.status.send_modify(|s| {
                s.in_flight = false;
                s.last_saved = beacon.saved_at();
            });
            for failed in outcome.failed_layers() {
                debug!(key = %self.key, layer = %failed.layer, "Secondary layer missed this commit");
            }
            debug!(
                key = %self.key,
                records = snapshot.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Committed"
            );
            crate::metrics::record_commit(&self.key, "success", snapshot.len());
            self.events.publish(SyncEvent::Saved(beacon));
        } else {
            let error = outcome
                .primary_error()
                .map(ToString::to_string)
                .unwrap_or_else(|| "primary layer write failed".to_string());
            warn!(key = %self.key, %error, "Commit failed");
            self.status.send_modify(|s| {
                s.in_flight = false;
                s.last_error = Some(error.clone());
            });
            crate::metrics::record_commit(&self.key, "failure", snapshot.len());
            self.events.publish(SyncEvent::SaveFailed { key: self.key.clone(), error });
        }

        outcome
    }

    /// Beacon write failures only cost the "last saved" indicator.
    fn write_beacon(&self) -> SaveBeacon {
        let beacon = SaveBeacon::at(&self.key, Utc::now());
        if let Err(e) = self.persistence.write_primary_sync(&beacon_key(&self.key), &beacon) {
            warn!(key = %self.key, error = %e, "Failed to persist save beacon");
        }
        beacon
    }

    /// Commit now, skipping the debounce window, then push to the remote
    /// store if one is configured.
    ///
    /// The remote push is attempted even when the local commit failed; the
    /// two results are reported separately.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn force_save(&self) -> SaveOutcome {
        self.scheduler.cancel(COMMIT_SLOT);
        let local = self.commit().await;

        let remote = match &self.remote {
            Some(remote) => Some(remote.push(&self.key, &self.records()).await),
            None => None,
        };

        SaveOutcome { local, remote }
    }

    /// Unload path: cancel the pending commit and write the current copy to
    /// the primary layer synchronously. Secondary layers and the remote are
    /// skipped.
    pub fn on_unload(&self) -> Result<(), StorageError> {
        if self.scheduler.cancel(COMMIT_SLOT) {
            debug!(key = %self.key, "Pending commit replaced by unload write");
        }

        let snapshot = self.records();
        if let Err(e) = self.persistence.write_primary_sync(&self.key, &snapshot) {
            warn!(key = %self.key, error = %e, "Unload write failed");
            self.status.send_modify(|s| s.last_error = Some(e.to_string()));
            crate::metrics::record_commit(&self.key, "unload_failure", snapshot.len());
            return Err(e);
        }

        let beacon = self.write_beacon();
        self.status.send_modify(|s| {
            s.last_saved = beacon.saved_at();
            s.last_error = None;
        });
        crate::metrics::record_commit(&self.key, "unload", snapshot.len());
        self.events.publish(SyncEvent::Saved(beacon));
        Ok(())
    }

    #[must_use]
    pub fn save_status(&self) -> SaveStatus {
        self.status.borrow().clone()
    }

    /// Watch save-status changes.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<SaveStatus> {
        self.status.subscribe()
    }

    /// Cancel every timer this repository owns. A pending commit is dropped.
    pub fn dispose(&self) {
        let cancelled = self.scheduler.cancel_all();
        if cancelled > 0 {
            debug!(key = %self.key, cancelled, "Repository disposed with pending work");
        }
    }
}

impl<R: Record> Drop for RecordRepository<R> {
    fn drop(&mut self) {
        self.scheduler.cancel_all();
    }
}
