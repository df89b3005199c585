// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Divergence monitor.
//!
//! Compares a repository's in-memory copy against the shared backing store,
//! on a fixed interval and immediately after every local mutation or store
//! change notification.
//!
//! | Comparison                              | Action                          | State     |
//! |-----------------------------------------|---------------------------------|-----------|
//! | same identifier sets and counts         | none                            | Synced    |
//! | store has identifiers the copy lacks    | refresh signal (+ advisory)     | Diverging |
//! | copy has identifiers the store lacks    | push the copy to the store      | Diverging |
//! | store unreadable or unparseable         | none, retried next poll         | Error     |
//!
//! This is last-writer-wins, not a merge. Two sessions editing the same
//! record concurrently are not reconciled: whichever full snapshot lands
//! last replaces the other. When both sides hold identifiers the other
//! lacks, the local copy is pushed and a refresh is requested as well, so
//! the other session's additions are lost.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::events::{Advisory, AdvisoryAction, EventBus, SyncEvent};
use crate::model::Record;
use crate::repository::RecordRepository;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceState {
    Synced,
    Diverging,
    Error,
}

impl DivergenceState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Diverging => "diverging",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for DivergenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier-level comparison of the local copy against the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Divergence {
    /// In the store, not in the local copy
    pub remote_only: Vec<String>,
    /// In the local copy, not in the store
    pub local_only: Vec<String>,
    pub local_count: usize,
    pub remote_count: usize,
}

impl Divergence {
    /// The store holds something the session does not.
    ///
    /// Equal identifier sets with a longer store side also count.
    #[must_use]
    pub fn remote_ahead(&self) -> bool {
        !self.remote_only.is_empty()
            || (self.local_only.is_empty() && self.remote_count > self.local_count)
    }

    /// The session holds something the store does not.
    #[must_use]
    pub fn local_ahead(&self) -> bool {
        !self.local_only.is_empty()
            || (self.remote_only.is_empty() && self.local_count > self.remote_count)
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        !self.remote_ahead() && !self.local_ahead()
    }
}

/// Compare two identifier lists. Order is irrelevant; reported identifiers
/// keep their first-seen order.
pub fn classify<L, Rm>(local_ids: L, remote_ids: Rm) -> Divergence
where
    L: IntoIterator,
    L::Item: AsRef<str>,
    Rm: IntoIterator,
    Rm::Item: AsRef<str>,
{
    let local: Vec<String> = local_ids.into_iter().map(|id| id.as_ref().to_string()).collect();
    let remote: Vec<String> = remote_ids.into_iter().map(|id| id.as_ref().to_string()).collect();
    let local_set: HashSet<&str> = local.iter().map(String::as_str).collect();
    let remote_set: HashSet<&str> = remote.iter().map(String::as_str).collect();

    let mut seen = HashSet::new();
    let remote_only = remote
        .iter()
        .filter(|id| !local_set.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect();
    let mut seen = HashSet::new();
    let local_only = local
        .iter()
        .filter(|id| !remote_set.contains(id.as_str()) && seen.insert(id.as_str()))
        .cloned()
        .collect();

    Divergence {
        remote_only,
        local_only,
        local_count: local.len(),
        remote_count: remote.len(),
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Minimum gap between two "remote ahead" advisories
    pub refresh_cooldown: Duration,
    /// Consecutive failed checks before a persistent advisory
    pub error_streak: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for MonitorConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            refresh_cooldown: config.refresh_advisory_cooldown(),
            error_streak: config.divergence_error_streak.max(1),
        }
    }
}

pub struct DivergenceMonitor<R: Record> {
    key: String,
    repository: Arc<RecordRepository<R>>,
    events: EventBus,
    config: MonitorConfig,
    scheduler: Scheduler,
    state: watch::Sender<DivergenceState>,
    error_streak: AtomicU32,
    last_refresh_advisory: Mutex<Option<Instant>>,
    check_lock: tokio::sync::Mutex<()>,
}

impl<R: Record> DivergenceMonitor<R> {
    pub fn new(repository: Arc<RecordRepository<R>>, events: EventBus, config: MonitorConfig) -> Self {
        let key = repository.key().to_string();
        let (state, _rx) = watch::channel(DivergenceState::Synced);
        Self {
            scheduler: Scheduler::new(format!("monitor:{}", key)),
            key,
            repository,
            events,
            config,
            state,
            error_streak: AtomicU32::new(0),
            last_refresh_advisory: Mutex::new(None),
            check_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn state(&self) -> DivergenceState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<DivergenceState> {
        self.state.subscribe()
    }

    /// Compare once and act on the result.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn check(&self) -> DivergenceState {
        let _guard = self.check_lock.lock().await;

        let remote_ids = match self.read_store_ids() {
            Ok(ids) => ids,
            Err(reason) => return self.on_error(&reason),
        };
        self.error_streak.store(0, Ordering::Relaxed);

        let local = self.repository.records();
        let divergence = classify(local.iter().map(|r| r.id()), &remote_ids);

        if divergence.is_synced() {
            crate::metrics::record_divergence_check(&self.key, "synced");
            return self.transition(DivergenceState::Synced);
        }

        // A pending commit is about to make the store match the local copy,
        // in either direction
        let pending = self.repository.has_pending_commit();

        if divergence.remote_ahead() && pending {
            crate::metrics::record_divergence_check(&self.key, "remote_ahead");
            debug!(remote_only = divergence.remote_only.len(), "Store ahead of local edits, commit pending");
        } else if divergence.remote_ahead() {
            info!(
                remote_only = divergence.remote_only.len(),
                local = divergence.local_count,
                remote = divergence.remote_count,
                "Backing store is ahead, requesting refresh"
            );
            crate::metrics::record_divergence_check(&self.key, "remote_ahead");
            self.events.publish(SyncEvent::RefreshRequested { key: self.key.clone() });
            self.maybe_advise_refresh();
        }

        if divergence.local_ahead() {
            crate::metrics::record_divergence_check(&self.key, "local_ahead");
            if pending {
                debug!(local_only = divergence.local_only.len(), "Local ahead, commit already pending");
            } else {
                info!(
                    local_only = divergence.local_only.len(),
                    local = divergence.local_count,
                    remote = divergence.remote_count,
                    "Local copy is ahead, pushing"
                );
                let outcome = self.repository.persistence().write(&self.key, &local).await;
                if !outcome.success {
                    warn!("Push of local copy failed");
                }
            }
        }

        self.transition(DivergenceState::Diverging)
    }

    /// Identifiers stored in the primary layer. An absent key is an empty
    /// collection; anything unreadable is an error.
    fn read_store_ids(&self) -> Result<Vec<String>, String> {
        let raw = match self.repository.persistence().primary().get_item(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(Vec::new()),
            Err(e) => return Err(e.to_string()),
        };
        let value: Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        let entries = R::entries_from_value(&value)
            .ok_or_else(|| "stored value is not a collection".to_string())?;

        Ok(entries
            .iter()
            .map(|entry| match entry.get(R::ID_FIELD) {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => String::new(),
            })
            .collect())
    }

    fn on_error(&self, reason: &str) -> DivergenceState {
        let streak = self.error_streak.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(key = %self.key, reason, streak, "Divergence check failed");
        crate::metrics::record_divergence_check(&self.key, "error");

        if streak == self.config.error_streak {
            self.events.advise(
                Advisory::persistent(format!(
                    "Saved {} data has been unreadable for {} checks in a row",
                    R::KIND,
                    streak
                ))
                .with_action(AdvisoryAction::ResetAndReload),
            );
        }
        self.transition(DivergenceState::Error)
    }

    fn maybe_advise_refresh(&self) {
        let now = Instant::now();
        let mut last = self.last_refresh_advisory.lock();
        let due = last.map_or(true, |at| now.duration_since(at) >= self.config.refresh_cooldown);
        if due {
            *last = Some(now);
            self.events.advise(
                Advisory::info(format!("Newer {} data is available", R::KIND))
                    .with_action(AdvisoryAction::Reload),
            );
        }
    }

    fn transition(&self, next: DivergenceState) -> DivergenceState {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(key = %self.key, from = %previous, to = %next, "Divergence state changed");
            self.events.publish(SyncEvent::DivergenceChanged { key: self.key.clone(), state: next });
        }
        next
    }

    /// Start polling. Also checks right after every mutation of this
    /// repository and every store change notification for its key.
    pub fn spawn(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let key = self.key.clone();
        let period = self.config.poll_interval;
        let mut events = self.events.subscribe();
        let mut changes = self.repository.persistence().primary().subscribe();

        self.scheduler.spawn("poll", async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    event = events.recv() => match event {
                        Ok(SyncEvent::Mutated { key: changed }) if changed == key => {}
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => debug!(skipped, "Monitor lagged on events"),
                        Err(RecvError::Closed) => break,
                    },
                    change = changes.recv() => match change {
                        Ok(change) if change.key == key => {}
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => debug!(skipped, "Monitor lagged on store changes"),
                        Err(RecvError::Closed) => break,
                    },
                }

                let Some(monitor) = weak.upgrade() else { break };
                monitor.check().await;
            }
        });
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scheduler.is_pending("poll")
    }

    /// Stop polling.
    pub fn stop(&self) {
        if self.scheduler.cancel("poll") {
            debug!(key = %self.key, "Monitor stopped");
        }
    }
}
