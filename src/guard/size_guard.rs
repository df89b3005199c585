// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capacity guard for the primary key-value store.
//!
//! # Enforcement stages
//!
//! `enforce()` only runs when usage is at or above the hard threshold, and
//! stops as soon as usage drops below it:
//!
//! 1. **Retention**: in record collections under a known prefix, records beyond
//!    `max_retained` (newest by `createdAt` are kept) are first stripped to the
//!    projection fields. If that is not enough, the excess is removed.
//! 2. **Ancillary**: keys matching no known prefix are removed.
//! 3. **Last resort**: the largest remaining key is removed, repeatedly.
//!
//! Every eviction is logged with key and bytes freed, counted in metrics and
//! published as [`SyncEvent::Evicted`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use super::pressure::StoragePressure;
use crate::config::SyncConfig;
use crate::events::{Advisory, AdvisoryAction, EventBus, SyncEvent};
use crate::scheduler::Scheduler;
use crate::storage::KeyValueStore;

/// Guard thresholds and retention policy.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub capacity_bytes: usize,
    pub soft_threshold: f64,
    pub hard_threshold: f64,
    pub max_retained: usize,
    pub projection_fields: Vec<String>,
    pub known_prefixes: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for GuardConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            capacity_bytes: config.storage_capacity_bytes,
            soft_threshold: config.storage_soft_threshold,
            hard_threshold: config.storage_hard_threshold,
            max_retained: config.max_retained_records,
            projection_fields: config.projection_fields.clone(),
            known_prefixes: config.known_prefixes.clone(),
        }
    }
}

/// Bytes held by one key (key + value length).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUsage {
    pub key: String,
    pub bytes: usize,
}

/// Snapshot of primary store usage.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageUsage {
    pub bytes_used: usize,
    /// 0.0 → 100.0 (may exceed 100 if the assumed capacity is too small)
    pub percent_of_cap: f64,
    /// Largest first
    pub per_key: Vec<KeyUsage>,
}

impl StorageUsage {
    #[must_use]
    pub fn ratio(&self) -> f64 {
        self.percent_of_cap / 100.0
    }
}

/// Result of one background sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepOutcome {
    /// Pressure after the sweep
    pub pressure: StoragePressure,
    pub reclaimed: usize,
}

pub struct StorageSizeGuard {
    store: Arc<dyn KeyValueStore>,
    config: GuardConfig,
    events: Option<EventBus>,
    last_pressure: Mutex<StoragePressure>,
}

impl StorageSizeGuard {
    pub fn new(store: Arc<dyn KeyValueStore>, config: GuardConfig) -> Self {
        Self {
            store,
            config,
            events: None,
            last_pressure: Mutex::new(StoragePressure::Normal),
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Measure the primary store.
    pub fn get_usage(&self) -> StorageUsage {
        let mut per_key: Vec<KeyUsage> = self
            .store
            .keys()
            .into_iter()
            .filter_map(|key| {
                let value = self.store.get_item(&key).ok().flatten()?;
                let bytes = key.len() + value.len();
                Some(KeyUsage { key, bytes })
            })
            .collect();
        per_key.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.key.cmp(&b.key)));

        let bytes_used = per_key.iter().map(|k| k.bytes).sum();
        let percent_of_cap = if self.config.capacity_bytes == 0 {
            100.0
        } else {
            bytes_used as f64 / self.config.capacity_bytes as f64 * 100.0
        };

        StorageUsage { bytes_used, percent_of_cap, per_key }
    }

    #[must_use]
    pub fn pressure(&self) -> StoragePressure {
        self.pressure_of(&self.get_usage())
    }

    fn pressure_of(&self, usage: &StorageUsage) -> StoragePressure {
        StoragePressure::from_ratio(
            usage.ratio(),
            self.config.soft_threshold,
            self.config.hard_threshold,
        )
    }

    /// Would usage plus `extra` bytes sit at or above the hard threshold?
    /// The current value of `protected` is about to be replaced and does not
    /// count.
    fn over_hard_for(&self, protected: Option<&str>, extra: usize) -> bool {
        if self.config.capacity_bytes == 0 {
            return true;
        }
        let replaced = protected.map_or(0, |key| self.entry_bytes(key));
        let used = self.get_usage().bytes_used.saturating_sub(replaced);
        let ratio = (used + extra) as f64 / self.config.capacity_bytes as f64;
        ratio >= self.config.hard_threshold
    }

    /// Reclaim space until usage is below the hard threshold.
    ///
    /// Returns bytes reclaimed. A no-op returning 0 when usage is already under
    /// the hard threshold, so calling it twice in a row frees nothing the
    /// second time.
    pub fn enforce(&self) -> usize {
        self.reclaim(None, 0)
    }

    /// Make room for `incoming` bytes about to be written under `key`.
    ///
    /// Used when a write was refused for lack of quota. `key` itself is never
    /// compacted or evicted, so a write that still fails leaves its previous
    /// value in place. A value larger than the whole capacity is refused
    /// without evicting anything.
    #[instrument(skip(self))]
    pub fn make_room(&self, key: &str, incoming: usize) -> usize {
        if incoming > self.config.capacity_bytes {
            warn!(
                key,
                incoming,
                capacity = self.config.capacity_bytes,
                "Value cannot fit in storage, skipping enforcement"
            );
            return 0;
        }
        self.reclaim(Some(key), incoming)
    }

    fn reclaim(&self, protected: Option<&str>, incoming: usize) -> usize {
        let start = self.get_usage();
        if !self.over_hard_for(protected, incoming) {
            debug!(percent = start.percent_of_cap, incoming, "Below hard threshold, nothing to enforce");
            return 0;
        }
        warn!(
            bytes_used = start.bytes_used,
            percent = start.percent_of_cap,
            incoming,
            "Storage over hard threshold, enforcing"
        );

        self.enforce_retention(protected, incoming);
        if self.over_hard_for(protected, incoming) {
            self.remove_ancillary(protected, incoming);
        }
        while self.over_hard_for(protected, incoming) {
            let usage = self.get_usage();
            let Some(largest) = usage.per_key.iter().find(|k| Some(k.key.as_str()) != protected) else {
                break;
            };
            if !self.evict_key(&largest.key, "last_resort") {
                break;
            }
        }

        let end = self.get_usage();
        crate::metrics::set_storage_bytes(end.bytes_used);
        crate::metrics::set_storage_usage(end.ratio());
        let reclaimed = start.bytes_used.saturating_sub(end.bytes_used);
        info!(reclaimed, bytes_used = end.bytes_used, "Enforcement complete");
        reclaimed
    }

    /// Stage 1: project, then drop, records beyond the retention cap.
    fn enforce_retention(&self, protected: Option<&str>, incoming: usize) {
        for key in self.store.keys() {
            if !self.is_known(&key) || Some(key.as_str()) == protected {
                continue;
            }
            let Some(entries) = self.read_collection(&key) else { continue };
            if entries.len() <= self.config.max_retained {
                continue;
            }

            let kept = retained_indices(&entries, self.config.max_retained);
            let compacted: Vec<Value> = entries
                .iter()
                .enumerate()
                .map(|(i, e)| {
                    if kept.contains(&i) {
                        e.clone()
                    } else {
                        project(e, &self.config.projection_fields)
                    }
                })
                .collect();
            self.rewrite(&key, &compacted, "projection");

            if self.over_hard_for(protected, incoming) {
                let retained: Vec<Value> = entries
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| kept.contains(i))
                    .map(|(_, e)| e)
                    .collect();
                self.rewrite(&key, &retained, "retention");
            }
        }
    }

    /// Stage 2: remove keys outside every known domain prefix.
    fn remove_ancillary(&self, protected: Option<&str>, incoming: usize) {
        for key in self.store.keys() {
            if !self.is_known(&key) && Some(key.as_str()) != protected {
                self.evict_key(&key, "ancillary");
                if !self.over_hard_for(protected, incoming) {
                    return;
                }
            }
        }
    }

    fn is_known(&self, key: &str) -> bool {
        self.config.known_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    fn read_collection(&self, key: &str) -> Option<Vec<Value>> {
        let raw = self.store.get_item(key).ok().flatten()?;
        match serde_json::from_str::<Value>(&raw).ok()? {
            Value::Array(items) if items.iter().all(Value::is_object) => Some(items),
            _ => None,
        }
    }

    fn rewrite(&self, key: &str, entries: &[Value], stage: &'static str) {
        let before = self.entry_bytes(key);
        let text = match serde_json::to_string(entries) {
            Ok(text) => text,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize compacted collection");
                return;
            }
        };
        if let Err(e) = self.store.set_item(key, &text) {
            warn!(key, error = %e, "Failed to rewrite compacted collection");
            return;
        }
        let freed = before.saturating_sub(key.len() + text.len());
        self.record_eviction(key, freed, stage);
    }

    fn evict_key(&self, key: &str, stage: &'static str) -> bool {
        let before = self.entry_bytes(key);
        match self.store.remove_item(key) {
            Ok(()) => {
                self.record_eviction(key, before, stage);
                true
            }
            Err(e) => {
                warn!(key, error = %e, "Failed to evict key");
                false
            }
        }
    }

    fn entry_bytes(&self, key: &str) -> usize {
        self.store
            .get_item(key)
            .ok()
            .flatten()
            .map_or(0, |v| key.len() + v.len())
    }

    fn record_eviction(&self, key: &str, bytes: usize, stage: &'static str) {
        info!(key, bytes, stage, "Evicted");
        crate::metrics::record_eviction(stage, bytes);
        if let Some(events) = &self.events {
            events.publish(SyncEvent::Evicted { key: key.to_string(), bytes });
        }
    }

    /// Check usage and act on it: advise at soft, enforce at hard.
    ///
    /// The soft advisory is published on the transition into soft pressure,
    /// not on every sweep. If enforcement cannot get below the hard
    /// threshold an "export a backup" advisory is published.
    pub fn sweep(&self) -> SweepOutcome {
        let usage = self.get_usage();
        let pressure = self.pressure_of(&usage);
        crate::metrics::set_storage_bytes(usage.bytes_used);
        crate::metrics::set_storage_usage(usage.ratio());

        let previous = std::mem::replace(&mut *self.last_pressure.lock(), pressure);

        let (pressure, reclaimed) = match pressure {
            StoragePressure::Normal => (pressure, 0),
            StoragePressure::Soft => {
                if previous < StoragePressure::Soft {
                    self.advise(Advisory::warning(format!(
                        "Storage is {:.0}% full; consider exporting a backup",
                        usage.percent_of_cap
                    )));
                }
                (pressure, 0)
            }
            StoragePressure::Hard => {
                let reclaimed = self.enforce();
                let after = self.pressure();
                if after.should_enforce() {
                    self.advise(
                        Advisory::persistent("Storage is full and could not be reclaimed")
                            .with_action(AdvisoryAction::ExportBackup),
                    );
                }
                *self.last_pressure.lock() = after;
                (after, reclaimed)
            }
        };

        crate::metrics::set_storage_pressure(pressure.level());
        SweepOutcome { pressure, reclaimed }
    }

    fn advise(&self, advisory: Advisory) {
        if let Some(events) = &self.events {
            events.advise(advisory);
        }
    }

    /// Run `sweep()` every `period` on the scheduler's `guard_sweep` slot.
    pub fn spawn_sweeper(self: &Arc<Self>, scheduler: &Scheduler, period: Duration) {
        let guard = Arc::clone(self);
        scheduler.spawn("guard_sweep", async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = guard.sweep();
                debug!(pressure = %outcome.pressure, reclaimed = outcome.reclaimed, "Guard sweep");
            }
        });
    }
}

/// Indices of the `keep` newest entries by `createdAt`. Later array position
/// breaks ties and stands in when the timestamp is absent.
fn retained_indices(entries: &[Value], keep: usize) -> HashSet<usize> {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&ia, &ib| {
        let ca = entries[ia].get("createdAt").and_then(Value::as_str);
        let cb = entries[ib].get("createdAt").and_then(Value::as_str);
        cb.cmp(&ca).then_with(|| ib.cmp(&ia))
    });
    order.into_iter().take(keep).collect()
}

fn project(entry: &Value, fields: &[String]) -> Value {
    let Some(obj) = entry.as_object() else { return entry.clone() };
    let projected: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| fields.iter().any(|f| f == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(projected)
}
