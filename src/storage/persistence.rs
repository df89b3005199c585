// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Multi-layer persistence.
//!
//! One logical value is mirrored across an ordered list of layers: the
//! primary [`KeyValueStore`] first, then any number of larger fallback layers.
//!
//! ```text
//!                 write: fan out to every layer
//!        ┌──────────────────┬──────────────────┐
//!        ▼                  ▼                  ▼
//!   ┌─────────┐       ┌──────────┐       ┌──────────┐
//!   │ primary │       │ layer 1  │  ...  │ layer n  │
//!   └─────────┘       └──────────┘       └──────────┘
//!        read: first layer with a valid value wins ──▶
//! ```
//!
//! - Reads try layers in order. A layer is skipped when its value is absent,
//!   unparseable, or fails the structural check. All layers failing is a
//!   cold start, not an error.
//! - Writes go to every layer; one layer failing never stops the others. The
//!   write succeeds when the primary layer did.
//! - A quota failure on the primary triggers one round of guard enforcement
//!   ([`StorageSizeGuard::make_room`]) and one retry. The key being written
//!   is never evicted to make room, so a failed retry leaves the previous
//!   value intact. If the retry fails, an "export a backup" advisory is
//!   published.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::traits::{KeyValueStore, StorageError, StorageLayer};
use crate::events::{Advisory, AdvisoryAction, EventBus};
use crate::guard::StorageSizeGuard;
use crate::metrics::LatencyTimer;

/// Structural check applied to a layer's value on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCheck {
    /// Any parseable JSON
    Any,
    /// An array whose entries are all objects
    RecordCollection,
}

impl ReadCheck {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::RecordCollection => is_record_collection(value),
        }
    }
}

/// `true` for an array of objects.
#[must_use]
pub fn is_record_collection(value: &Value) -> bool {
    value.as_array().is_some_and(|items| items.iter().all(Value::is_object))
}

/// Why a layer's value was not used.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Absent,
    Unreadable(StorageError),
    Unparseable(String),
    /// Parsed, but failed the structural check
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub layer: String,
    pub reason: RejectReason,
    /// The parsed value, kept for repair when it was parseable
    pub raw: Option<Value>,
}

/// Result of a layered read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadReport {
    pub value: Option<Value>,
    /// Layer the value came from
    pub source: Option<String>,
    pub rejections: Vec<Rejection>,
}

impl ReadReport {
    /// Nothing stored anywhere: every layer was simply empty.
    #[must_use]
    pub fn is_cold_start(&self) -> bool {
        self.value.is_none()
            && self.rejections.iter().all(|r| r.reason == RejectReason::Absent)
    }

    /// First parseable-but-malformed value, the best candidate for repair.
    #[must_use]
    pub fn salvageable(&self) -> Option<&Value> {
        self.rejections
            .iter()
            .find(|r| r.reason == RejectReason::Malformed)
            .and_then(|r| r.raw.as_ref())
    }

    /// Deserialize the value, falling back to `default`.
    pub fn into_or<T: DeserializeOwned>(self, default: T) -> T {
        self.value
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(default)
    }
}

/// Per-layer write result.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerOutcome {
    pub layer: String,
    pub result: Result<(), StorageError>,
}

/// Aggregate write result.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub layers: Vec<LayerOutcome>,
    /// The primary layer accepted the write
    pub success: bool,
}

impl WriteOutcome {
    fn serialization_failed(layers: &[Arc<dyn StorageLayer>], err: StorageError) -> Self {
        Self {
            layers: layers
                .iter()
                .map(|l| LayerOutcome { layer: l.name().to_string(), result: Err(err.clone()) })
                .collect(),
            success: false,
        }
    }

    #[must_use]
    pub fn primary(&self) -> Option<&LayerOutcome> {
        self.layers.first()
    }

    /// First error on the primary layer, if any
    #[must_use]
    pub fn primary_error(&self) -> Option<&StorageError> {
        self.primary().and_then(|o| o.result.as_ref().err())
    }

    pub fn failed_layers(&self) -> impl Iterator<Item = &LayerOutcome> {
        self.layers.iter().filter(|o| o.result.is_err())
    }
}

pub struct MultiLayerPersistence {
    primary: Arc<dyn KeyValueStore>,
    primary_name: String,
    /// Read/write order; `layers[0]` is the primary
    layers: RwLock<Vec<Arc<dyn StorageLayer>>>,
    guard: Option<Arc<StorageSizeGuard>>,
    events: Option<EventBus>,
}

impl MultiLayerPersistence {
    pub fn new<P>(primary: Arc<P>) -> Self
    where
        P: KeyValueStore + 'static,
    {
        let as_layer: Arc<dyn StorageLayer> = primary.clone();
        Self {
            primary_name: as_layer.name().to_string(),
            primary,
            layers: RwLock::new(vec![as_layer]),
            guard: None,
            events: None,
        }
    }

    /// Append a fallback layer (read after, written alongside, the primary).
    #[must_use]
    pub fn with_layer(mut self, layer: Arc<dyn StorageLayer>) -> Self {
        self.layers.get_mut().push(layer);
        self
    }

    /// Append a fallback layer to a running instance.
    pub fn attach_layer(&self, layer: Arc<dyn StorageLayer>) {
        debug!(layer = layer.name(), "Attaching storage layer");
        self.layers.write().push(layer);
    }

    /// Current layers, so no lock is held across awaits.
    fn layers(&self) -> Vec<Arc<dyn StorageLayer>> {
        self.layers.read().clone()
    }

    #[must_use]
    pub fn with_guard(mut self, guard: Arc<StorageSizeGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn primary(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.primary)
    }

    /// Layer names in read order
    #[must_use]
    pub fn layer_names(&self) -> Vec<String> {
        self.layers.read().iter().map(|l| l.name().to_string()).collect()
    }

    /// Read from the first layer holding a valid value.
    #[instrument(skip(self))]
    pub async fn read(&self, key: &str, check: ReadCheck) -> ReadReport {
        let mut report = ReadReport::default();

        for layer in self.layers() {
            let name = layer.name().to_string();
            let _timer = LatencyTimer::new("persistence", "read");

            let raw = match layer.read(key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    debug!(key, layer = %name, "Miss");
                    report.rejections.push(Rejection { layer: name, reason: RejectReason::Absent, raw: None });
                    continue;
                }
                Err(e) => {
                    warn!(key, layer = %name, error = %e, "Layer read failed");
                    crate::metrics::record_error(&name, "read", e.kind());
                    report.rejections.push(Rejection { layer: name, reason: RejectReason::Unreadable(e), raw: None });
                    continue;
                }
            };

            let value = match serde_json::from_str::<Value>(&raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!(key, layer = %name, error = %e, "Stored value is not valid JSON");
                    crate::metrics::record_operation(&name, "read", "corrupt");
                    report.rejections.push(Rejection {
                        layer: name,
                        reason: RejectReason::Unparseable(e.to_string()),
                        raw: None,
                    });
                    continue;
                }
            };

            if !check.accepts(&value) {
                warn!(key, layer = %name, "Stored value failed structural check");
                crate::metrics::record_operation(&name, "read", "malformed");
                report.rejections.push(Rejection { layer: name, reason: RejectReason::Malformed, raw: Some(value) });
                continue;
            }

            debug!(key, layer = %name, "Hit");
            crate::metrics::record_operation(&name, "read", "success");
            report.value = Some(value);
            report.source = Some(name);
            return report;
        }

        report
    }

    /// Read a record collection (array of objects).
    pub async fn read_collection(&self, key: &str) -> ReadReport {
        self.read(key, ReadCheck::RecordCollection).await
    }

    /// Read and deserialize, falling back to `default` on any failure.
    pub async fn read_or<T: DeserializeOwned>(&self, key: &str, check: ReadCheck, default: T) -> T {
        self.read(key, check).await.into_or(default)
    }

    /// Write to every layer.
    #[instrument(skip(self, value))]
    pub async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> WriteOutcome {
        let targets = self.layers();
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(e) => {
                warn!(key, error = %e, "Serialization failed, nothing written");
                return WriteOutcome::serialization_failed(&targets, e.into());
            }
        };

        let mut layers = Vec::with_capacity(targets.len());
        let primary_result = self.write_primary_text(key, &text);
        let success = primary_result.is_ok();
        layers.push(LayerOutcome { layer: self.primary_name.clone(), result: primary_result });

        for layer in targets.iter().skip(1) {
            let name = layer.name().to_string();
            let _timer = LatencyTimer::new("persistence", "write");
            let result = layer.write(key, &text).await;
            match &result {
                Ok(()) => {
                    crate::metrics::record_operation(&name, "write", "success");
                    crate::metrics::record_bytes_written(&name, text.len());
                }
                Err(e) => {
                    warn!(key, layer = %name, error = %e, "Layer write failed");
                    crate::metrics::record_error(&name, "write", e.kind());
                }
            }
            layers.push(LayerOutcome { layer: name, result });
        }

        WriteOutcome { layers, success }
    }

    /// Synchronous write to the primary layer only.
    pub fn write_primary_sync<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let text = serde_json::to_string(value)?;
        self.write_primary_text(key, &text)
    }

    fn write_primary_text(&self, key: &str, text: &str) -> Result<(), StorageError> {
        let name = self.primary_name.as_str();
        let result = match self.primary.set_item(key, text) {
            Err(e) if e.is_quota() => match &self.guard {
                Some(guard) => {
                    warn!(key, error = %e, "Primary quota exceeded, enforcing limits and retrying");
                    let needed = match &e {
                        StorageError::QuotaExceeded { needed, .. } => *needed,
                        _ => key.len() + text.len(),
                    };
                    let reclaimed = guard.make_room(key, needed);
                    debug!(key, reclaimed, "Retrying after enforcement");
                    self.primary.set_item(key, text)
                }
                None => Err(e),
            },
            other => other,
        };

        match &result {
            Ok(()) => {
                crate::metrics::record_operation(&name, "write", "success");
                crate::metrics::record_bytes_written(&name, text.len());
            }
            Err(e) => {
                warn!(key, layer = %name, error = %e, "Primary write failed");
                crate::metrics::record_error(&name, "write", e.kind());
                if e.is_quota() {
                    self.advise(
                        Advisory::persistent("Local storage is full; export a backup to avoid losing changes")
                            .with_action(AdvisoryAction::ExportBackup),
                    );
                }
            }
        }
        result
    }

    /// Remove `key` from every layer.
    pub async fn remove(&self, key: &str) -> Vec<LayerOutcome> {
        let layers = self.layers();
        let mut outcomes = Vec::with_capacity(layers.len());
        for layer in layers {
            let result = layer.remove(key).await;
            if let Err(e) = &result {
                warn!(key, layer = layer.name(), error = %e, "Layer remove failed");
            }
            outcomes.push(LayerOutcome { layer: layer.name().to_string(), result });
        }
        outcomes
    }

    /// Clear every layer, continuing past failures.
    pub async fn clear_all(&self) -> Vec<LayerOutcome> {
        let layers = self.layers();
        let mut outcomes = Vec::with_capacity(layers.len());
        for layer in layers {
            let result = layer.clear().await;
            if let Err(e) = &result {
                warn!(layer = layer.name(), error = %e, "Layer clear failed");
                crate::metrics::record_error(layer.name(), "clear", e.kind());
            }
            outcomes.push(LayerOutcome { layer: layer.name().to_string(), result });
        }
        outcomes
    }

    fn advise(&self, advisory: Advisory) {
        if let Some(events) = &self.events {
            events.advise(advisory);
        }
    }
}
