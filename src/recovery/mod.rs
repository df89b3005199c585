// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Corruption repair, full reset and backup export.

mod backup;
mod repair;

pub use backup::{BackupDocument, BACKUP_FORMAT_VERSION};
pub use repair::{repair, repair_collection, RepairReport};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::events::{EventBus, SyncEvent};
use crate::model::Record;
use crate::storage::{LayerOutcome, MultiLayerPersistence, StorageError};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Backup I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Backup serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result of clearing every storage layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetOutcome {
    pub layers: Vec<LayerOutcome>,
}

impl ResetOutcome {
    /// Every layer cleared
    #[must_use]
    pub fn success(&self) -> bool {
        self.layers.iter().all(|o| o.result.is_ok())
    }
}

pub struct DataRecoveryService {
    persistence: Arc<MultiLayerPersistence>,
    events: EventBus,
    download_dir: PathBuf,
}

impl DataRecoveryService {
    pub fn new(persistence: Arc<MultiLayerPersistence>, events: EventBus, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            persistence,
            events,
            download_dir: download_dir.into(),
        }
    }

    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Coerce any value into well-formed records. Never fails.
    pub fn repair<R: Record>(&self, raw: &Value) -> Vec<R> {
        let report = repair_collection::<R>(raw);
        if !report.is_clean() {
            warn!(
                kind = R::KIND,
                records = report.records.len(),
                fixes = report.fixes,
                rekeyed = report.rekeyed,
                was_collection = report.was_collection,
                "Repaired stored records"
            );
            crate::metrics::record_repair(R::KIND, report.fixes, report.rekeyed);
        }
        report.records
    }

    /// Clear every storage layer, then ask the host to reload.
    ///
    /// Layers that fail to clear are reported in the outcome; the others are
    /// still cleared.
    #[instrument(skip(self))]
    pub async fn reset_all(&self) -> ResetOutcome {
        let layers = self.persistence.clear_all().await;
        let outcome = ResetOutcome { layers };
        if outcome.success() {
            info!("All storage layers cleared");
        } else {
            warn!(
                failed = outcome.layers.iter().filter(|o| o.result.is_err()).count(),
                "Reset left some layers uncleared"
            );
        }
        self.events.publish(SyncEvent::ReloadRequested);
        outcome
    }

    /// Write a backup of `records` into the download directory.
    pub fn export_backup<R: Record>(&self, records: &[R]) -> Result<PathBuf, RecoveryError> {
        let doc = BackupDocument::new(records.to_vec());
        let path = backup::write_document(&self.download_dir, R::KIND, &doc)?;
        info!(kind = R::KIND, records = records.len(), path = %path.display(), "Backup exported");
        Ok(path)
    }

    /// Read a backup file back, repairing its records.
    pub fn read_backup<R: Record>(&self, path: &Path) -> Result<BackupDocument<R>, RecoveryError> {
        let raw = backup::read_document(path)?;
        let records = self.repair::<R>(&Value::Array(raw.records));
        Ok(BackupDocument { records, timestamp: raw.timestamp, version: raw.version })
    }
}
