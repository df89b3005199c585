// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Quota exceeded writing '{key}': need {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Storage layer unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    #[must_use]
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Short label for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota",
            Self::Serialization(_) => "serialization",
            Self::Backend(_) => "backend",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Change notification emitted by a [`KeyValueStore`] after every write.
///
/// This is the cross-session signal: anyone sharing the store sees every
/// change, including ones made by other repositories or other hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    /// New value, `None` when the key was removed or the store cleared
    pub new_value: Option<String>,
}

/// A storage layer: uniform async {read, write, remove, clear} over string keys.
///
/// Values are JSON text; layers never interpret them.
#[async_trait]
pub trait StorageLayer: Send + Sync {
    /// Layer name for logs and metrics
    fn name(&self) -> &str;

    async fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;
}

/// The primary, synchronous key-value store.
///
/// Reads and writes complete immediately, which is what lets the unload path
/// persist state without awaiting anything.
pub trait KeyValueStore: StorageLayer {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn clear_all(&self) -> Result<(), StorageError>;

    /// All keys currently stored
    fn keys(&self) -> Vec<String>;

    /// Subscribe to change notifications
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}
