// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Primary key-value store.
//!
//! A quota-bounded, synchronous string store with change notifications, the
//! same contract a browser's persistent key-value storage offers. Usage is
//! measured as `key.len() + value.len()` bytes per entry.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::traits::{KeyValueStore, StorageChange, StorageError, StorageLayer};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

pub struct LocalStore {
    data: DashMap<String, String>,
    used_bytes: AtomicUsize,
    quota_bytes: usize,
    /// Serialises writers so the quota check and the insert are atomic.
    write_lock: Mutex<()>,
    changes: broadcast::Sender<StorageChange>,
}

impl LocalStore {
    /// Create a store with the given quota in bytes.
    #[must_use]
    pub fn new(quota_bytes: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            data: DashMap::new(),
            used_bytes: AtomicUsize::new(0),
            quota_bytes,
            write_lock: Mutex::new(()),
            changes,
        }
    }

    /// Get current entry count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes currently stored (keys + values)
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    fn entry_size(key: &str, value: &str) -> usize {
        key.len() + value.len()
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        let _ = self.changes.send(StorageChange { key: key.to_string(), new_value });
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new(5 * 1024 * 1024)
    }
}

impl KeyValueStore for LocalStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        {
            let _guard = self.write_lock.lock();
            let new_size = Self::entry_size(key, value);
            let old_size = self
                .data
                .get(key)
                .map(|r| Self::entry_size(key, r.value()))
                .unwrap_or(0);
            let used = self.used_bytes.load(Ordering::Acquire);
            let projected = used - old_size + new_size;
            if projected > self.quota_bytes {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed: new_size,
                    available: self.quota_bytes.saturating_sub(used - old_size),
                });
            }
            self.data.insert(key.to_string(), value.to_string());
            self.used_bytes.store(projected, Ordering::Release);
            debug!(key, bytes = new_size, used = projected, "Local store write");
        }
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let removed = {
            let _guard = self.write_lock.lock();
            match self.data.remove(key) {
                Some((k, v)) => {
                    self.used_bytes.fetch_sub(Self::entry_size(&k, &v), Ordering::AcqRel);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.notify(key, None);
        }
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StorageError> {
        let keys = {
            let _guard = self.write_lock.lock();
            let keys = self.keys();
            self.data.clear();
            self.used_bytes.store(0, Ordering::Release);
            keys
        };
        for key in keys {
            self.notify(&key, None);
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.data.iter().map(|r| r.key().clone()).collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[async_trait]
impl StorageLayer for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.get_item(key)
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_item(key, value)
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.remove_item(key)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.clear_all()
    }
}
