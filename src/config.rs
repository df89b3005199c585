// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the campaign sync core.
//!
//! # Example
//!
//! ```
//! use campaign_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.debounce_ms, 500);
//! assert_eq!(config.storage_capacity_bytes, 5 * 1024 * 1024); // 5 MB
//!
//! // Full config
//! let config = SyncConfig {
//!     secondary_db_url: Some("sqlite:planner.db?mode=rwc".into()),
//!     debounce_ms: 250,
//!     poll_interval_ms: 5_000,
//!     ..Default::default()
//! };
//! assert_eq!(config.debounce().as_millis(), 250);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::remote::RemoteTarget;

/// Configuration for the sync core.
///
/// All fields have sensible defaults. Remote sync is off unless `remote` is set,
/// and the secondary database layer is off unless `secondary_db_url` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Trailing debounce window for repository commits (default: 500ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Divergence monitor polling period (default: 10s)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Minimum gap between two "remote ahead" advisories
    #[serde(default = "default_refresh_advisory_cooldown_secs")]
    pub refresh_advisory_cooldown_secs: u64,

    /// Consecutive failed polls before the monitor raises an advisory
    #[serde(default = "default_divergence_error_streak")]
    pub divergence_error_streak: u32,

    /// Assumed capacity of the primary key-value store in bytes (default: 5 MB)
    #[serde(default = "default_storage_capacity_bytes")]
    pub storage_capacity_bytes: usize,

    /// Capacity thresholds
    #[serde(default = "default_storage_soft_threshold")]
    pub storage_soft_threshold: f64,
    #[serde(default = "default_storage_hard_threshold")]
    pub storage_hard_threshold: f64,

    /// Records kept in full per collection when the guard has to enforce
    #[serde(default = "default_max_retained_records")]
    pub max_retained_records: usize,

    /// Fields kept when an excess record is stripped to a minimal projection
    #[serde(default = "default_projection_fields")]
    pub projection_fields: Vec<String>,

    /// Key prefixes that hold domain data (anything else is ancillary)
    #[serde(default = "default_known_prefixes")]
    pub known_prefixes: Vec<String>,

    /// Background guard sweep period in seconds (0 = disabled)
    #[serde(default = "default_guard_sweep_interval_secs")]
    pub guard_sweep_interval_secs: u64,

    /// SQLite connection string for the larger-capacity secondary layer
    #[serde(default)]
    pub secondary_db_url: Option<String>,

    /// Remote document-store target (remote sync disabled when absent)
    #[serde(default)]
    pub remote: Option<RemoteTarget>,

    /// Directory backups are written to (defaults to the system temp dir)
    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    /// Event bus channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_debounce_ms() -> u64 { 500 }
fn default_poll_interval_ms() -> u64 { 10_000 }
fn default_refresh_advisory_cooldown_secs() -> u64 { 60 }
fn default_divergence_error_streak() -> u32 { 3 }
fn default_storage_capacity_bytes() -> usize { 5 * 1024 * 1024 } // 5 MB
fn default_storage_soft_threshold() -> f64 { 0.80 }
fn default_storage_hard_threshold() -> f64 { 0.95 }
fn default_max_retained_records() -> usize { 500 }
fn default_projection_fields() -> Vec<String> {
    ["id", "owner", "campaignType", "status", "createdAt"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_known_prefixes() -> Vec<String> {
    ["campaigns", "budgets", crate::repository::BEACON_PREFIX]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_guard_sweep_interval_secs() -> u64 { 30 }
fn default_event_capacity() -> usize { 256 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            refresh_advisory_cooldown_secs: default_refresh_advisory_cooldown_secs(),
            divergence_error_streak: default_divergence_error_streak(),
            storage_capacity_bytes: default_storage_capacity_bytes(),
            storage_soft_threshold: default_storage_soft_threshold(),
            storage_hard_threshold: default_storage_hard_threshold(),
            max_retained_records: default_max_retained_records(),
            projection_fields: default_projection_fields(),
            known_prefixes: default_known_prefixes(),
            guard_sweep_interval_secs: default_guard_sweep_interval_secs(),
            secondary_db_url: None,
            remote: None,
            download_dir: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn refresh_advisory_cooldown(&self) -> Duration {
        Duration::from_secs(self.refresh_advisory_cooldown_secs)
    }

    /// Directory backups are written to.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
