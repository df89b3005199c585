// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync core.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `campaign_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for sizes
//!
//! # Labels
//! - `layer`: local, sqlite, remote
//! - `operation`: read, write, commit, check, enforce
//! - `status`: success, error, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a storage or sync operation
pub fn record_operation(layer: &str, operation: &str, status: &str) {
    counter!(
        "campaign_sync_operations_total",
        "layer" => layer.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(layer: &str, operation: &str, duration: Duration) {
    histogram!(
        "campaign_sync_operation_seconds",
        "layer" => layer.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an error with category for alerting
pub fn record_error(layer: &str, operation: &str, error_type: &str) {
    counter!(
        "campaign_sync_errors_total",
        "layer" => layer.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record bytes written to a layer
pub fn record_bytes_written(layer: &str, bytes: usize) {
    counter!(
        "campaign_sync_bytes_written_total",
        "layer" => layer.to_string()
    )
    .increment(bytes as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// REPOSITORY
// ═══════════════════════════════════════════════════════════════════════════

/// Record a repository commit
pub fn record_commit(key: &str, status: &str, records: usize) {
    counter!(
        "campaign_sync_commits_total",
        "key" => key.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "campaign_sync_commit_records",
        "key" => key.to_string()
    )
    .record(records as f64);
}

/// Record a commit coalesced away by the debounce window
pub fn record_debounced(key: &str) {
    counter!(
        "campaign_sync_debounced_mutations_total",
        "key" => key.to_string()
    )
    .increment(1);
}

/// Record a record collection that needed repair on load
pub fn record_repair(kind: &str, fixes: usize, dropped: usize) {
    counter!(
        "campaign_sync_repairs_total",
        "kind" => kind.to_string()
    )
    .increment(1);
    counter!(
        "campaign_sync_repaired_fields_total",
        "kind" => kind.to_string()
    )
    .increment(fixes as u64);
    counter!(
        "campaign_sync_repair_dropped_total",
        "kind" => kind.to_string()
    )
    .increment(dropped as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// DIVERGENCE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a divergence check outcome
pub fn record_divergence_check(key: &str, outcome: &str) {
    counter!(
        "campaign_sync_divergence_checks_total",
        "key" => key.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// STORAGE GUARD
// ═══════════════════════════════════════════════════════════════════════════

/// Set bytes used in the primary store
pub fn set_storage_bytes(bytes: usize) {
    gauge!("campaign_sync_storage_used_bytes").set(bytes as f64);
}

/// Set storage usage ratio (0.0 - 1.0)
pub fn set_storage_usage(ratio: f64) {
    gauge!("campaign_sync_storage_usage_ratio").set(ratio);
}

/// Set storage pressure level (0 = Normal, 1 = Soft, 2 = Hard)
pub fn set_storage_pressure(level: u8) {
    gauge!("campaign_sync_storage_pressure").set(level as f64);
}

/// Record an eviction by enforcement stage
pub fn record_eviction(stage: &str, bytes: usize) {
    counter!(
        "campaign_sync_evictions_total",
        "stage" => stage.to_string()
    )
    .increment(1);
    counter!(
        "campaign_sync_evicted_bytes_total",
        "stage" => stage.to_string()
    )
    .increment(bytes as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// REMOTE + CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════

/// Record a remote push outcome
pub fn record_remote_push(outcome: &str) {
    counter!(
        "campaign_sync_remote_pushes_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "campaign_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ADVISORIES + LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a user-facing advisory
pub fn record_advisory(level: &str) {
    counter!(
        "campaign_sync_advisories_total",
        "level" => level.to_string()
    )
    .increment(1);
}

/// Record an engine state transition
pub fn set_engine_state(state: &str) {
    counter!(
        "campaign_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record startup duration
pub fn record_startup(duration: Duration) {
    histogram!("campaign_sync_startup_seconds").record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    layer: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(layer: &'static str, operation: &'static str) -> Self {
        Self {
            layer,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.layer, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API doesn't panic without a recorder installed.

    #[test]
    fn test_record_operation() {
        record_operation("local", "write", "success");
        record_operation("sqlite", "read", "error");
        record_error("sqlite", "write", "backend");
        record_bytes_written("local", 128);
    }

    #[test]
    fn test_repository_metrics() {
        record_commit("campaigns", "success", 12);
        record_debounced("campaigns");
        record_repair("campaign", 3, 1);
    }

    #[test]
    fn test_guard_metrics() {
        set_storage_bytes(4 * 1024 * 1024);
        set_storage_usage(0.8);
        set_storage_pressure(1);
        record_eviction("projection", 2048);
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("local", "commit");
            std::thread::sleep(Duration::from_millis(1));
        }
        // Timer should have recorded on drop
    }

    #[test]
    fn test_with_recorder() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            record_remote_push("pushed");
            record_circuit_breaker_call("remote", "success");
            record_advisory("warning");
            set_engine_state("Running");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        assert!(snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "campaign_sync_remote_pushes_total"));
    }
}
