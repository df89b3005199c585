//! Chaos tests: failing layers, exhausted quota, misbehaving remotes and
//! lifecycle abuse.
//!
//! Layers are made to fail on demand through [`FlakyLayer`]; nothing here
//! needs external services.
//!
//! Run with: `cargo test --test chaos`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use campaign_sync::guard::GuardConfig;
use campaign_sync::model::Campaign;
use campaign_sync::{
    AdvisoryAction, CircuitConfig, DataRecoveryService, EngineError, EngineState, EventBus, KeyValueStore,
    LocalStore, MultiLayerPersistence, PlannerEngine, RecordRepository, RemoteOutcome, RemoteSync,
    RemoteSyncAdapter, RemoteSyncRequest, RemoteSyncResult, RemoteTarget, StorageError, StorageLayer,
    StorageSizeGuard, SyncConfig, SyncEvent,
};

// =============================================================================
// Fault injection
// =============================================================================

/// A layer whose operations can be switched to fail at runtime.
struct FlakyLayer {
    inner: LocalStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_clear: AtomicBool,
}

impl FlakyLayer {
    fn new() -> Self {
        Self {
            inner: LocalStore::new(1 << 20),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_clear: AtomicBool::new(false),
        }
    }

    fn down() -> StorageError {
        StorageError::Unavailable("injected failure".into())
    }
}

#[async_trait]
impl StorageLayer for FlakyLayer {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::down());
        }
        StorageLayer::read(&self.inner, key).await
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::down());
        }
        StorageLayer::write(&self.inner, key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        StorageLayer::remove(&self.inner, key).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(Self::down());
        }
        StorageLayer::clear(&self.inner).await
    }
}

/// Remote that always fails, counting attempts.
#[derive(Default)]
struct DownRemote {
    attempts: AtomicUsize,
}

#[async_trait]
impl RemoteSync for DownRemote {
    async fn save(&self, _request: &RemoteSyncRequest) -> RemoteSyncResult {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        RemoteSyncResult::failed("503 service unavailable")
    }
}

fn repo_over(
    primary: Arc<LocalStore>,
    secondary: Arc<FlakyLayer>,
    bus: &EventBus,
) -> Arc<RecordRepository<Campaign>> {
    let persistence = Arc::new(
        MultiLayerPersistence::new(primary)
            .with_layer(secondary)
            .with_events(bus.clone()),
    );
    Arc::new(RecordRepository::new("campaigns", persistence, bus.clone(), Duration::from_millis(100)))
}

fn advisories(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<campaign_sync::Advisory> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|e| match e {
            SyncEvent::Advisory(a) => Some(a),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Layer failures
// =============================================================================

#[tokio::test]
async fn chaos_secondary_write_failure_does_not_fail_commit() {
    let primary = Arc::new(LocalStore::new(1 << 20));
    let secondary = Arc::new(FlakyLayer::new());
    secondary.fail_writes.store(true, Ordering::SeqCst);
    let bus = EventBus::new(32);
    let repo = repo_over(primary.clone(), secondary.clone(), &bus);

    repo.mutate(vec![Campaign::new("Webinars", 1.0, 1.0)]);
    let outcome = repo.force_save().await;

    assert!(outcome.saved_locally());
    let failed: Vec<_> = outcome.local.failed_layers().map(|o| o.layer.clone()).collect();
    assert_eq!(failed, vec!["flaky".to_string()]);
    assert!(primary.get_item("campaigns").unwrap().is_some());
    assert!(repo.save_status().last_error.is_none());
}

#[tokio::test]
async fn chaos_unreadable_secondary_is_skipped_on_read() {
    let primary = Arc::new(LocalStore::new(1 << 20));
    let secondary = Arc::new(FlakyLayer::new());
    let bus = EventBus::new(32);
    let repo = repo_over(primary.clone(), secondary.clone(), &bus);

    repo.mutate(vec![Campaign::with_id("a", "Webinars", 1.0, 1.0)]);
    repo.force_save().await;

    // Primary lost, secondary unreadable: cold start with an advisory
    primary.clear_all().unwrap();
    secondary.fail_reads.store(true, Ordering::SeqCst);
    let mut rx = bus.subscribe();
    assert!(repo.load().await.is_empty());
    assert_eq!(advisories(&mut rx).len(), 1);

    // Secondary back: data restored
    secondary.fail_reads.store(false, Ordering::SeqCst);
    let loaded = repo.load().await;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id(), "a");
}

#[tokio::test]
async fn chaos_reset_continues_past_failing_layer() {
    let primary = Arc::new(LocalStore::new(1 << 20));
    let secondary = Arc::new(FlakyLayer::new());
    secondary.fail_clear.store(true, Ordering::SeqCst);
    primary.set_item("campaigns", "[]").unwrap();

    let bus = EventBus::new(8);
    let mut rx = bus.subscribe();
    let persistence = Arc::new(MultiLayerPersistence::new(primary.clone()).with_layer(secondary));
    let dir = tempfile::tempdir().unwrap();
    let recovery = DataRecoveryService::new(persistence, bus, dir.path());

    let outcome = recovery.reset_all().await;
    assert!(!outcome.success());
    assert!(outcome.layers[0].result.is_ok());
    assert!(primary.is_empty());
    assert_eq!(rx.try_recv().unwrap(), SyncEvent::ReloadRequested);
}

// =============================================================================
// Capacity exhaustion
// =============================================================================

#[tokio::test]
async fn chaos_quota_failure_reclaims_ancillary_keys_and_retries() {
    let store = Arc::new(LocalStore::new(2_000));
    store.set_item("debug-trace", &"x".repeat(1_500)).unwrap();

    let bus = EventBus::new(32);
    let config = GuardConfig {
        capacity_bytes: 2_000,
        known_prefixes: vec!["campaigns".into()],
        ..Default::default()
    };
    let guard = Arc::new(StorageSizeGuard::new(store.clone(), config).with_events(bus.clone()));
    let persistence = MultiLayerPersistence::new(store.clone()).with_guard(guard).with_events(bus.clone());

    let mut rx = bus.subscribe();
    let payload = json!([{"id": "a", "description": "y".repeat(800)}]);
    let outcome = persistence.write("campaigns", &payload).await;

    assert!(outcome.success);
    assert!(store.get_item("debug-trace").unwrap().is_none());
    let evicted = std::iter::from_fn(|| rx.try_recv().ok())
        .any(|e| matches!(e, SyncEvent::Evicted { ref key, .. } if key == "debug-trace"));
    assert!(evicted);
}

#[tokio::test]
async fn chaos_unreclaimable_quota_fails_gracefully_with_backup_advice() {
    let store = Arc::new(LocalStore::new(256));
    let bus = EventBus::new(32);
    let guard = Arc::new(
        StorageSizeGuard::new(store.clone(), GuardConfig { capacity_bytes: 256, ..Default::default() })
            .with_events(bus.clone()),
    );
    let persistence = Arc::new(
        MultiLayerPersistence::new(store.clone())
            .with_guard(guard)
            .with_events(bus.clone()),
    );
    let repo = Arc::new(RecordRepository::<Campaign>::new(
        "campaigns",
        persistence,
        bus.clone(),
        Duration::from_millis(100),
    ));

    let mut rx = bus.subscribe();
    repo.mutate((0..20).map(|_| Campaign::new("Webinars", 1.0, 1.0)).collect());
    let outcome = repo.force_save().await;

    assert!(!outcome.saved_locally());
    assert!(outcome.local.primary_error().is_some_and(StorageError::is_quota));
    assert!(repo.save_status().last_error.is_some());
    // In-memory copy survives
    assert_eq!(repo.len(), 20);

    let advice = advisories(&mut rx);
    assert!(advice.iter().any(|a| a.action == Some(AdvisoryAction::ExportBackup)));
}

// =============================================================================
// Remote failures
// =============================================================================

#[tokio::test]
async fn chaos_remote_down_never_affects_local_saves() {
    let primary = Arc::new(LocalStore::new(1 << 20));
    let bus = EventBus::new(32);
    let client = Arc::new(DownRemote::default());
    let adapter = Arc::new(RemoteSyncAdapter::with_circuit(
        client.clone(),
        RemoteTarget::new("acme", "plans", "data"),
        CircuitConfig {
            failure_threshold: 2,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        },
    ));
    let persistence = Arc::new(MultiLayerPersistence::new(primary.clone()));
    let repo = Arc::new(
        RecordRepository::<Campaign>::new("campaigns", persistence, bus, Duration::from_millis(100))
            .with_remote(adapter),
    );

    repo.mutate(vec![Campaign::new("Webinars", 1.0, 1.0)]);
    let mut outcomes = Vec::new();
    for _ in 0..4 {
        let outcome = repo.force_save().await;
        assert!(outcome.saved_locally());
        outcomes.push(outcome.remote.unwrap());
    }

    assert!(matches!(outcomes[0], RemoteOutcome::Failed(_)));
    assert_eq!(outcomes[3], RemoteOutcome::Rejected);
    assert_eq!(client.attempts.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Concurrency and lifecycle abuse
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_concurrent_updates_all_land() {
    let primary = Arc::new(LocalStore::new(1 << 20));
    let secondary = Arc::new(FlakyLayer::new());
    let bus = EventBus::new(1024);
    let repo = repo_over(primary.clone(), secondary, &bus);

    let mut handles = Vec::new();
    for task in 0..8 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            for i in 0..10 {
                repo.update(|c| c.push(Campaign::with_id(format!("t{}-{}", task, i), "Webinars", 1.0, 1.0)));
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let outcome = repo.force_save().await;
    assert!(outcome.saved_locally());
    let stored: Vec<serde_json::Value> =
        serde_json::from_str(&primary.get_item("campaigns").unwrap().unwrap()).unwrap();
    assert_eq!(stored.len(), 80);
}

#[tokio::test]
async fn chaos_double_start() {
    let engine = PlannerEngine::new(SyncConfig { guard_sweep_interval_secs: 0, ..Default::default() });
    engine.start().await.unwrap();
    assert!(matches!(engine.start().await, Err(EngineError::InvalidState { .. })));
    assert!(engine.is_running());
    engine.shutdown().await;
}

#[tokio::test]
async fn chaos_shutdown_without_start() {
    let engine = PlannerEngine::new(SyncConfig::default());
    engine.shutdown().await;
    engine.shutdown().await;
    assert_eq!(engine.state(), EngineState::ShuttingDown);
    assert!(engine.store().is_empty());
}

#[tokio::test]
async fn chaos_unload_then_shutdown() {
    let engine = PlannerEngine::new(SyncConfig { guard_sweep_interval_secs: 0, ..Default::default() });
    engine.start().await.unwrap();
    engine.campaigns().mutate(vec![Campaign::new("Webinars", 1.0, 1.0)]);

    assert!(engine.unload().into_result().is_ok());
    // Already shut down by unload: no second save, no panic
    engine.shutdown().await;
    assert!(!engine.campaign_monitor().is_running());
}
