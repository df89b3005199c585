//! Integration tests for the campaign sync core.
//!
//! Everything runs in-process: the primary layer is a [`LocalStore`] and the
//! secondary layer is a SQLite file in a temp directory, so no external
//! services are needed.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//!
//! # Only happy-path tests
//! cargo test --test integration happy
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: lifecycle, debounce, fallback, backups
//! - `failure_*` - Unload and restart scenarios

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use campaign_sync::model::{Budget, Campaign, DerivedMetrics, IN_ACCOUNT_EVENTS};
use campaign_sync::{
    EngineState, EventBus, KeyValueStore, LocalStore, MultiLayerPersistence, PlannerEngine, RecordRepository,
    SaveBeacon, SqliteLayer, StorageError, StorageLayer, SyncConfig, SyncEvent, CAMPAIGNS_KEY,
};

// =============================================================================
// Helpers
// =============================================================================

fn test_config() -> SyncConfig {
    SyncConfig {
        debounce_ms: 50,
        poll_interval_ms: 200,
        guard_sweep_interval_secs: 0,
        ..Default::default()
    }
}

fn sqlite_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite:{}", dir.path().join("planner.db").display())
}

fn parse(raw: Option<String>) -> Value {
    serde_json::from_str(&raw.expect("value present")).expect("valid JSON")
}

/// Wraps a layer and counts writes.
struct CountingLayer {
    inner: LocalStore,
    writes: AtomicUsize,
}

impl CountingLayer {
    fn new() -> Self {
        Self { inner: LocalStore::new(1 << 20), writes: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl StorageLayer for CountingLayer {
    fn name(&self) -> &str {
        "counting"
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        StorageLayer::read(&self.inner, key).await
    }

    async fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        StorageLayer::write(&self.inner, key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        StorageLayer::remove(&self.inner, key).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        StorageLayer::clear(&self.inner).await
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Happy Path Tests - Normal Operation
// =============================================================================

#[tokio::test]
async fn happy_engine_lifecycle_with_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig { secondary_db_url: Some(sqlite_url(&dir)), ..test_config() };

    let engine = PlannerEngine::new(config.clone());
    let mut states = engine.state_receiver();
    engine.start().await.expect("start");
    assert_eq!(*states.borrow_and_update(), EngineState::Running);

    engine.campaigns().update(|c| c.push(Campaign::with_id("webinar-1", "Webinars", 100.0, 10_000.0)));
    engine.budgets().update(|b| b.push(Budget::new("emea", Some(50_000.0))));
    engine.shutdown().await;

    // Fresh primary store: everything has to come back from SQLite
    let engine = PlannerEngine::new(config);
    engine.start().await.expect("restart");
    let campaigns = engine.campaigns().records();
    assert_eq!(campaigns.len(), 1);
    assert_eq!(campaigns[0].id(), "webinar-1");
    assert_eq!(campaigns[0].derived().pipeline_forecast, 250_000.0);
    assert_eq!(engine.budgets().records()[0].owner(), "emea");

    // The restored collection was written back to the primary layer
    assert!(engine.store().get_item(CAMPAIGNS_KEY).unwrap().is_some());
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn happy_debounce_coalesces_bursts_into_one_commit() {
    let primary = Arc::new(LocalStore::new(1 << 20));
    let counting = Arc::new(CountingLayer::new());
    let bus = EventBus::new(64);
    let persistence = Arc::new(MultiLayerPersistence::new(primary.clone()).with_layer(counting.clone()));
    let repo = Arc::new(RecordRepository::<Campaign>::new(
        "campaigns",
        persistence,
        bus.clone(),
        Duration::from_millis(500),
    ));

    for i in 0..20 {
        repo.update(|c| c.push(Campaign::with_id(format!("c{}", i), "Webinars", i as f64, 100.0)));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(counting.writes.load(Ordering::SeqCst), 1);
    let stored = parse(primary.get_item("campaigns").unwrap());
    assert_eq!(stored, serde_json::to_value(repo.records()).unwrap());
    assert_eq!(stored.as_array().unwrap().len(), 20);
}

#[tokio::test]
async fn happy_layer_fallback_reads_secondary_when_primary_corrupt() {
    let primary = Arc::new(LocalStore::new(1 << 20));
    let secondary = Arc::new(SqliteLayer::in_memory().await.unwrap());
    let persistence = MultiLayerPersistence::new(primary.clone()).with_layer(secondary.clone());

    let good = serde_json::json!([{"id": "a", "campaignType": "Webinars"}]);
    secondary.write("campaigns", &good.to_string()).await.unwrap();
    primary.set_item("campaigns", "[{\"id\": \"a\"").unwrap();

    let report = persistence.read_collection("campaigns").await;
    assert_eq!(report.value, Some(good));
    assert_eq!(report.source.as_deref(), Some("sqlite"));
}

#[tokio::test]
async fn happy_save_beacon_is_persisted_and_broadcast() {
    let engine = PlannerEngine::new(test_config());
    engine.start().await.unwrap();
    let mut changes = engine.store().subscribe();
    let mut events = engine.subscribe();

    engine.campaigns().mutate(vec![Campaign::new("Webinars", 10.0, 1_000.0)]);
    let outcome = engine.campaigns().force_save().await;
    assert!(outcome.saved_locally());

    let beacon: SaveBeacon = serde_json::from_str(
        &engine.store().get_item("lastSaved:campaigns").unwrap().unwrap(),
    )
    .unwrap();
    assert_eq!(beacon.key, "campaigns");
    assert!(beacon.saved_at().is_some());
    assert_eq!(engine.campaigns().save_status().last_saved, beacon.saved_at());

    // Same-process listeners get the event, other sessions the store change
    let saw_event = std::iter::from_fn(|| events.try_recv().ok()).any(|e| e == SyncEvent::Saved(beacon.clone()));
    assert!(saw_event);
    let saw_change = std::iter::from_fn(|| changes.try_recv().ok()).any(|c| c.key == "lastSaved:campaigns");
    assert!(saw_change);
    engine.shutdown().await;
}

#[tokio::test]
async fn happy_backup_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let engine = PlannerEngine::new(SyncConfig { download_dir: Some(dir.path().to_path_buf()), ..test_config() });
    engine.start().await.unwrap();

    let records = vec![
        Campaign::new("Webinars", 100.0, 10_000.0),
        Campaign::new(IN_ACCOUNT_EVENTS, 0.0, 10_000.0),
    ];
    engine.campaigns().mutate(records.clone());

    let path = engine.export_campaigns().unwrap();
    let doc: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(doc["records"], serde_json::to_value(&records).unwrap());
    assert!(doc["timestamp"].as_str().unwrap().ends_with('Z'));
    assert_eq!(doc["version"], "1.0");

    let back = engine.recovery().read_backup::<Campaign>(&path).unwrap();
    assert_eq!(back.records, records);
    engine.shutdown().await;
}

#[test]
fn happy_derived_metric_scenarios() {
    let webinar = Campaign::new("Webinars", 100.0, 10_000.0);
    assert_eq!(
        *webinar.derived(),
        DerivedMetrics { mql: 10, sql: 6, opportunities: 5, pipeline_forecast: 250_000.0 }
    );

    let in_account = Campaign::new(IN_ACCOUNT_EVENTS, 0.0, 10_000.0);
    assert_eq!(
        *in_account.derived(),
        DerivedMetrics { mql: 0, sql: 0, opportunities: 0, pipeline_forecast: 200_000.0 }
    );
}

#[tokio::test]
async fn happy_second_session_changes_are_picked_up() {
    let shared = Arc::new(LocalStore::new(1 << 20));
    let session_a = PlannerEngine::with_store(test_config(), shared.clone(), None);
    let session_b = PlannerEngine::with_store(test_config(), shared.clone(), None);
    session_a.start().await.unwrap();
    session_b.start().await.unwrap();

    session_b.campaigns().update(|c| c.push(Campaign::with_id("from-b", "Webinars", 1.0, 1.0)));

    let a = session_a.campaigns().clone();
    wait_until("session A to see session B's record", || {
        a.records().iter().any(|c| c.id() == "from-b")
    })
    .await;

    session_a.shutdown().await;
    session_b.shutdown().await;
}

// =============================================================================
// Failure Scenarios
// =============================================================================

#[tokio::test]
async fn failure_unload_before_debounce_keeps_latest_state() {
    let store = Arc::new(LocalStore::new(1 << 20));
    let config = SyncConfig { debounce_ms: 60_000, ..test_config() };

    let engine = PlannerEngine::with_store(config.clone(), store.clone(), None);
    engine.start().await.unwrap();
    engine.campaigns().mutate(vec![Campaign::with_id("first", "Webinars", 1.0, 1.0)]);
    engine.campaigns().update(|c| c.push(Campaign::with_id("second", "Webinars", 2.0, 2.0)));
    assert!(engine.unload().success());
    drop(engine);

    let stored = parse(store.get_item(CAMPAIGNS_KEY).unwrap());
    let ids: Vec<&str> = stored.as_array().unwrap().iter().map(|c| c["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["first", "second"]);

    // The next session sees it
    let next = PlannerEngine::with_store(config, store, None);
    next.start().await.unwrap();
    assert_eq!(next.campaigns().len(), 2);
    next.shutdown().await;
}

#[tokio::test]
async fn failure_corrupt_primary_and_secondary_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let url = sqlite_url(&dir);
    let secondary = SqliteLayer::connect(&url).await.unwrap();
    secondary.write(CAMPAIGNS_KEY, "not json at all").await.unwrap();
    secondary.close().await;

    let store = Arc::new(LocalStore::new(1 << 20));
    store.set_item(CAMPAIGNS_KEY, "{{").unwrap();

    let engine = PlannerEngine::with_store(
        SyncConfig { secondary_db_url: Some(url), ..test_config() },
        store,
        None,
    );
    let mut events = engine.subscribe();
    engine.start().await.unwrap();

    assert!(engine.campaigns().is_empty());
    let advised = std::iter::from_fn(|| events.try_recv().ok()).any(|e| matches!(e, SyncEvent::Advisory(_)));
    assert!(advised);
    engine.shutdown().await;
}
