//! # Campaign Sync
//!
//! Client-side persistence and synchronization core for a marketing-campaign
//! planner: campaign and budget records kept in memory, mirrored to local
//! storage layers, and optionally pushed to a remote document store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RecordRepository                        │
//! │  • Owns the in-memory copy (campaigns, budgets)            │
//! │  • Trailing-debounced commits, sync unload path            │
//! │  • Save status + "last saved" beacon                       │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    ▲                      │
//!    (commit fan-out)   (DivergenceMonitor)     (explicit save)
//!          ▼                    │                      ▼
//! ┌──────────────────────────────────────┐   ┌────────────────────┐
//! │        MultiLayerPersistence         │   │ RemoteSyncAdapter  │
//! │  • Primary: LocalStore (sync, quota) │   │  • Full snapshot   │
//! │  • Fallback: SQLite layer            │   │  • Circuit breaker │
//! │  • First valid layer wins on read    │   └────────────────────┘
//! └──────────────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  StorageSizeGuard: soft advisory, hard enforcement sweep    │
//! │  DataRecoveryService: repair, reset, backup export          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use campaign_sync::{PlannerEngine, SyncConfig};
//! use campaign_sync::model::Campaign;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig {
//!         secondary_db_url: Some("sqlite:planner.db".into()),
//!         ..Default::default()
//!     };
//!
//!     let engine = PlannerEngine::new(config);
//!     engine.start().await.expect("Failed to start");
//!
//!     // Edits are committed once the debounce window goes quiet
//!     engine.campaigns().update(|campaigns| {
//!         campaigns.push(Campaign::new("Webinars", 100.0, 10_000.0));
//!     });
//!
//!     // Or explicitly, bypassing the window
//!     let outcome = engine.campaigns().force_save().await;
//!     assert!(outcome.saved_locally());
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Features
//!
//! - **Layered storage**: sync primary store with a SQLite fallback, per-layer outcomes
//! - **Debounced commits**: one write per burst of edits, synchronous unload path
//! - **Divergence monitoring**: polling plus change-triggered checks, last-writer-wins
//! - **Corruption repair**: any stored value becomes well-formed records, idempotently
//! - **Capacity guard**: soft/hard thresholds, staged and idempotent enforcement
//! - **Remote push**: full snapshots through a circuit breaker, never fatal
//!
//! ## Modules
//!
//! - [`engine`]: [`PlannerEngine`] wiring everything with a lifecycle
//! - [`repository`]: [`RecordRepository`] and save status
//! - [`storage`]: storage traits, [`LocalStore`], SQLite layer, multi-layer persistence
//! - [`monitor`]: [`DivergenceMonitor`]
//! - [`guard`]: [`StorageSizeGuard`]
//! - [`recovery`]: repair, reset and backup export
//! - [`remote`]: remote document-store contract and adapter
//! - [`model`]: campaign and budget records, derived metrics
//! - [`resilience`]: circuit breaker and retry

pub mod config;
pub mod engine;
pub mod events;
pub mod guard;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod recovery;
pub mod remote;
pub mod repository;
pub mod resilience;
pub mod scheduler;
pub mod storage;

pub use config::SyncConfig;
pub use engine::{EngineError, EngineState, PlannerEngine, UnloadReport, BUDGETS_KEY, CAMPAIGNS_KEY};
pub use events::{Advisory, AdvisoryAction, AdvisoryLevel, EventBus, SyncEvent};
pub use guard::{GuardConfig, StoragePressure, StorageSizeGuard, StorageUsage};
pub use model::{Budget, Campaign, CampaignStatus, DerivedMetrics, Record};
pub use monitor::{classify, Divergence, DivergenceMonitor, DivergenceState, MonitorConfig};
pub use recovery::{BackupDocument, DataRecoveryService, RecoveryError, ResetOutcome};
pub use remote::{RemoteOutcome, RemoteSync, RemoteSyncAdapter, RemoteSyncRequest, RemoteSyncResult, RemoteTarget};
pub use repository::{RecordRepository, SaveBeacon, SaveOutcome, SaveStatus};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
pub use resilience::retry::RetryConfig;
pub use scheduler::Scheduler;
pub use storage::{
    KeyValueStore, LayerOutcome, LocalStore, MultiLayerPersistence, ReadCheck, ReadReport, SqliteLayer,
    StorageChange, StorageError, StorageLayer, WriteOutcome,
};
pub use metrics::LatencyTimer;
