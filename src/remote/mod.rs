// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote document-store push.
//!
//! The remote store is an external collaborator behind the [`RemoteSync`]
//! trait: it accepts a full collection snapshot plus addressing metadata and
//! answers `{success, message?}`. [`RemoteSyncAdapter`] is what the rest of
//! the crate talks to. It resolves the document path, runs the push through
//! a circuit breaker and turns every result into a [`RemoteOutcome`]. A
//! failed push is logged and reported, never raised.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};

/// Where snapshots are pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub path_prefix: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

impl RemoteTarget {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, path_prefix: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            path_prefix: path_prefix.into(),
            branch: default_branch(),
        }
    }

    /// Document path for `key`: `<path_prefix>/<key>.json`.
    #[must_use]
    pub fn path_for(&self, key: &str) -> String {
        let prefix = self.path_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}.json", key)
        } else {
            format!("{}/{}.json", prefix, key)
        }
    }
}

/// One snapshot push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteSyncRequest {
    pub target: RemoteTarget,
    pub path: String,
    pub key: String,
    pub snapshot: Value,
    /// Commit-style description of the change
    pub message: String,
}

/// Answer from the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSyncResult {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl RemoteSyncResult {
    pub fn ok() -> Self {
        Self { success: true, message: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()) }
    }
}

/// Client for the remote document store, supplied by the host.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn save(&self, request: &RemoteSyncRequest) -> RemoteSyncResult;
}

/// What happened to a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    Pushed,
    Failed(String),
    /// Not attempted: the circuit is open
    Rejected,
}

impl RemoteOutcome {
    #[must_use]
    pub fn is_pushed(&self) -> bool {
        matches!(self, Self::Pushed)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Pushed => "pushed",
            Self::Failed(_) => "failed",
            Self::Rejected => "rejected",
        }
    }
}

pub struct RemoteSyncAdapter {
    client: Arc<dyn RemoteSync>,
    target: RemoteTarget,
    breaker: CircuitBreaker,
}

impl RemoteSyncAdapter {
    pub fn new(client: Arc<dyn RemoteSync>, target: RemoteTarget) -> Self {
        Self::with_circuit(client, target, CircuitConfig::remote())
    }

    pub fn with_circuit(client: Arc<dyn RemoteSync>, target: RemoteTarget, config: CircuitConfig) -> Self {
        Self {
            client,
            target,
            breaker: CircuitBreaker::new("remote", config),
        }
    }

    #[must_use]
    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Push a full snapshot of `key`.
    #[instrument(skip(self, snapshot))]
    pub async fn push<T: Serialize + ?Sized>(&self, key: &str, snapshot: &T) -> RemoteOutcome {
        let snapshot = match serde_json::to_value(snapshot) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "Snapshot not serializable, remote push skipped");
                return self.finish(key, RemoteOutcome::Failed(e.to_string()));
            }
        };

        let request = RemoteSyncRequest {
            target: self.target.clone(),
            path: self.target.path_for(key),
            key: key.to_string(),
            message: format!("Update {}", key),
            snapshot,
        };

        let client = Arc::clone(&self.client);
        let result = self
            .breaker
            .call(|| async move {
                let result = client.save(&request).await;
                if result.success {
                    Ok(())
                } else {
                    Err(result.message.unwrap_or_else(|| "remote save failed".to_string()))
                }
            })
            .await;

        let outcome = match result {
            Ok(()) => RemoteOutcome::Pushed,
            Err(CircuitError::Rejected) => RemoteOutcome::Rejected,
            Err(CircuitError::Inner(message)) => RemoteOutcome::Failed(message),
        };
        self.finish(key, outcome)
    }

    fn finish(&self, key: &str, outcome: RemoteOutcome) -> RemoteOutcome {
        match &outcome {
            RemoteOutcome::Pushed => info!(key, path = %self.target.path_for(key), "Remote push succeeded"),
            RemoteOutcome::Failed(message) => warn!(key, %message, "Remote push failed"),
            RemoteOutcome::Rejected => warn!(key, "Remote push skipped, circuit open"),
        }
        crate::metrics::record_remote_push(outcome.label());
        outcome
    }
}
