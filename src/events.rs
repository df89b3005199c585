// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed publish/subscribe bus shared by the sync components.
//!
//! Every component that needs to tell the host something (a save landed, the
//! backing store moved ahead, storage is filling up) publishes a [`SyncEvent`]
//! on the [`EventBus`] it was constructed with. Hosts subscribe and turn
//! advisories into toasts, refresh signals into reloads, and so on.
//!
//! Publishing never blocks and never fails: with no subscribers the event is
//! simply dropped.

use tokio::sync::broadcast;
use tracing::trace;

use crate::monitor::DivergenceState;
use crate::repository::SaveBeacon;

/// How an advisory should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryLevel {
    /// Transient, auto-dismissing notice
    Info,
    /// Transient warning
    Warning,
    /// Persistent, dismissible notice (repeated or escalating failures)
    Persistent,
}

impl AdvisoryLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Persistent => "persistent",
        }
    }
}

/// Action the host may offer alongside an advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvisoryAction {
    /// Offer a backup export
    ExportBackup,
    /// Offer "reset and reload"
    ResetAndReload,
    /// Offer reloading from storage
    Reload,
}

/// Non-fatal, user-facing notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub level: AdvisoryLevel,
    pub message: String,
    pub action: Option<AdvisoryAction>,
}

impl Advisory {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: AdvisoryLevel::Info, message: message.into(), action: None }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: AdvisoryLevel::Warning, message: message.into(), action: None }
    }

    pub fn persistent(message: impl Into<String>) -> Self {
        Self { level: AdvisoryLevel::Persistent, message: message.into(), action: None }
    }

    #[must_use]
    pub fn with_action(mut self, action: AdvisoryAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// Events published by the sync core.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The in-memory copy for `key` was replaced
    Mutated { key: String },
    /// A commit reached the primary layer
    Saved(SaveBeacon),
    /// A commit failed on the primary layer
    SaveFailed { key: String, error: String },
    /// The backing store holds records the session does not; reload from storage
    RefreshRequested { key: String },
    /// The divergence monitor changed state
    DivergenceChanged { key: String, state: DivergenceState },
    /// The size guard reclaimed space from a key
    Evicted { key: String, bytes: usize },
    /// Something the user should know about
    Advisory(Advisory),
    /// All storage was reset; the host should rebuild its state
    ReloadRequested,
}

/// Cloneable handle to the broadcast bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn advise(&self, advisory: Advisory) {
        crate::metrics::record_advisory(advisory.level.as_str());
        self.publish(SyncEvent::Advisory(advisory));
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
