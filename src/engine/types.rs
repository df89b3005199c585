// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the planner engine.

use thiserror::Error;

use crate::storage::StorageError;

/// Engine lifecycle state.
///
/// Use [`super::PlannerEngine::state()`] to check the current state or
/// [`super::PlannerEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Just created, not yet started
    Created,
    /// Attaching the secondary layer and loading collections
    Loading,
    /// Collections loaded, background tasks not yet running
    Ready,
    /// Monitors and sweeper running
    Running,
    /// Graceful shutdown in progress or done
    ShuttingDown,
}

impl EngineState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Loading => write!(f, "Loading"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Engine cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },
    #[error("Unload write failed for {failed} collection(s): {first}")]
    Unload { failed: usize, first: StorageError },
}

/// Per-collection result of the unload path.
#[derive(Debug, Clone, PartialEq)]
pub struct UnloadReport {
    pub results: Vec<(String, Result<(), StorageError>)>,
}

impl UnloadReport {
    #[must_use]
    pub fn success(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    /// Collapse into a single result, keeping the first failure.
    pub fn into_result(self) -> Result<(), EngineError> {
        let failed = self.results.iter().filter(|(_, r)| r.is_err()).count();
        match self.results.into_iter().find_map(|(_, r)| r.err()) {
            Some(first) => Err(EngineError::Unload { failed, first }),
            None => Ok(()),
        }
    }
}
