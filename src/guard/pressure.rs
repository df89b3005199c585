// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage pressure levels.
//!
//! # Example
//!
//! ```
//! use campaign_sync::guard::StoragePressure;
//!
//! let level = StoragePressure::from_ratio(0.5, 0.80, 0.95);
//! assert_eq!(level, StoragePressure::Normal);
//!
//! // Soft: advise the user, nothing is evicted
//! let level = StoragePressure::from_ratio(0.85, 0.80, 0.95);
//! assert!(level.should_advise());
//! assert!(!level.should_enforce());
//!
//! // Hard: enforcement runs
//! let level = StoragePressure::from_ratio(0.95, 0.80, 0.95);
//! assert!(level.should_enforce());
//! ```

/// Pressure on the primary store relative to its assumed capacity.
///
/// - **Normal** (< soft): nothing to do
/// - **Soft** (soft..hard): advisory only
/// - **Hard** (>= hard): automatic enforcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StoragePressure {
    Normal = 0,
    Soft = 1,
    Hard = 2,
}

impl StoragePressure {
    /// Classify a usage ratio (0.0 → 1.0) against the two thresholds.
    #[must_use]
    pub fn from_ratio(ratio: f64, soft: f64, hard: f64) -> Self {
        match ratio {
            r if r >= hard => Self::Hard,
            r if r >= soft => Self::Soft,
            _ => Self::Normal,
        }
    }

    #[must_use]
    pub fn should_advise(&self) -> bool {
        *self >= Self::Soft
    }

    #[must_use]
    pub fn should_enforce(&self) -> bool {
        matches!(self, Self::Hard)
    }

    /// Gauge value for metrics
    #[must_use]
    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal usage",
            Self::Soft => "Storage is filling up",
            Self::Hard => "Storage nearly full - enforcing limits",
        }
    }
}

impl std::fmt::Display for StoragePressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
