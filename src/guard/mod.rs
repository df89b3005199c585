// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage growth protection.
//!
//! [`StorageSizeGuard`] measures the primary store and reclaims space when it
//! crosses the hard threshold; [`StoragePressure`] classifies usage.

mod pressure;
mod size_guard;

pub use pressure::StoragePressure;
pub use size_guard::{GuardConfig, KeyUsage, StorageSizeGuard, StorageUsage, SweepOutcome};
