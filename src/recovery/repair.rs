// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collection repair.
//!
//! Turns any JSON value into a list of well-formed records:
//! - a value that is not a recognised collection becomes an empty list
//! - a non-object entry becomes a fully defaulted record
//! - a missing or mistyped field gets its type-correct default
//! - a repeated identity is re-keyed so every record stays addressable
//!
//! Repair is idempotent: repairing the serialized output of a repair changes
//! nothing.

use std::collections::HashSet;

use serde_json::Value;

use crate::model::Record;

#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport<R> {
    pub records: Vec<R>,
    /// Fields defaulted or coerced across all entries
    pub fixes: usize,
    /// Entries whose identity collided with an earlier one and was re-keyed
    pub rekeyed: usize,
    /// The input was a recognised collection layout
    pub was_collection: bool,
}

impl<R> RepairReport<R> {
    /// Nothing had to change.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.was_collection && self.fixes == 0 && self.rekeyed == 0
    }
}

/// Repair a stored collection of `R`.
pub fn repair_collection<R: Record>(raw: &Value) -> RepairReport<R> {
    let Some(entries) = R::entries_from_value(raw) else {
        return RepairReport { records: Vec::new(), fixes: 0, rekeyed: 0, was_collection: false };
    };

    let mut seen = HashSet::with_capacity(entries.len());
    let mut records = Vec::with_capacity(entries.len());
    let mut fixes = 0;
    let mut rekeyed = 0;

    for entry in &entries {
        let mut repaired = R::repair_entry(entry);
        if !seen.insert(repaired.record.id().to_string()) {
            // Strip the identity and let repair generate a fresh one
            let mut stripped = serde_json::to_value(&repaired.record).unwrap_or(Value::Null);
            if let Value::Object(fields) = &mut stripped {
                fields.remove(R::ID_FIELD);
            }
            repaired = R::repair_entry(&stripped);
            seen.insert(repaired.record.id().to_string());
            rekeyed += 1;
        }
        fixes += repaired.fixes;
        records.push(repaired.record);
    }

    RepairReport { records, fixes, rekeyed, was_collection: true }
}

/// Repair and return just the records.
pub fn repair<R: Record>(raw: &Value) -> Vec<R> {
    repair_collection(raw).records
}
