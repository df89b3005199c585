// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage layers and the multi-layer persistence built on them.

pub mod local;
pub mod persistence;
pub mod sqlite;
pub mod traits;

pub use local::LocalStore;
pub use persistence::{
    is_record_collection, LayerOutcome, MultiLayerPersistence, ReadCheck, ReadReport, RejectReason,
    Rejection, WriteOutcome,
};
pub use sqlite::SqliteLayer;
pub use traits::{KeyValueStore, StorageChange, StorageError, StorageLayer};
