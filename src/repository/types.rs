// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::RemoteOutcome;
use crate::storage::WriteOutcome;

/// Prefix of the key the save beacon for a collection is stored under.
pub const BEACON_PREFIX: &str = "lastSaved:";

/// Key holding the save beacon for `key`.
#[must_use]
pub fn beacon_key(key: &str) -> String {
    format!("{}{}", BEACON_PREFIX, key)
}

/// Small persisted marker written after every successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveBeacon {
    /// ISO-8601
    pub timestamp: String,
    pub key: String,
}

impl SaveBeacon {
    pub fn at(key: impl Into<String>, saved: DateTime<Utc>) -> Self {
        Self {
            timestamp: saved.to_rfc3339_opts(SecondsFormat::Millis, true),
            key: key.into(),
        }
    }

    #[must_use]
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Save status of one repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveStatus {
    pub last_saved: Option<DateTime<Utc>>,
    /// A commit is executing right now (not merely scheduled)
    pub in_flight: bool,
    pub last_error: Option<String>,
}

/// Result of an explicit save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub local: WriteOutcome,
    /// `None` when no remote is configured
    pub remote: Option<RemoteOutcome>,
}

impl SaveOutcome {
    /// The local commit landed on the primary layer
    #[must_use]
    pub fn saved_locally(&self) -> bool {
        self.local.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_beacon_wire_format() {
        let saved = Utc.with_ymd_and_hms(2025, 5, 4, 3, 2, 1).unwrap();
        let beacon = SaveBeacon::at("campaigns", saved);
        let json = serde_json::to_value(&beacon).unwrap();
        assert_eq!(json, serde_json::json!({"timestamp": "2025-05-04T03:02:01.000Z", "key": "campaigns"}));
        assert_eq!(beacon.saved_at(), Some(saved));
        assert_eq!(beacon_key("campaigns"), "lastSaved:campaigns");
    }
}
