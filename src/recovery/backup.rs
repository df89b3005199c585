// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backup documents: `{records: [...], timestamp: ISO-8601, version}`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::RecoveryError;

/// Format tag written into every backup.
pub const BACKUP_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument<R> {
    pub records: Vec<R>,
    pub timestamp: String,
    pub version: String,
}

impl<R> BackupDocument<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self::at(records, Utc::now())
    }

    pub fn at(records: Vec<R>, generated: DateTime<Utc>) -> Self {
        Self {
            records,
            timestamp: generated.to_rfc3339_opts(SecondsFormat::Millis, true),
            version: BACKUP_FORMAT_VERSION.to_string(),
        }
    }

    /// File name for a backup of `kind` records, e.g.
    /// `campaign-backup-20250101T120000123Z.json`.
    #[must_use]
    pub fn file_name(&self, kind: &str) -> String {
        let stamp: String = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.with_timezone(&Utc).format("%Y%m%dT%H%M%S%3fZ").to_string())
            .unwrap_or_else(|_| self.timestamp.chars().filter(char::is_ascii_alphanumeric).collect());
        format!("{}-backup-{}.json", kind, stamp)
    }
}

/// Write `doc` into `dir`, creating it if needed. Never overwrites: a
/// numeric suffix is added if the name is taken.
pub(crate) fn write_document<R: Serialize>(
    dir: &Path,
    kind: &str,
    doc: &BackupDocument<R>,
) -> Result<PathBuf, RecoveryError> {
    fs::create_dir_all(dir)?;
    let body = serde_json::to_vec_pretty(doc)?;

    let base = doc.file_name(kind);
    let mut path = dir.join(&base);
    let mut n = 1;
    let mut file = loop {
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => break file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                path = dir.join(base.replace(".json", &format!("-{}.json", n)));
                n += 1;
            }
            Err(e) => return Err(e.into()),
        }
    };
    file.write_all(&body)?;
    file.sync_all()?;
    Ok(path)
}

/// Parse a backup file, leaving records as raw JSON for repair.
pub(crate) fn read_document(path: &Path) -> Result<BackupDocument<serde_json::Value>, RecoveryError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_document_shape() {
        let generated = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();
        let doc = BackupDocument::at(vec![1, 2, 3], generated);
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["records"], serde_json::json!([1, 2, 3]));
        assert_eq!(value["timestamp"], "2025-03-01T12:30:00.000Z");
        assert_eq!(value["version"], BACKUP_FORMAT_VERSION);
        assert_eq!(doc.file_name("campaign"), "campaign-backup-20250301T123000000Z.json");
    }

    #[test]
    fn test_write_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let doc = BackupDocument::new(vec!["a"]);
        let first = write_document(dir.path(), "campaign", &doc).unwrap();
        let second = write_document(dir.path(), "campaign", &doc).unwrap();
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("-1.json"));
    }
}
