//! The on-disk lock store document.
//!
//! # File Format
//!
//! A single pretty-printed JSON object at `{data-dir}/atlantis.db`:
//!
//! ```text
//! {
//!   "schema_version": 1,
//!   "saved_at": "...",
//!   "locks": { "<repo>/<path>/<workspace>": ProjectLock, ... },
//!   "pulls": { "<host>::<repo>::<num>": PullStatus, ... },
//!   "apply_lock": CommandLock | null
//! }
//! ```
//!
//! The whole document is rewritten atomically on every change.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fsync::write_atomic;
use crate::types::{CommandLock, ProjectLock, PullStatus};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from reading or writing the lock store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Everything the server persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    /// When this document was last written.
    pub saved_at: DateTime<Utc>,

    /// Project locks, keyed by [`crate::types::lock_key`].
    pub locks: BTreeMap<String, ProjectLock>,

    /// Pull statuses, keyed by [`crate::types::pull_key`].
    pub pulls: BTreeMap<String, PullStatus>,

    /// The global apply lock. Absent means unlocked.
    pub apply_lock: Option<CommandLock>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        StoreDocument {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            locks: BTreeMap::new(),
            pulls: BTreeMap::new(),
            apply_lock: None,
        }
    }
}

/// Saves a document atomically to disk.
pub fn save_document(path: &Path, doc: &StoreDocument) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Loads a document from disk.
///
/// # Errors
///
/// Returns an error if:
/// - The file can't be read
/// - The JSON is malformed
/// - The schema version is incompatible
pub fn load_document(path: &Path) -> Result<StoreDocument> {
    let bytes = std::fs::read(path)?;
    let doc: StoreDocument = serde_json::from_slice(&bytes)?;
    if doc.schema_version != SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: doc.schema_version,
        });
    }
    Ok(doc)
}

/// Loads a document, returning an empty one if the file doesn't exist.
///
/// Other errors (malformed JSON, schema mismatch) are propagated.
pub fn load_or_default(path: &Path) -> Result<StoreDocument> {
    match load_document(path) {
        Ok(doc) => Ok(doc),
        Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            Ok(StoreDocument::default())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{pull, user};
    use crate::types::{Project, lock_key};
    use tempfile::tempdir;

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("atlantis.db");

        let mut doc = StoreDocument::default();
        let lock = ProjectLock {
            project: Project::new("owner/repo", "."),
            workspace: "default".into(),
            pull: pull(1),
            user: user(),
            time: Utc::now(),
        };
        doc.locks.insert(lock.key(), lock.clone());
        save_document(&path, &doc).unwrap();

        let loaded = load_document(&path).unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(
            loaded.locks.get(&lock_key(&lock.project, "default")),
            Some(&lock)
        );
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let doc = load_or_default(&dir.path().join("atlantis.db")).unwrap();
        assert!(doc.locks.is_empty());
        assert!(doc.apply_lock.is_none());
    }

    #[test]
    fn schema_mismatch_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("atlantis.db");
        let doc = StoreDocument {
            schema_version: SCHEMA_VERSION + 1,
            ..Default::default()
        };
        save_document(&path, &doc).unwrap();
        assert!(matches!(
            load_or_default(&path),
            Err(StoreError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("atlantis.db");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(load_or_default(&path), Err(StoreError::Json(_))));
    }
}
