//! Persistence layer.
//!
//! Project locks, pull statuses and the global apply lock are the only state
//! that outlives a webhook. They live in one JSON document that is loaded at
//! startup and rewritten atomically on every change.
//!
//! # File Layout
//!
//! ```text
//! <data_dir>/
//!   atlantis.db       # the store document (JSON)
//!   repos/            # working directories, see `crate::git`
//! ```
//!
//! # Crash Safety
//!
//! - The document is written with write-to-temp-then-rename
//! - Both the file and its directory are fsynced before the rename is
//!   considered done

pub mod document;
pub mod fsync;
pub mod store;

pub use document::{SCHEMA_VERSION, StoreDocument, StoreError, load_document, save_document};
pub use fsync::{fsync_dir, fsync_file, write_atomic};
pub use store::{LockAttempt, LockStore, STORE_FILE_NAME};
