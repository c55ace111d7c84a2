//! Locking.
//!
//! Three locks guard different things:
//!
//! - [`WorkingDirLocker`]: in-memory, held while a command uses a working
//!   directory. Try-once; contention is reported to the user.
//! - [`ProjectLocker`]: persisted, held by a pull request from plan until
//!   apply, unlock or close, so two pull requests can't plan the same state.
//! - [`ApplyLocker`]: the global switch that disables apply.
//!
//! Locks are taken in that order and never nested across projects.

mod apply;
mod project;
mod working_dir;

use thiserror::Error;

use crate::persistence::StoreError;

pub use apply::ApplyLocker;
pub use project::{ProjectLocker, TryLockResponse};
pub use working_dir::{WorkingDirLock, WorkingDirLocker};

/// Errors from taking or releasing locks.
#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "the {workspace} workspace is currently locked by another command that is running for this pull request.\nWait until the previous command is complete and try again"
    )]
    WorkspaceLocked { workspace: String },

    #[error(
        "the Atlantis working dir is currently locked by another command that is running for this pull request.\nWait until the previous command is complete and try again"
    )]
    PullLocked,

    #[error("DisableApplyFlag is set; Apply commands are locked globally until flag is unset")]
    ApplyDisabledByFlag,

    #[error("lock store: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, LockError>;
