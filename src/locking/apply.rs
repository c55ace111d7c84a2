//! The global apply lock.
//!
//! Apply can be disabled two ways: at startup with `--disable-apply`, which
//! can't be undone at runtime, or through the lock endpoints, which persist
//! the lock in the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::{LockError, Result};
use crate::persistence::LockStore;
use crate::types::CommandLock;

#[derive(Debug, Clone)]
pub struct ApplyLocker {
    store: Arc<LockStore>,
    disabled_by_flag: bool,
    started: DateTime<Utc>,
}

impl ApplyLocker {
    pub fn new(store: Arc<LockStore>, disabled_by_flag: bool) -> Self {
        Self {
            store,
            disabled_by_flag,
            started: Utc::now(),
        }
    }

    /// Persists the global apply lock.
    pub fn lock_apply(&self) -> Result<CommandLock> {
        if self.disabled_by_flag {
            return Err(LockError::ApplyDisabledByFlag);
        }
        let lock = self.store.lock_apply()?;
        info!("Global apply lock set");
        Ok(lock)
    }

    /// Clears the persisted global apply lock.
    pub fn unlock_apply(&self) -> Result<()> {
        if self.disabled_by_flag {
            return Err(LockError::ApplyDisabledByFlag);
        }
        self.store.unlock_apply()?;
        info!("Global apply lock cleared");
        Ok(())
    }

    /// The current apply lock, if apply is locked.
    ///
    /// The startup flag always counts as locked, dated from startup.
    pub fn check_apply_lock(&self) -> Option<CommandLock> {
        if self.disabled_by_flag {
            return Some(CommandLock {
                locked: true,
                time: self.started,
            });
        }
        self.store.apply_lock().filter(|l| l.locked)
    }

    pub fn is_locked(&self) -> bool {
        self.check_apply_lock().is_some()
    }
}
