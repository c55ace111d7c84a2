//! In-memory try-locks over working directories.
//!
//! A working directory is shared by every command for the same repository,
//! pull request and workspace, and commands mutate it in place. The locker
//! guarantees at most one command touches it at a time. Acquisition never
//! waits: a second command fails immediately and the user is told to retry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, instrument};

use super::{LockError, Result};
use crate::types::PullNum;

#[derive(Debug, Default)]
struct Held {
    /// `{repo}/{pull}/{workspace}`
    workspaces: HashSet<String>,
    /// `{repo}/{pull}`
    pulls: HashSet<String>,
}

/// Registry of held working-directory locks.
///
/// Cheap to clone; clones share the registry.
#[derive(Debug, Default, Clone)]
pub struct WorkingDirLocker {
    held: Arc<Mutex<Held>>,
}

fn pull_key(repo_full_name: &str, pull: PullNum) -> String {
    format!("{}/{}", repo_full_name, pull)
}

fn workspace_key(repo_full_name: &str, pull: PullNum, workspace: &str) -> String {
    format!("{}/{}/{}", repo_full_name, pull, workspace)
}

impl WorkingDirLocker {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, Held> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Locks one workspace of a pull request.
    ///
    /// Fails if the workspace, or the whole pull request, is already locked.
    #[instrument(skip(self), fields(repo = %repo_full_name, pull = %pull))]
    pub fn try_lock(
        &self,
        repo_full_name: &str,
        pull: PullNum,
        workspace: &str,
    ) -> Result<WorkingDirLock> {
        let key = workspace_key(repo_full_name, pull, workspace);
        let mut held = self.held();
        if held.pulls.contains(&pull_key(repo_full_name, pull)) || held.workspaces.contains(&key) {
            debug!("Workspace already locked");
            return Err(LockError::WorkspaceLocked {
                workspace: workspace.to_string(),
            });
        }
        held.workspaces.insert(key.clone());
        debug!("Acquired workspace lock");
        Ok(WorkingDirLock {
            held: self.held.clone(),
            key: LockKey::Workspace(key),
        })
    }

    /// Locks every workspace of a pull request at once.
    ///
    /// Fails if any workspace of the pull request is locked.
    #[instrument(skip(self), fields(repo = %repo_full_name, pull = %pull))]
    pub fn try_lock_pull(&self, repo_full_name: &str, pull: PullNum) -> Result<WorkingDirLock> {
        let key = pull_key(repo_full_name, pull);
        let prefix = format!("{}/", key);
        let mut held = self.held();
        if held.pulls.contains(&key) || held.workspaces.iter().any(|w| w.starts_with(&prefix)) {
            debug!("Pull request already locked");
            return Err(LockError::PullLocked);
        }
        held.pulls.insert(key.clone());
        debug!("Acquired pull request lock");
        Ok(WorkingDirLock {
            held: self.held.clone(),
            key: LockKey::Pull(key),
        })
    }

    /// Number of locks currently held.
    pub fn len(&self) -> usize {
        let held = self.held();
        held.workspaces.len() + held.pulls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
enum LockKey {
    Workspace(String),
    Pull(String),
}

/// A held working-directory lock, released on drop.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WorkingDirLock {
    held: Arc<Mutex<Held>>,
    key: LockKey,
}

impl Drop for WorkingDirLock {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        match &self.key {
            LockKey::Workspace(k) => held.workspaces.remove(k),
            LockKey::Pull(k) => held.pulls.remove(k),
        };
    }
}
