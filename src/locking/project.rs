//! Persisted per-project plan locks.
//!
//! Planning a project locks its `(repo, path, workspace)` for the pull
//! request until the plan is applied, the lock is deleted, or the pull
//! request closes. Another pull request trying to plan the same project is
//! told which pull request holds it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use super::Result;
use crate::persistence::LockStore;
use crate::types::{Project, ProjectLock, PullNum, PullRequest, User};
use crate::vcs::VcsClient;

/// Outcome of [`ProjectLocker::try_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryLockResponse {
    pub lock_acquired: bool,

    /// Why the lock wasn't acquired, ready to show the user.
    pub lock_failure_reason: String,

    /// Key of the lock, for deleting it later.
    pub lock_key: String,
}

/// Takes and releases project locks in the lock store.
#[derive(Clone)]
pub struct ProjectLocker {
    store: Arc<LockStore>,
    vcs: Arc<dyn VcsClient>,
}

impl std::fmt::Debug for ProjectLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectLocker").finish_non_exhaustive()
    }
}

impl ProjectLocker {
    pub fn new(store: Arc<LockStore>, vcs: Arc<dyn VcsClient>) -> Self {
        Self { store, vcs }
    }

    /// Locks `project` in `workspace` for `pull`.
    ///
    /// A lock already held by the same pull request counts as acquired.
    #[instrument(skip_all, fields(project = %project, workspace = %workspace, pull = %pull.num))]
    pub fn try_lock(
        &self,
        project: &Project,
        workspace: &str,
        pull: &PullRequest,
        user: &User,
    ) -> Result<TryLockResponse> {
        let attempt = self.store.try_lock(ProjectLock {
            project: project.clone(),
            workspace: workspace.to_string(),
            pull: pull.clone(),
            user: user.clone(),
            time: Utc::now(),
        })?;

        if attempt.acquired {
            debug!(key = %attempt.key, "Acquired project lock");
            return Ok(TryLockResponse {
                lock_acquired: true,
                lock_failure_reason: String::new(),
                lock_key: attempt.key,
            });
        }

        let link = self.vcs.markdown_pull_link(&attempt.current.pull);
        info!(key = %attempt.key, holder = %attempt.current.pull.num, "Project is locked by another pull request");
        Ok(TryLockResponse {
            lock_acquired: false,
            lock_failure_reason: format!(
                "This project is currently locked by an unapplied plan from pull {}. To continue, delete the lock from {} or apply that plan and merge the pull request.\n\nOnce the lock is released, comment `atlantis plan` here to re-plan.",
                link, link
            ),
            lock_key: attempt.key,
        })
    }

    /// Deletes one lock by key.
    pub fn unlock(&self, key: &str) -> Result<Option<ProjectLock>> {
        let removed = self.store.unlock(key)?;
        debug!(key, existed = removed.is_some(), "Deleted project lock");
        Ok(removed)
    }

    /// Deletes every lock held by a pull request.
    pub fn unlock_by_pull(&self, repo_full_name: &str, num: PullNum) -> Result<Vec<ProjectLock>> {
        let removed = self.store.unlock_by_pull(repo_full_name, num)?;
        debug!(repo = repo_full_name, pull = %num, count = removed.len(), "Deleted pull request locks");
        Ok(removed)
    }

    /// All locks, ordered by key.
    pub fn list(&self) -> Vec<(String, ProjectLock)> {
        self.store.list()
    }

    pub fn get(&self, key: &str) -> Option<ProjectLock> {
        self.store.get_lock(key)
    }
}
