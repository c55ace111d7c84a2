//! Cleanup when a pull request closes.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::git::{GitError, WorkingDir};
use crate::locking::{LockError, ProjectLocker, WorkingDirLocker};
use crate::persistence::{LockStore, StoreError};
use crate::types::{ProjectLock, PullRequest, Repo};
use crate::vcs::VcsClient;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("cleaning workspace: {0}")]
    WorkingDir(#[from] GitError),

    #[error("cleaning up locks: {0}")]
    Lock(#[from] LockError),

    #[error("cleaning up pull status: {0}")]
    Store(#[from] StoreError),
}

/// Discards everything a closed pull request left behind.
#[async_trait]
pub trait PullCleaner: Send + Sync {
    async fn clean_up_pull(&self, repo: &Repo, pull: &PullRequest) -> Result<(), CleanupError>;
}

/// Deletes the pull's working directories, locks and plan statuses, then
/// tells the pull request which locks went away.
#[derive(Clone)]
pub struct DefaultPullCleaner {
    working_dir: Arc<dyn WorkingDir>,
    dir_locker: WorkingDirLocker,
    locker: ProjectLocker,
    store: Arc<LockStore>,
    vcs: Arc<dyn VcsClient>,
}

impl std::fmt::Debug for DefaultPullCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultPullCleaner").finish_non_exhaustive()
    }
}

impl DefaultPullCleaner {
    pub fn new(
        working_dir: Arc<dyn WorkingDir>,
        dir_locker: WorkingDirLocker,
        locker: ProjectLocker,
        store: Arc<LockStore>,
        vcs: Arc<dyn VcsClient>,
    ) -> Self {
        DefaultPullCleaner {
            working_dir,
            dir_locker,
            locker,
            store,
            vcs,
        }
    }
}

#[async_trait]
impl PullCleaner for DefaultPullCleaner {
    #[instrument(skip_all, fields(repo = %repo, pull = %pull.num))]
    async fn clean_up_pull(&self, repo: &Repo, pull: &PullRequest) -> Result<(), CleanupError> {
        let _lock = self.dir_locker.try_lock_pull(&repo.full_name, pull.num)?;
        self.working_dir.delete(repo, pull.num).await?;
        let locks = self.locker.unlock_by_pull(&repo.full_name, pull.num)?;
        self.store.delete_pull_status(pull)?;
        info!(locks = locks.len(), "Cleaned up closed pull request");

        if locks.is_empty() {
            return Ok(());
        }
        let comment = closed_comment(&locks);
        if let Err(e) = self.vcs.create_comment(repo, pull.num, &comment, "").await {
            warn!(error = %e, "Unable to comment on closed pull request");
        }
        Ok(())
    }
}

/// Lists the released locks, one line per directory.
fn closed_comment(locks: &[ProjectLock]) -> String {
    let mut by_dir: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for lock in locks {
        by_dir
            .entry(lock.project.path.as_str())
            .or_default()
            .push(lock.workspace.as_str());
    }

    let mut comment = String::from(
        "Locks and plans deleted for the projects and workspaces modified in this pull request:\n",
    );
    for (dir, mut workspaces) in by_dir {
        workspaces.sort_unstable();
        workspaces.dedup();
        let listed: Vec<String> = workspaces.iter().map(|w| format!("`{}`", w)).collect();
        let _ = write!(comment, "\n- dir: `{}` workspaces: {}", dir, listed.join(", "));
    }
    comment
}
