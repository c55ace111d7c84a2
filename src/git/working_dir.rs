//! Per-workspace clones of pull request code.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{GitError, GitResult, run_git};
use crate::types::{PullNum, PullRequest, Repo};

/// Directory under the data dir holding every clone.
pub const WORKING_DIR_PREFIX: &str = "repos";

const MERGE_IDENTITY: [&str; 4] = [
    "-c",
    "user.name=atlantis",
    "-c",
    "user.email=atlantis@runatlantis.io",
];

/// How the pull request's code is checked out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CheckoutStrategy {
    /// Check out the head branch as is.
    #[default]
    Branch,
    /// Merge the head branch into the base branch, checking out the result.
    Merge,
}

/// A fresh or reused clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneResult {
    pub dir: PathBuf,
    /// The base branch moved since the clone was made. Only ever set with the
    /// merge strategy, where the plan would no longer match what gets merged.
    pub has_diverged: bool,
}

/// Manages the on-disk clones commands run in.
#[async_trait]
pub trait WorkingDir: Send + Sync {
    /// Clones the pull request for `workspace`, reusing an existing clone
    /// that's already at the head commit.
    async fn clone_pull(
        &self,
        head_repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> GitResult<CloneResult>;

    /// Path of an existing clone. Errors if it was never cloned.
    fn get_working_dir(&self, repo: &Repo, pull: PullNum, workspace: &str) -> GitResult<PathBuf>;

    /// Directory holding every workspace clone of a pull request.
    fn get_pull_dir(&self, repo: &Repo, pull: PullNum) -> GitResult<PathBuf>;

    /// Deletes every clone of a pull request.
    async fn delete(&self, repo: &Repo, pull: PullNum) -> GitResult<()>;

    /// Deletes one workspace's clone.
    async fn delete_for_workspace(
        &self,
        repo: &Repo,
        pull: PullNum,
        workspace: &str,
    ) -> GitResult<()>;

    /// Whether the base branch has moved past a merge-strategy clone.
    async fn has_diverged(&self, dir: &Path) -> bool;
}

/// [`WorkingDir`] backed by `git` subprocesses under a data directory.
#[derive(Debug, Clone)]
pub struct FileWorkingDir {
    data_dir: PathBuf,
    strategy: CheckoutStrategy,
    head_clone_url_override: Option<String>,
}

impl FileWorkingDir {
    pub fn new(data_dir: impl Into<PathBuf>, strategy: CheckoutStrategy) -> Self {
        Self {
            data_dir: data_dir.into(),
            strategy,
            head_clone_url_override: None,
        }
    }

    /// Clones the head branch from `url` instead of the repo's clone URL.
    pub fn with_head_clone_url(mut self, url: impl Into<String>) -> Self {
        self.head_clone_url_override = Some(url.into());
        self
    }

    fn repo_pull_dir(&self, repo: &Repo, pull: PullNum) -> PathBuf {
        self.data_dir
            .join(WORKING_DIR_PREFIX)
            .join(&repo.full_name)
            .join(pull.to_string())
    }

    fn clone_dir(&self, repo: &Repo, pull: PullNum, workspace: &str) -> PathBuf {
        self.repo_pull_dir(repo, pull).join(workspace)
    }

    /// The ref whose commit must match the pull request's head commit.
    fn head_ref(&self) -> &'static str {
        match self.strategy {
            CheckoutStrategy::Branch => "HEAD",
            // The merge commit's second parent is the head branch.
            CheckoutStrategy::Merge => "HEAD^2",
        }
    }

    async fn force_clone(&self, dir: &Path, head_repo: &Repo, pull: &PullRequest) -> GitResult<()> {
        if tokio::fs::try_exists(dir).await? {
            debug!(dir = %dir.display(), "Removing stale clone");
            tokio::fs::remove_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(dir).await?;

        let head_url = self
            .head_clone_url_override
            .as_deref()
            .unwrap_or(&head_repo.clone_url);
        let redact = [
            (head_repo.clone_url.as_str(), head_repo.sanitized_clone_url.as_str()),
            (
                pull.base_repo.clone_url.as_str(),
                pull.base_repo.sanitized_clone_url.as_str(),
            ),
        ];

        match self.strategy {
            CheckoutStrategy::Branch => {
                run_git(
                    dir,
                    &[
                        "clone",
                        "--depth=1",
                        "--branch",
                        &pull.head_branch,
                        "--single-branch",
                        head_url,
                        ".",
                    ],
                    &redact,
                )
                .await?;
            }
            CheckoutStrategy::Merge => {
                run_git(
                    dir,
                    &[
                        "clone",
                        "--branch",
                        &pull.base_branch,
                        "--single-branch",
                        &pull.base_repo.clone_url,
                        ".",
                    ],
                    &redact,
                )
                .await?;
                run_git(dir, &["remote", "add", "head", head_url], &redact).await?;
                let fetch_ref = format!("+refs/heads/{}:", pull.head_branch);
                run_git(dir, &["fetch", "head", &fetch_ref], &redact).await?;

                let mut merge: Vec<&str> = MERGE_IDENTITY.to_vec();
                merge.extend(["merge", "-q", "--no-ff", "-m", "atlantis-merge", "FETCH_HEAD"]);
                run_git(dir, &merge, &redact).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkingDir for FileWorkingDir {
    #[instrument(
        skip_all,
        fields(repo = %head_repo.full_name, pull = %pull.num, workspace = %workspace)
    )]
    async fn clone_pull(
        &self,
        head_repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> GitResult<CloneResult> {
        let dir = self.clone_dir(&pull.base_repo, pull.num, workspace);

        if tokio::fs::try_exists(&dir).await? {
            match run_git(&dir, &["rev-parse", self.head_ref()], &[]).await {
                Ok(current) if current.starts_with(pull.head_commit.as_str()) => {
                    debug!(commit = %pull.head_commit.short(), "Clone is already at head commit");
                    let has_diverged = match self.strategy {
                        CheckoutStrategy::Merge => self.has_diverged(&dir).await,
                        CheckoutStrategy::Branch => false,
                    };
                    return Ok(CloneResult { dir, has_diverged });
                }
                Ok(current) => {
                    debug!(current = %current, wanted = %pull.head_commit, "Clone is at another commit, recloning");
                }
                Err(e) => {
                    warn!(error = %e, "Existing clone is unusable, recloning");
                }
            }
        }

        info!(dir = %dir.display(), "Cloning pull request");
        self.force_clone(&dir, head_repo, pull).await?;
        Ok(CloneResult {
            dir,
            has_diverged: false,
        })
    }

    fn get_working_dir(&self, repo: &Repo, pull: PullNum, workspace: &str) -> GitResult<PathBuf> {
        let dir = self.clone_dir(repo, pull, workspace);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(GitError::NotCloned(dir))
        }
    }

    fn get_pull_dir(&self, repo: &Repo, pull: PullNum) -> GitResult<PathBuf> {
        let dir = self.repo_pull_dir(repo, pull);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(GitError::NotCloned(dir))
        }
    }

    async fn delete(&self, repo: &Repo, pull: PullNum) -> GitResult<()> {
        remove_if_exists(&self.repo_pull_dir(repo, pull)).await
    }

    async fn delete_for_workspace(
        &self,
        repo: &Repo,
        pull: PullNum,
        workspace: &str,
    ) -> GitResult<()> {
        remove_if_exists(&self.clone_dir(repo, pull, workspace)).await
    }

    async fn has_diverged(&self, dir: &Path) -> bool {
        if let Err(e) = run_git(dir, &["fetch"], &[]).await {
            warn!(error = %e, "Fetching to check for divergence failed");
            return false;
        }
        match run_git(dir, &["status", "--untracked-files=no"], &[]).await {
            Ok(status) => status.contains("have diverged"),
            Err(e) => {
                warn!(error = %e, "Checking for divergence failed");
                false
            }
        }
    }
}

async fn remove_if_exists(dir: &Path) -> GitResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!(dir = %dir.display(), "Deleted working directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
