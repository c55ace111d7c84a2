//! Shared test fixtures and arbitrary generators for property-based testing.

use std::sync::Mutex;

use async_trait::async_trait;
use proptest::prelude::*;

use crate::types::{PullNum, PullRequest, PullRequestState, Repo, Sha, User, VcsHostType};
use crate::vcs::{self, CommitStatus, VcsClient, VcsError};

pub fn repo() -> Repo {
    repo_named("owner/repo")
}

pub fn repo_named(full_name: &str) -> Repo {
    Repo::new(
        VcsHostType::Github,
        full_name,
        &format!("https://github.com/{}.git", full_name),
        "github-user",
        "github-token",
    )
    .unwrap()
}

pub fn pull(num: u64) -> PullRequest {
    pull_on(repo(), num)
}

pub fn pull_on(base_repo: Repo, num: u64) -> PullRequest {
    PullRequest {
        num: PullNum(num),
        head_commit: Sha::new(format!("{:040x}", num)),
        url: format!("https://github.com/{}/pull/{}", base_repo.full_name, num),
        head_branch: format!("branch-{}", num),
        base_branch: "main".into(),
        author: "author".into(),
        state: PullRequestState::Open,
        base_repo,
    }
}

pub fn user() -> User {
    User::new("user")
}

pub fn arb_workspace() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,12}".prop_map(String::from)
}

pub fn arb_repo_rel_dir() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(".".to_string()),
        "[a-z]{1,8}(/[a-z]{1,8}){0,2}".prop_map(String::from),
    ]
}

pub fn arb_pull_num() -> impl Strategy<Value = u64> {
    1u64..10_000
}

// ─── Recording VCS client ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct FakeVcsLog {
    comments: Vec<(PullNum, String)>,
    statuses: Vec<(CommitStatus, String, String)>,
    merged: Vec<PullNum>,
}

/// A [`VcsClient`] that records writes and answers reads from its fields.
#[derive(Debug, Default)]
pub struct FakeVcs {
    pub modified_files: Vec<String>,
    pub approved: bool,
    pub mergeable: bool,
    pub fail_merge: bool,
    /// Returned by `get_pull_request`; `None` answers with an error.
    pub pull: Option<PullRequest>,
    pub(crate) log: Mutex<FakeVcsLog>,
}

impl FakeVcs {
    pub fn comments(&self) -> Vec<(PullNum, String)> {
        self.log.lock().unwrap().comments.clone()
    }

    /// Every status update as `(state, context, description)`.
    pub fn statuses(&self) -> Vec<(CommitStatus, String, String)> {
        self.log.lock().unwrap().statuses.clone()
    }

    pub fn merged(&self) -> Vec<PullNum> {
        self.log.lock().unwrap().merged.clone()
    }
}

#[async_trait]
impl VcsClient for FakeVcs {
    async fn get_pull_request(
        &self,
        _repo: &Repo,
        num: PullNum) -> vcs::Result<(PullRequest,
        Repo,
    )> {
        self.pull
            .clone()
            .map(|p| {
                let head = p.base_repo.clone();
                (p, head)
            })
            .ok_or_else(|| VcsError::permanent(format!("pull {} not found", num)))
    }

    async fn get_modified_files(
        &self,
        _repo: &Repo,
        _pull: &PullRequest,
    ) -> vcs::Result<Vec<String>> {
        Ok(self.modified_files.clone())
    }

    async fn create_comment(
        &self,
        _repo: &Repo,
        pull_num: PullNum,
        comment: &str,
        _command: &str,
    ) -> vcs::Result<()> {
        self.log
            .lock()
            .unwrap()
            .comments
            .push((pull_num, comment.to_string()));
        Ok(())
    }

    async fn pull_is_approved(&self, _repo: &Repo, _pull: &PullRequest) -> vcs::Result<bool> {
        Ok(self.approved)
    }

    async fn pull_is_mergeable(&self, _repo: &Repo, _pull: &PullRequest) -> vcs::Result<bool> {
        Ok(self.mergeable)
    }

    async fn update_status(
        &self,
        _repo: &Repo,
        _pull: &PullRequest,
        state: CommitStatus,
        src: &str,
        description: &str,
        _url: &str,
    ) -> vcs::Result<()> {
        self.log
            .lock()
            .unwrap()
            .statuses
            .push((state, src.to_string(), description.to_string()));
        Ok(())
    }

    async fn merge_pull(&self, pull: &PullRequest) -> vcs::Result<()> {
        if self.fail_merge {
            return Err(VcsError::permanent("merge blocked"));
        }
        self.log.lock().unwrap().merged.push(pull.num);
        Ok(())
    }

    fn markdown_pull_link(&self, pull: &PullRequest) -> String {
        format!("#{}", pull.num)
    }
}
