//! Pull request model shared by every VCS provider.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{PullNum, Sha};
use super::repo::Repo;

/// Whether a pull request is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PullRequestState {
    Open,
    Closed,
}

/// A pull request (merge request on GitLab).
///
/// Fetched fresh for every event; never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub num: PullNum,
    pub head_commit: Sha,
    /// Web URL of the pull request.
    pub url: String,
    pub head_branch: String,
    pub base_branch: String,
    /// Username of the pull request author.
    pub author: String,
    pub state: PullRequestState,
    /// The repository the pull request is opened against.
    pub base_repo: Repo,
}

impl PullRequest {
    pub fn is_open(&self) -> bool {
        self.state == PullRequestState::Open
    }
}

/// The classification of a pull request webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PullRequestEventType {
    Opened,
    Updated,
    Closed,
    /// Anything not actionable: labels, reviews, drafts, reopen, etc.
    Other,
}

impl fmt::Display for PullRequestEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PullRequestEventType::Opened => "opened",
            PullRequestEventType::Updated => "updated",
            PullRequestEventType::Closed => "closed",
            PullRequestEventType::Other => "other",
        };
        f.write_str(s)
    }
}

/// A VCS user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub username: String,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        User {
            username: username.into(),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}
