//! Canonical domain types.
//!
//! Every provider payload is translated into these types at the parsing
//! boundary; nothing past the parser sees provider-specific shapes.

pub mod ids;
pub mod lock;
pub mod pull;
pub mod repo;

pub use ids::{DEFAULT_REPO_REL_DIR, DEFAULT_WORKSPACE, PullNum, Sha};
pub use lock::{
    CommandLock, Project, ProjectLock, ProjectPlanStatus, ProjectStatus, PullStatus, lock_key,
    pull_key,
};
pub use pull::{PullRequest, PullRequestEventType, PullRequestState, User};
pub use repo::{Repo, RepoError, VcsHost, VcsHostType, split_repo_full_name};
