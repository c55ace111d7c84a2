//! Project locks and per-pull plan status records.
//!
//! Both are persisted in the lock store and survive restarts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pull::{PullRequest, User};
use super::repo::Repo;

/// A Terraform project: a directory within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    pub repo_full_name: String,
    /// Directory relative to the repo root; `.` for the root.
    pub path: String,
}

impl Project {
    pub fn new(repo_full_name: impl Into<String>, path: impl Into<String>) -> Self {
        Project {
            repo_full_name: repo_full_name.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo_full_name, self.path)
    }
}

/// Lock held on one project workspace by the pull request that planned it.
///
/// The lock lasts until the plan is applied, the pull request is closed, or
/// someone unlocks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLock {
    pub project: Project,
    pub workspace: String,
    pub pull: PullRequest,
    /// Who ran the command that took the lock.
    pub user: User,
    pub time: DateTime<Utc>,
}

impl ProjectLock {
    /// The key this lock is stored under.
    pub fn key(&self) -> String {
        lock_key(&self.project, &self.workspace)
    }
}

/// `{repo_full_name}/{path}/{workspace}`.
pub fn lock_key(project: &Project, workspace: &str) -> String {
    format!("{}/{}/{}", project.repo_full_name, project.path, workspace)
}

/// The lifecycle stage of one project's plan within a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPlanStatus {
    PlanErrored,
    Planned,
    PlannedNoChanges,
    ApplyErrored,
    Applied,
    PlanDiscarded,
    PolicyCheckErrored,
    PolicyCheckPassed,
}

impl ProjectPlanStatus {
    /// Whether the project has a plan that is ready to apply.
    pub fn is_applyable(&self) -> bool {
        matches!(
            self,
            ProjectPlanStatus::Planned | ProjectPlanStatus::PolicyCheckPassed
        )
    }
}

impl fmt::Display for ProjectPlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProjectPlanStatus::PlanErrored => "plan_errored",
            ProjectPlanStatus::Planned => "planned",
            ProjectPlanStatus::PlannedNoChanges => "planned_no_changes",
            ProjectPlanStatus::ApplyErrored => "apply_errored",
            ProjectPlanStatus::Applied => "applied",
            ProjectPlanStatus::PlanDiscarded => "plan_discarded",
            ProjectPlanStatus::PolicyCheckErrored => "policy_check_errored",
            ProjectPlanStatus::PolicyCheckPassed => "policy_check_passed",
        };
        f.write_str(s)
    }
}

/// Status of one project in a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub repo_rel_dir: String,
    pub workspace: String,
    #[serde(default)]
    pub project_name: String,
    pub status: ProjectPlanStatus,
}

impl ProjectStatus {
    /// Whether both statuses describe the same project.
    pub fn same_project(&self, other: &ProjectStatus) -> bool {
        self.repo_rel_dir == other.repo_rel_dir
            && self.workspace == other.workspace
            && self.project_name == other.project_name
    }
}

/// Status of every project a pull request has run commands for, at its
/// current head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullStatus {
    pub pull: PullRequest,
    pub projects: Vec<ProjectStatus>,
}

impl PullStatus {
    /// Counts projects with the given status.
    pub fn count(&self, status: ProjectPlanStatus) -> usize {
        self.projects.iter().filter(|p| p.status == status).count()
    }

    /// Whether every project has been applied.
    pub fn all_applied(&self) -> bool {
        !self.projects.is_empty()
            && self
                .projects
                .iter()
                .all(|p| p.status == ProjectPlanStatus::Applied)
    }
}

/// `{hostname}::{full_name}::{num}`.
pub fn pull_key(repo: &Repo, num: super::ids::PullNum) -> String {
    format!("{}::{}::{}", repo.vcs_host.hostname, repo.full_name, num)
}

/// The global apply lock, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLock {
    pub locked: bool,
    pub time: DateTime<Utc>,
}
