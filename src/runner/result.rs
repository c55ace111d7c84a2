//! Results of running commands.

use thiserror::Error;

use crate::commands::CommandName;
use crate::git::GitError;
use crate::locking::LockError;
use crate::persistence::StoreError;
use crate::types::{ProjectPlanStatus, ProjectStatus};
use crate::vcs::VcsError;

/// A successful plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSuccess {
    pub terraform_output: String,
    /// Where the project lock can be viewed and deleted.
    pub lock_url: String,
    pub replan_cmd: String,
    pub apply_cmd: String,
    /// The base branch moved past the clone, so the plan may be stale.
    pub has_diverged: bool,
}

impl PlanSuccess {
    /// Whether Terraform reported nothing to do.
    pub fn no_changes(&self) -> bool {
        self.terraform_output.contains("No changes.")
    }
}

/// A policy check whose policies all passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCheckSuccess {
    pub policy_output: String,
    pub lock_url: String,
    pub replan_cmd: String,
    pub apply_cmd: String,
    pub has_diverged: bool,
}

/// How one project fared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    /// Something broke.
    Error(String),
    /// A precondition wasn't met, e.g. the project is locked.
    Failure(String),
    Plan(PlanSuccess),
    PolicyCheck(PolicyCheckSuccess),
    Apply(String),
    Version(String),
    ApprovePolicies(String),
}

/// The result of running a command for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectResult {
    pub command: CommandName,
    pub repo_rel_dir: String,
    pub workspace: String,
    pub project_name: String,
    pub outcome: ProjectOutcome,
}

impl ProjectResult {
    pub fn is_successful(&self) -> bool {
        !matches!(self.outcome, ProjectOutcome::Error(_) | ProjectOutcome::Failure(_))
    }

    /// The plan status this result leaves the project in.
    pub fn plan_status(&self) -> ProjectPlanStatus {
        match (&self.command, &self.outcome) {
            (CommandName::Plan, ProjectOutcome::Plan(plan)) if plan.no_changes() => {
                ProjectPlanStatus::PlannedNoChanges
            }
            (CommandName::Plan, ProjectOutcome::Plan(_)) => ProjectPlanStatus::Planned,
            (CommandName::Plan, _) => ProjectPlanStatus::PlanErrored,
            (CommandName::Apply, ProjectOutcome::Apply(_)) => ProjectPlanStatus::Applied,
            (CommandName::Apply, _) => ProjectPlanStatus::ApplyErrored,
            (CommandName::PolicyCheck | CommandName::ApprovePolicies, _)
                if self.is_successful() =>
            {
                ProjectPlanStatus::PolicyCheckPassed
            }
            (CommandName::PolicyCheck | CommandName::ApprovePolicies, _) => {
                ProjectPlanStatus::PolicyCheckErrored
            }
            // Version and unlock don't touch plan status; callers don't
            // record them.
            (CommandName::Version | CommandName::Unlock, _) => ProjectPlanStatus::Planned,
        }
    }

    pub fn to_project_status(&self) -> ProjectStatus {
        ProjectStatus {
            repo_rel_dir: self.repo_rel_dir.clone(),
            workspace: self.workspace.clone(),
            project_name: self.project_name.clone(),
            status: self.plan_status(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ProjectOutcome::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            ProjectOutcome::Failure(f) => Some(f),
            _ => None,
        }
    }
}

/// The result of running a command for a whole pull request.
///
/// `error` and `failure` are command-wide and replace the per-project
/// results in the comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub error: Option<String>,
    pub failure: Option<String>,
    pub project_results: Vec<ProjectResult>,
}

impl CommandResult {
    pub fn with_error(error: impl Into<String>) -> Self {
        CommandResult {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_failure(failure: impl Into<String>) -> Self {
        CommandResult {
            failure: Some(failure.into()),
            ..Default::default()
        }
    }

    pub fn from_projects(project_results: Vec<ProjectResult>) -> Self {
        CommandResult {
            project_results,
            ..Default::default()
        }
    }

    /// Whether anything, command-wide or per project, went wrong.
    pub fn has_errors(&self) -> bool {
        self.error.is_some()
            || self.failure.is_some()
            || self.project_results.iter().any(|r| !r.is_successful())
    }

    pub fn success_count(&self) -> usize {
        self.project_results.iter().filter(|r| r.is_successful()).count()
    }
}

/// Why a project command stopped early.
#[derive(Debug, Error)]
pub enum Halt {
    /// Shown to the user as a failure: they can do something about it.
    #[error("{0}")]
    Failure(String),

    /// Shown to the user as an error.
    #[error("{0}")]
    Error(String),
}

impl Halt {
    pub fn into_outcome(self) -> ProjectOutcome {
        match self {
            Halt::Failure(f) => ProjectOutcome::Failure(f),
            Halt::Error(e) => ProjectOutcome::Error(e),
        }
    }
}

impl From<LockError> for Halt {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Store(_) => Halt::Error(e.to_string()),
            _ => Halt::Failure(e.to_string()),
        }
    }
}

impl From<GitError> for Halt {
    fn from(e: GitError) -> Self {
        Halt::Error(e.to_string())
    }
}

impl From<VcsError> for Halt {
    fn from(e: VcsError) -> Self {
        Halt::Error(e.to_string())
    }
}

impl From<StoreError> for Halt {
    fn from(e: StoreError) -> Self {
        Halt::Error(e.to_string())
    }
}
