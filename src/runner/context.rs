//! Per-command and per-project execution contexts.

use std::collections::HashMap;

use crate::commands::CommandName;
use crate::types::{ProjectPlanStatus, PullRequest, Repo, User};

use super::repo_config::Workflow;
use super::requirements::ApplyRequirement;
use super::steps::Step;

/// What started a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTrigger {
    /// A pull request was opened or updated.
    Autoplan,
    /// Someone commented a command.
    Comment,
}

/// One command run for one pull request.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Where the pull request's head branch lives. Differs from the base repo
    /// for fork pull requests.
    pub head_repo: Repo,
    pub pull: PullRequest,
    /// Who triggered the command.
    pub user: User,
    pub trigger: CommandTrigger,
}

impl CommandContext {
    pub fn base_repo(&self) -> &Repo {
        &self.pull.base_repo
    }

    /// Whether the pull request comes from a fork.
    pub fn is_fork(&self) -> bool {
        self.head_repo.owner != self.pull.base_repo.owner
    }
}

/// One project, in one workspace, that a command runs for.
///
/// Built by the project command builder and consumed once by the project
/// command runner.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub command: CommandName,
    pub head_repo: Repo,
    pub pull: PullRequest,
    pub user: User,
    /// Project directory relative to the repo root.
    pub repo_rel_dir: String,
    pub workspace: String,
    /// Name from `atlantis.yaml`; empty for unnamed projects.
    pub project_name: String,
    pub workflow: Workflow,
    pub apply_requirements: Vec<ApplyRequirement>,
    /// Extra Terraform arguments from the comment, after `--`.
    pub comment_args: Vec<String>,
    pub replan_cmd: String,
    pub apply_cmd: String,
    pub approve_policies_cmd: String,
    /// `automerge: true` in `atlantis.yaml`.
    pub automerge_enabled: bool,
    pub verbose: bool,
    /// The project's status before this command, if it has one.
    pub prior_status: Option<ProjectPlanStatus>,
}

impl ProjectContext {
    pub fn base_repo(&self) -> &Repo {
        &self.pull.base_repo
    }

    /// The steps this context's command runs.
    pub fn steps(&self) -> Vec<Step> {
        match self.command {
            CommandName::Plan => self.workflow.plan.clone(),
            CommandName::Apply => self.workflow.apply.clone(),
            CommandName::PolicyCheck => self.workflow.policy_check.clone(),
            CommandName::Version => vec![Step::Version],
            CommandName::ApprovePolicies | CommandName::Unlock => Vec::new(),
        }
    }

    /// The same project, for a different command.
    pub fn for_command(&self, command: CommandName) -> Self {
        ProjectContext {
            command,
            ..self.clone()
        }
    }

    /// Environment shared by every `run` and `env` step.
    pub fn step_env(&self) -> HashMap<String, String> {
        let base = self.base_repo();
        HashMap::from([
            ("WORKSPACE".to_string(), self.workspace.clone()),
            ("BASE_REPO_NAME".to_string(), base.name.clone()),
            ("BASE_REPO_OWNER".to_string(), base.owner.clone()),
            ("HEAD_REPO_NAME".to_string(), self.head_repo.name.clone()),
            ("HEAD_REPO_OWNER".to_string(), self.head_repo.owner.clone()),
            ("HEAD_BRANCH_NAME".to_string(), self.pull.head_branch.clone()),
            ("HEAD_COMMIT".to_string(), self.pull.head_commit.to_string()),
            ("BASE_BRANCH_NAME".to_string(), self.pull.base_branch.clone()),
            ("PROJECT_NAME".to_string(), self.project_name.clone()),
            ("PULL_NUM".to_string(), self.pull.num.to_string()),
            ("PULL_URL".to_string(), self.pull.url.clone()),
            ("PULL_AUTHOR".to_string(), self.pull.author.clone()),
            ("REPO_REL_DIR".to_string(), self.repo_rel_dir.clone()),
            ("USER_NAME".to_string(), self.user.username.clone()),
            ("COMMENT_ARGS".to_string(), self.comment_args.join(",")),
            ("COMMAND_NAME".to_string(), self.command.to_string()),
        ])
    }
}
