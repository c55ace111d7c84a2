//! Top-level command orchestration.
//!
//! [`DefaultCommandRunner`] owns one event from start to finish: the drainer
//! gate, pull request checks, workflow hooks, and dispatch to the
//! per-command runners (`plan`, `apply`, `policy_check`, `approve_policies`,
//! `unlock`, `version`), each implemented in its own module as methods on
//! the runner.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::commands::{CommandName, CommentCommand};
use crate::drainer::Drainer;
use crate::git::WorkingDir;
use crate::locking::{ApplyLocker, ProjectLocker, WorkingDirLocker};
use crate::persistence::LockStore;
use crate::types::{PullNum, PullRequest, PullStatus, Repo, User};
use crate::vcs::{CommitStatus, VcsClient};

use super::builder::{BuildError, ProjectCommandBuilder};
use super::context::{CommandContext, CommandTrigger, ProjectContext};
use super::hooks::{HookStage, WorkflowHooksRunner};
use super::project_runner::ProjectCommandRunner;
use super::render::Renderer;
use super::result::{CommandResult, ProjectResult};
use super::status::CommitStatusUpdater;

const SHUTTING_DOWN_COMMENT: &str = "Atlantis server is shutting down, please try again later.";
const CLOSED_PULL_COMMENT: &str = "Atlantis commands can't be run on closed pull requests";
const FORK_PULL_COMMENT: &str = "Atlantis commands can't be run on fork pull requests. To enable, set --allow-fork-prs or, to disable this message, set --silence-fork-pr-errors";

/// Runs commands triggered by webhooks.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a command commented on a pull request.
    ///
    /// `head_repo` and `pull` are `None` when the webhook didn't carry them;
    /// the pull request is then fetched by number.
    async fn run_comment_command(
        &self,
        base_repo: Repo,
        head_repo: Option<Repo>,
        pull: Option<PullRequest>,
        user: User,
        pull_num: PullNum,
        cmd: CommentCommand,
    );

    /// Plans the projects a pull request modifies.
    async fn run_autoplan_command(
        &self,
        base_repo: Repo,
        head_repo: Repo,
        pull: PullRequest,
        user: User,
    );
}

/// Server-wide switches for command runs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub allow_fork_prs: bool,
    pub silence_fork_pr_errors: bool,
    pub disable_apply_all: bool,
    pub disable_autoplan: bool,
    /// Merge pull requests once everything is applied, regardless of
    /// `atlantis.yaml`.
    pub automerge: bool,
    pub policy_checks_enabled: bool,
    /// Workspaces run concurrently up to this many.
    pub parallel_pool_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            allow_fork_prs: false,
            silence_fork_pr_errors: false,
            disable_apply_all: false,
            disable_autoplan: false,
            automerge: false,
            policy_checks_enabled: false,
            parallel_pool_size: 15,
        }
    }
}

/// The production [`CommandRunner`].
pub struct DefaultCommandRunner {
    pub(super) vcs: Arc<dyn VcsClient>,
    pub(super) builder: ProjectCommandBuilder,
    pub(super) project_runner: ProjectCommandRunner,
    pub(super) store: Arc<LockStore>,
    pub(super) project_locker: ProjectLocker,
    pub(super) apply_locker: ApplyLocker,
    pub(super) working_dir: Arc<dyn WorkingDir>,
    pub(super) locker: WorkingDirLocker,
    pub(super) status: CommitStatusUpdater,
    pub(super) renderer: Renderer,
    pub(super) hooks: WorkflowHooksRunner,
    pub(super) drainer: Drainer,
    pub(super) config: RunnerConfig,
}

impl std::fmt::Debug for DefaultCommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultCommandRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Everything [`DefaultCommandRunner`] is built from.
pub struct RunnerParts {
    pub vcs: Arc<dyn VcsClient>,
    pub builder: ProjectCommandBuilder,
    pub project_runner: ProjectCommandRunner,
    pub store: Arc<LockStore>,
    pub project_locker: ProjectLocker,
    pub apply_locker: ApplyLocker,
    pub working_dir: Arc<dyn WorkingDir>,
    /// Excludes running commands while a pull's clones are deleted.
    pub locker: WorkingDirLocker,
    pub status: CommitStatusUpdater,
    pub renderer: Renderer,
    pub hooks: WorkflowHooksRunner,
    pub drainer: Drainer,
}

impl DefaultCommandRunner {
    pub fn new(parts: RunnerParts, config: RunnerConfig) -> Self {
        DefaultCommandRunner {
            vcs: parts.vcs,
            builder: parts.builder,
            project_runner: parts.project_runner,
            store: parts.store,
            project_locker: parts.project_locker,
            apply_locker: parts.apply_locker,
            working_dir: parts.working_dir,
            locker: parts.locker,
            status: parts.status,
            renderer: parts.renderer,
            hooks: parts.hooks,
            drainer: parts.drainer,
            config,
        }
    }

    /// Rejects fork pull requests unless they're allowed. Returns whether to
    /// continue.
    async fn check_fork(&self, ctx: &CommandContext) -> bool {
        if !ctx.is_fork() || self.config.allow_fork_prs {
            return true;
        }
        info!(head = %ctx.head_repo, "Rejecting command on fork pull request");
        if !self.config.silence_fork_pr_errors {
            self.comment(ctx.base_repo(), ctx.pull.num, FORK_PULL_COMMENT, "").await;
        }
        false
    }

    // ─── Shared helpers for the per-command runners ───

    /// Posts a comment, logging failures.
    pub(super) async fn comment(&self, repo: &Repo, pull_num: PullNum, body: &str, command: &str) {
        if let Err(e) = self.vcs.create_comment(repo, pull_num, body, command).await {
            error!(pull = %pull_num, error = %e, "Unable to comment on pull request");
        }
    }

    /// Renders and posts a command's result.
    pub(super) async fn comment_result(
        &self,
        ctx: &CommandContext,
        command: CommandName,
        result: &CommandResult,
    ) {
        let body = self
            .renderer
            .render(command, result, ctx.base_repo().vcs_host.host_type);
        self.comment(ctx.base_repo(), ctx.pull.num, &body, command.as_str())
            .await;
    }

    /// Turns a build failure into a comment and a failed status.
    ///
    /// A failed clone leaves a partial working directory behind, which is
    /// removed.
    pub(super) async fn fail_build(
        &self,
        ctx: &CommandContext,
        command: CommandName,
        err: BuildError,
    ) {
        warn!(error = %err, "Unable to build project commands");
        if matches!(err, BuildError::Git(_))
            && let Err(e) = self.working_dir.delete(ctx.base_repo(), ctx.pull.num).await
        {
            warn!(error = %e, "Unable to delete working directory");
        }
        self.status
            .update_combined(ctx.base_repo(), &ctx.pull, CommitStatus::Failed, command)
            .await;
        let result = if err.is_failure() {
            CommandResult::with_failure(err.to_string())
        } else {
            CommandResult::with_error(err.to_string())
        };
        self.comment_result(ctx, command, &result).await;
    }

    /// Runs project commands.
    ///
    /// Projects in different workspaces run concurrently up to the pool
    /// size. Projects sharing a workspace share a working directory, so they
    /// run one after another.
    pub(super) async fn run_project_commands(
        &self,
        contexts: Vec<ProjectContext>,
    ) -> Vec<ProjectResult> {
        let mut groups: Vec<(String, Vec<ProjectContext>)> = Vec::new();
        for ctx in contexts {
            match groups.iter_mut().find(|(ws, _)| *ws == ctx.workspace) {
                Some((_, group)) => group.push(ctx),
                None => groups.push((ctx.workspace.clone(), vec![ctx])),
            }
        }

        let pool = self.config.parallel_pool_size.max(1);
        let runner = &self.project_runner;
        let grouped: Vec<Vec<ProjectResult>> = stream::iter(groups)
            .map(|(workspace, group)| async move {
                debug!(workspace = %workspace, projects = group.len(), "Running workspace");
                let mut results = Vec::with_capacity(group.len());
                for ctx in &group {
                    results.push(runner.run(ctx).await);
                }
                results
            })
            .buffer_unordered(pool)
            .collect()
            .await;
        grouped.into_iter().flatten().collect()
    }

    /// Records project results in the pull status.
    pub(super) fn record_results(
        &self,
        pull: &PullRequest,
        results: &[ProjectResult],
    ) -> Option<PullStatus> {
        let statuses = results.iter().map(ProjectResult::to_project_status).collect();
        match self.store.update_pull_with_results(pull, statuses) {
            Ok(status) => Some(status),
            Err(e) => {
                error!(error = %e, "Unable to update pull status");
                None
            }
        }
    }

    async fn resolve_pull(
        &self,
        base_repo: &Repo,
        head_repo: Option<Repo>,
        pull: Option<PullRequest>,
        pull_num: PullNum,
    ) -> Option<(PullRequest, Repo)> {
        if let (Some(pull), Some(head)) = (pull, head_repo) {
            return Some((pull, head));
        }
        match self.vcs.get_pull_request(base_repo, pull_num).await {
            Ok(found) => Some(found),
            Err(e) => {
                error!(pull = %pull_num, error = %e, "Unable to fetch pull request");
                None
            }
        }
    }
}

#[async_trait]
impl CommandRunner for DefaultCommandRunner {
    #[instrument(skip_all, fields(repo = %base_repo, pull = %pull_num, command = %cmd.name))]
    async fn run_comment_command(
        &self,
        base_repo: Repo,
        head_repo: Option<Repo>,
        pull: Option<PullRequest>,
        user: User,
        pull_num: PullNum,
        cmd: CommentCommand,
    ) {
        let Some(_operation) = self.drainer.try_add_new_ongoing_operation() else {
            self.comment(&base_repo, pull_num, SHUTTING_DOWN_COMMENT, "").await;
            return;
        };

        let Some((pull, head_repo)) = self.resolve_pull(&base_repo, head_repo, pull, pull_num).await
        else {
            return;
        };
        let ctx = CommandContext {
            head_repo,
            pull,
            user,
            trigger: CommandTrigger::Comment,
        };

        if !ctx.pull.is_open() {
            self.comment(&base_repo, pull_num, CLOSED_PULL_COMMENT, "").await;
            return;
        }
        if !self.check_fork(&ctx).await {
            return;
        }

        info!(%cmd, user = %ctx.user, "Running comment command");
        if cmd.name == CommandName::Unlock {
            self.run_unlock(&ctx).await;
            return;
        }
        if cmd.name == CommandName::Apply && !self.check_apply_allowed(&ctx, &cmd).await {
            return;
        }

        self.hooks.run(&ctx, cmd.name, HookStage::Pre).await;
        match cmd.name {
            CommandName::Plan => self.run_plan(&ctx, &cmd).await,
            CommandName::Apply => self.run_apply(&ctx, &cmd).await,
            CommandName::ApprovePolicies => self.run_approve_policies(&ctx, &cmd).await,
            CommandName::Version => self.run_version(&ctx, &cmd).await,
            CommandName::PolicyCheck | CommandName::Unlock => {
                warn!("Command can't be run from a comment");
            }
        }
        self.hooks.run(&ctx, cmd.name, HookStage::Post).await;
    }

    #[instrument(skip_all, fields(repo = %base_repo, pull = %pull.num))]
    async fn run_autoplan_command(
        &self,
        base_repo: Repo,
        head_repo: Repo,
        pull: PullRequest,
        user: User,
    ) {
        let Some(_operation) = self.drainer.try_add_new_ongoing_operation() else {
            self.comment(&base_repo, pull.num, SHUTTING_DOWN_COMMENT, "").await;
            return;
        };
        if self.config.disable_autoplan {
            debug!("Autoplan is disabled");
            return;
        }

        let ctx = CommandContext {
            head_repo,
            pull,
            user,
            trigger: CommandTrigger::Autoplan,
        };
        if !self.check_fork(&ctx).await {
            return;
        }

        self.hooks.run(&ctx, CommandName::Plan, HookStage::Pre).await;
        self.run_autoplan(&ctx).await;
        self.hooks.run(&ctx, CommandName::Plan, HookStage::Post).await;
    }
}


#[cfg(test)]
mod tests {
    use super::test_harness::harness;
    use super::*;
    use crate::test_utils::{FakeVcs, pull, pull_on, repo, repo_named, user};
    use crate::types::PullRequestState;

    #[tokio::test]
    async fn shutting_down_rejects_commands() {
        let h = harness(FakeVcs::default(), RunnerConfig::default(), false);
        h.drainer.shutdown_blocking().await;

        h.runner
            .run_comment_command(
                repo(),
                Some(repo()),
                Some(pull(1)),
                user(),
                PullNum(1),
                CommentCommand::new(CommandName::Plan),
            )
            .await;
        assert_eq!(h.comments(), vec![SHUTTING_DOWN_COMMENT.to_string()]);
        assert!(h.vcs.statuses().is_empty());
    }

    #[tokio::test]
    async fn closed_pull_requests_are_rejected() {
        let h = harness(FakeVcs::default(), RunnerConfig::default(), false);
        let mut closed = pull(1);
        closed.state = PullRequestState::Closed;
        h.runner
            .run_comment_command(
                repo(),
                Some(repo()),
                Some(closed),
                user(),
                PullNum(1),
                CommentCommand::new(CommandName::Plan),
            )
            .await;
        assert_eq!(h.comments(), vec![CLOSED_PULL_COMMENT.to_string()]);
    }

    #[tokio::test]
    async fn fork_pull_requests_are_rejected_unless_allowed() {
        let fork = repo_named("someone/repo");
        let h = harness(FakeVcs::default(), RunnerConfig::default(), false);
        h.runner
            .run_comment_command(
                repo(),
                Some(fork.clone()),
                Some(pull(1)),
                user(),
                PullNum(1),
                CommentCommand::new(CommandName::Plan),
            )
            .await;
        assert_eq!(h.comments(), vec![FORK_PULL_COMMENT.to_string()]);

        let silenced = harness(
            FakeVcs::default(),
            RunnerConfig {
                silence_fork_pr_errors: true,
                ..RunnerConfig::default()
            },
            false,
        );
        silenced
            .runner
            .run_autoplan_command(repo(), fork, pull(1), user())
            .await;
        assert!(silenced.comments().is_empty());
        assert!(silenced.vcs.statuses().is_empty());
    }

    #[tokio::test]
    async fn missing_pull_is_fetched() {
        let vcs = FakeVcs {
            pull: Some(pull_on(repo(), 4)),
            ..FakeVcs::default()
        };
        let h = harness(vcs, RunnerConfig::default(), false);
        h.runner
            .run_comment_command(
                repo(),
                None,
                None,
                user(),
                PullNum(4),
                CommentCommand::new(CommandName::Unlock),
            )
            .await;
        assert_eq!(
            h.comments(),
            vec!["All Atlantis locks for this PR have been unlocked and plans discarded".to_string()]
        );
    }

    #[tokio::test]
    async fn workspaces_run_concurrently_projects_in_order() {
        let h = harness(FakeVcs::default(), RunnerConfig::default(), false);
        let mut contexts = Vec::new();
        for (dir, ws) in [("a", "default"), ("b", "staging"), ("c", "default")] {
            h.clone_dir(1, ws, dir);
            contexts.push(crate::runner::test_support::project_context(
                CommandName::Plan,
                dir,
                ws,
            ));
        }
        let results = h.runner.run_project_commands(contexts).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(ProjectResult::is_successful));

        let ran: Vec<String> = h.steps.ran().into_iter().map(|(dir, _)| dir).collect();
        let a = ran.iter().position(|d| d == "a").unwrap();
        let c = ran.iter().position(|d| d == "c").unwrap();
        assert!(a < c);
    }
}
