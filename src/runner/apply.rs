//! `atlantis apply` and automerge.

use tracing::{info, instrument, warn};

use crate::commands::{CommandName, CommentCommand};
use crate::types::{ProjectPlanStatus, PullStatus};
use crate::vcs::CommitStatus;

use super::command_runner::DefaultCommandRunner;
use super::context::CommandContext;
use super::result::CommandResult;

const APPLY_DISABLED_COMMENT: &str = "**Error:** Running `atlantis apply` is disabled.";
const APPLY_ALL_DISABLED_COMMENT: &str = "**Error:** Running `atlantis apply` without flags is disabled. You must specify which project to apply via the `-d <dir>`, `-w <workspace>` or `-p <project name>` flags.";
const AUTOMERGE_COMMENT: &str =
    "Automatically merging because all plans have been successfully applied.";

impl DefaultCommandRunner {
    /// Rejects apply when it's locked globally, or when apply-all is
    /// disabled and no project was named. Returns whether to continue.
    ///
    /// Runs before workflow hooks, so a rejected apply never clones or locks
    /// a working directory.
    pub(super) async fn check_apply_allowed(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> bool {
        let rejection = if self.apply_locker.is_locked() {
            info!("Apply is locked");
            APPLY_DISABLED_COMMENT
        } else if self.config.disable_apply_all && !cmd.is_for_specific_project() {
            info!("Apply without flags is disabled");
            APPLY_ALL_DISABLED_COMMENT
        } else {
            return true;
        };
        self.comment(ctx.base_repo(), ctx.pull.num, rejection, CommandName::Apply.as_str())
            .await;
        false
    }

    #[instrument(skip_all)]
    pub(super) async fn run_apply(&self, ctx: &CommandContext, cmd: &CommentCommand) {
        self.status
            .update_combined(ctx.base_repo(), &ctx.pull, CommitStatus::Pending, CommandName::Apply)
            .await;

        let contexts = match self.builder.build_apply_commands(ctx, cmd).await {
            Ok(contexts) => contexts,
            Err(e) => return self.fail_build(ctx, CommandName::Apply, e).await,
        };
        let automerge = self.config.automerge || contexts.iter().any(|c| c.automerge_enabled);

        let results = self.run_project_commands(contexts).await;
        let result = CommandResult::from_projects(results);
        let pull_status = self.record_results(&ctx.pull, &result.project_results);

        self.update_apply_status(ctx, &result, pull_status.as_ref()).await;
        self.comment_result(ctx, CommandName::Apply, &result).await;

        if automerge
            && !cmd.auto_merge_disabled
            && pull_status.as_ref().is_some_and(PullStatus::all_applied)
        {
            self.automerge(ctx).await;
        }
    }

    async fn update_apply_status(
        &self,
        ctx: &CommandContext,
        result: &CommandResult,
        pull_status: Option<&PullStatus>,
    ) {
        if result.has_errors() {
            self.status
                .update_combined(
                    ctx.base_repo(),
                    &ctx.pull,
                    CommitStatus::Failed,
                    CommandName::Apply,
                )
                .await;
            return;
        }
        let (applied, total) = match pull_status {
            Some(status) => (status.count(ProjectPlanStatus::Applied), status.projects.len()),
            None => (result.success_count(), result.project_results.len()),
        };
        // Plans that changed nothing never need applying.
        let no_changes = pull_status.map_or(0, |s| s.count(ProjectPlanStatus::PlannedNoChanges));
        self.status
            .update_combined_count(
                ctx.base_repo(),
                &ctx.pull,
                CommitStatus::Success,
                CommandName::Apply,
                applied + no_changes,
                total,
            )
            .await;
    }

    async fn automerge(&self, ctx: &CommandContext) {
        info!("Automerging pull request");
        self.comment(ctx.base_repo(), ctx.pull.num, AUTOMERGE_COMMENT, "")
            .await;
        if let Err(e) = self.vcs.merge_pull(&ctx.pull).await {
            warn!(error = %e, "Automerge failed");
            let body = format!("Automerging failed:\n```\n{}\n```", e);
            self.comment(ctx.base_repo(), ctx.pull.num, &body, "").await;
        }
    }
}
