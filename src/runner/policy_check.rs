//! Policy checks, run after a successful plan.

use tracing::instrument;

use crate::commands::CommandName;
use crate::types::ProjectPlanStatus;
use crate::vcs::CommitStatus;

use super::command_runner::DefaultCommandRunner;
use super::context::{CommandContext, ProjectContext};
use super::result::CommandResult;

impl DefaultCommandRunner {
    #[instrument(skip_all, fields(projects = contexts.len()))]
    pub(super) async fn run_policy_checks(
        &self,
        ctx: &CommandContext,
        contexts: Vec<ProjectContext>,
    ) {
        self.status
            .update_combined(
                ctx.base_repo(),
                &ctx.pull,
                CommitStatus::Pending,
                CommandName::PolicyCheck,
            )
            .await;

        let results = self.run_project_commands(contexts).await;
        let result = CommandResult::from_projects(results);
        let pull_status = self.record_results(&ctx.pull, &result.project_results);
        self.update_policy_check_status(ctx, &result, pull_status.as_ref().map(|s| {
            (s.count(ProjectPlanStatus::PolicyCheckPassed), s.projects.len())
        }))
        .await;
        self.comment_result(ctx, CommandName::PolicyCheck, &result)
            .await;
    }

    /// Sets `atlantis/policy_check` from a policy check or approval result.
    pub(super) async fn update_policy_check_status(
        &self,
        ctx: &CommandContext,
        result: &CommandResult,
        counts: Option<(usize, usize)>,
    ) {
        if result.has_errors() {
            self.status
                .update_combined(
                    ctx.base_repo(),
                    &ctx.pull,
                    CommitStatus::Failed,
                    CommandName::PolicyCheck,
                )
                .await;
            return;
        }
        let (passed, total) =
            counts.unwrap_or((result.success_count(), result.project_results.len()));
        self.status
            .update_combined_count(
                ctx.base_repo(),
                &ctx.pull,
                CommitStatus::Success,
                CommandName::PolicyCheck,
                passed,
                total,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::CommandName;
    use crate::runner::command_runner::test_harness::harness;
    use crate::runner::test_support::project_context;
    use crate::runner::RunnerConfig;
    use crate::runner::context::{CommandContext, CommandTrigger};
    use crate::test_utils::{FakeVcs, pull, repo, user};
    use crate::types::ProjectPlanStatus;
    use crate::vcs::CommitStatus;

    fn ctx() -> CommandContext {
        CommandContext {
            head_repo: repo(),
            pull: pull(1),
            user: user(),
            trigger: CommandTrigger::Autoplan,
        }
    }

    #[tokio::test]
    async fn failing_policies_fail_the_status() {
        let h = harness(
            FakeVcs::default(),
            RunnerConfig {
                policy_checks_enabled: true,
                ..RunnerConfig::default()
            },
            false,
        );
        h.clone_dir(1, "default", ".");
        h.steps.fail_policies();

        h.runner
            .run_policy_checks(
                &ctx(),
                vec![project_context(CommandName::PolicyCheck, ".", "default")],
            )
            .await;

        let comments = h.comments();
        assert!(
            comments[0].contains("**Policy Check Failed**: Some policy sets did not pass."),
            "{}",
            comments[0]
        );
        assert_eq!(
            h.vcs.statuses(),
            vec![
                (
                    CommitStatus::Pending,
                    "atlantis/policy_check".into(),
                    "Policy Check in progress...".into()
                ),
                (
                    CommitStatus::Failed,
                    "atlantis/policy_check".into(),
                    "Policy Check failed.".into()
                ),
            ]
        );
        assert_eq!(
            h.store.get_pull_status(&pull(1)).unwrap().projects[0].status,
            ProjectPlanStatus::PolicyCheckErrored
        );
    }

    #[tokio::test]
    async fn passing_policies_count_projects() {
        let h = harness(FakeVcs::default(), RunnerConfig::default(), false);
        h.clone_dir(1, "default", "a");
        h.clone_dir(1, "default", "b");
        h.runner
            .run_policy_checks(
                &ctx(),
                vec![
                    project_context(CommandName::PolicyCheck, "a", "default"),
                    project_context(CommandName::PolicyCheck, "b", "default"),
                ],
            )
            .await;
        assert_eq!(
            h.vcs.statuses().last().unwrap().2,
            "2/2 projects policies checked successfully."
        );
    }
}
