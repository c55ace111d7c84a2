//! `atlantis approve_policies`: clears failing policy checks.

use tracing::instrument;

use crate::commands::{CommandName, CommentCommand};
use crate::types::ProjectPlanStatus;

use super::command_runner::DefaultCommandRunner;
use super::context::CommandContext;
use super::result::CommandResult;

impl DefaultCommandRunner {
    #[instrument(skip_all)]
    pub(super) async fn run_approve_policies(&self, ctx: &CommandContext, cmd: &CommentCommand) {
        let contexts = match self.builder.build_approve_policies_commands(ctx, cmd).await {
            Ok(contexts) => contexts,
            Err(e) => return self.fail_build(ctx, CommandName::PolicyCheck, e).await,
        };

        let results = self.run_project_commands(contexts).await;
        let result = CommandResult::from_projects(results);
        let pull_status = self.record_results(&ctx.pull, &result.project_results);

        self.update_policy_check_status(
            ctx,
            &result,
            pull_status
                .as_ref()
                .map(|s| (s.count(ProjectPlanStatus::PolicyCheckPassed), s.projects.len())),
        )
        .await;
        self.comment_result(ctx, CommandName::ApprovePolicies, &result)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::{CommandName, CommentCommand};
    use crate::runner::command_runner::test_harness::harness;
    use crate::runner::{CommandRunner, RunnerConfig};
    use crate::test_utils::{FakeVcs, pull, repo, user};
    use crate::types::{ProjectPlanStatus, PullNum, User};
    use crate::vcs::CommitStatus;

    fn policy_config() -> RunnerConfig {
        RunnerConfig {
            policy_checks_enabled: true,
            ..RunnerConfig::default()
        }
    }

    fn failing_plan() -> FakeVcs {
        FakeVcs {
            modified_files: vec!["main.tf".into()],
            ..FakeVcs::default()
        }
    }

    #[tokio::test]
    async fn policy_owner_approves_failing_checks() {
        let h = harness(failing_plan(), policy_config(), false);
        h.clone_dir(1, "default", ".");
        h.steps.fail_policies();
        h.runner
            .run_autoplan_command(repo(), repo(), pull(1), user())
            .await;
        assert_eq!(
            h.store.get_pull_status(&pull(1)).unwrap().projects[0].status,
            ProjectPlanStatus::PolicyCheckErrored
        );

        h.runner
            .run_comment_command(
                repo(),
                Some(repo()),
                Some(pull(1)),
                User::new("owner"),
                PullNum(1),
                CommentCommand::new(CommandName::ApprovePolicies),
            )
            .await;

        let last = h.comments().last().unwrap().clone();
        assert!(last.starts_with("Ran Approve Policies for dir: `.`"), "{}", last);
        assert!(last.contains("Policies approved"));
        assert_eq!(
            h.vcs.statuses().last().unwrap(),
            &(
                CommitStatus::Success,
                "atlantis/policy_check".into(),
                "1/1 projects policies checked successfully.".into()
            )
        );
        assert_eq!(
            h.store.get_pull_status(&pull(1)).unwrap().projects[0].status,
            ProjectPlanStatus::PolicyCheckPassed
        );
    }

    #[tokio::test]
    async fn non_owner_is_refused() {
        let h = harness(failing_plan(), policy_config(), false);
        h.clone_dir(1, "default", ".");
        h.steps.fail_policies();
        h.runner
            .run_autoplan_command(repo(), repo(), pull(1), user())
            .await;
        h.runner
            .run_comment_command(
                repo(),
                Some(repo()),
                Some(pull(1)),
                user(),
                PullNum(1),
                CommentCommand::new(CommandName::ApprovePolicies),
            )
            .await;

        let last = h.comments().last().unwrap().clone();
        assert!(last.contains("user user is not a policy owner"), "{}", last);
        assert_eq!(h.vcs.statuses().last().unwrap().0, CommitStatus::Failed);
        assert_eq!(
            h.store.get_pull_status(&pull(1)).unwrap().projects[0].status,
            ProjectPlanStatus::PolicyCheckErrored
        );
    }
}
