//! `atlantis plan` and autoplan.

use tracing::{info, instrument};

use crate::commands::{CommandName, CommentCommand};
use crate::types::{ProjectPlanStatus, PullStatus};
use crate::vcs::CommitStatus;

use super::command_runner::DefaultCommandRunner;
use super::context::{CommandContext, ProjectContext};
use super::result::{CommandResult, ProjectOutcome};

impl DefaultCommandRunner {
    /// Plans every project the pull request modifies.
    ///
    /// A pull request that modifies no projects gets passing `0/0` statuses
    /// and no comment.
    #[instrument(skip_all)]
    pub(super) async fn run_autoplan(&self, ctx: &CommandContext) {
        let contexts = match self.builder.build_autoplan_commands(ctx).await {
            Ok(contexts) => contexts,
            Err(e) => return self.fail_build(ctx, CommandName::Plan, e).await,
        };

        if contexts.is_empty() {
            info!("No projects modified, skipping plan");
            self.set_zero_statuses(ctx).await;
            return;
        }

        self.status
            .update_combined(ctx.base_repo(), &ctx.pull, CommitStatus::Pending, CommandName::Plan)
            .await;
        self.plan_projects(ctx, contexts).await;
    }

    #[instrument(skip_all)]
    pub(super) async fn run_plan(&self, ctx: &CommandContext, cmd: &CommentCommand) {
        self.status
            .update_combined(ctx.base_repo(), &ctx.pull, CommitStatus::Pending, CommandName::Plan)
            .await;

        let contexts = match self.builder.build_plan_commands(ctx, cmd).await {
            Ok(contexts) => contexts,
            Err(e) => return self.fail_build(ctx, CommandName::Plan, e).await,
        };

        if contexts.is_empty() && !cmd.is_for_specific_project() {
            info!("No projects modified");
            self.set_zero_statuses(ctx).await;
            self.comment_result(ctx, CommandName::Plan, &CommandResult::default())
                .await;
            return;
        }
        self.plan_projects(ctx, contexts).await;
    }

    async fn plan_projects(&self, ctx: &CommandContext, contexts: Vec<ProjectContext>) {
        let results = self.run_project_commands(contexts.clone()).await;
        let result = CommandResult::from_projects(results);
        let pull_status = self.record_results(&ctx.pull, &result.project_results);

        self.update_plan_status(ctx, &result, pull_status.as_ref()).await;
        self.comment_result(ctx, CommandName::Plan, &result).await;

        if self.config.policy_checks_enabled && !result.has_errors() {
            let planned: Vec<ProjectContext> = contexts
                .iter()
                .filter(|c| {
                    result.project_results.iter().any(|r| {
                        matches!(r.outcome, ProjectOutcome::Plan(_))
                            && r.repo_rel_dir == c.repo_rel_dir
                            && r.workspace == c.workspace
                            && r.project_name == c.project_name
                    })
                })
                .map(|c| c.for_command(CommandName::PolicyCheck))
                .collect();
            if !planned.is_empty() {
                self.run_policy_checks(ctx, planned).await;
            }
        }
    }

    async fn update_plan_status(
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
                    CommandName::Plan,
                )
                .await;
            return;
        }

        let (planned, total) = match pull_status {
            Some(status) => (
                status.projects.len() - status.count(ProjectPlanStatus::PlanErrored),
                status.projects.len(),
            ),
            None => (result.success_count(), result.project_results.len()),
        };
        self.status
            .update_combined_count(
                ctx.base_repo(),
                &ctx.pull,
                CommitStatus::Success,
                CommandName::Plan,
                planned,
                total,
            )
            .await;

        // Nothing to apply: mark apply as done so required checks pass.
        if let Some(status) = pull_status
            && status.count(ProjectPlanStatus::PlannedNoChanges) == status.projects.len()
        {
            self.status
                .update_combined_count(
                    ctx.base_repo(),
                    &ctx.pull,
                    CommitStatus::Success,
                    CommandName::Apply,
                    0,
                    0,
                )
                .await;
        }
    }

    async fn set_zero_statuses(&self, ctx: &CommandContext) {
        let mut commands = vec![CommandName::Plan];
        if self.config.policy_checks_enabled {
            commands.push(CommandName::PolicyCheck);
        }
        commands.push(CommandName::Apply);
        for command in commands {
            self.status
                .update_combined_count(
                    ctx.base_repo(),
                    &ctx.pull,
                    CommitStatus::Success,
                    command,
                    0,
                    0,
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::{CommandName, CommentCommand};
    use crate::runner::command_runner::test_harness::harness;
    use crate::runner::{CommandRunner, RunnerConfig, Step};
    use crate::test_utils::{FakeVcs, pull, repo, user};
    use crate::types::{ProjectPlanStatus, PullNum};
    use crate::vcs::CommitStatus;

    fn modified(files: &[&str]) -> FakeVcs {
        FakeVcs {
            modified_files: files.iter().map(|s| s.to_string()).collect(),
            ..FakeVcs::default()
        }
    }

    #[tokio::test]
    async fn autoplan_without_projects_sets_zero_statuses() {
        let h = harness(modified(&["README.md"]), RunnerConfig::default(), false);
        h.runner
            .run_autoplan_command(repo(), repo(), pull(1), user())
            .await;
        assert!(h.comments().is_empty());
        assert_eq!(
            h.vcs.statuses(),
            vec![
                (
                    CommitStatus::Success,
                    "atlantis/plan".into(),
                    "0/0 projects planned successfully.".into()
                ),
                (
                    CommitStatus::Success,
                    "atlantis/apply".into(),
                    "0/0 projects applied successfully.".into()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn autoplan_plans_modified_dirs() {
        let h = harness(
            modified(&["infra/main.tf", "other/vars.tfvars"]),
            RunnerConfig::default(),
            false,
        );
        h.clone_dir(1, "default", "infra");
        h.clone_dir(1, "default", "other");
        h.runner
            .run_autoplan_command(repo(), repo(), pull(1), user())
            .await;

        let comments = h.comments();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].starts_with("Ran Plan for 2 projects:"), "{}", comments[0]);

        let statuses = h.vcs.statuses();
        assert_eq!(statuses.first().unwrap().2, "Plan in progress...");
        assert_eq!(statuses.last().unwrap().2, "2/2 projects planned successfully.");

        let recorded = h.store.get_pull_status(&pull(1)).unwrap();
        assert_eq!(recorded.count(ProjectPlanStatus::Planned), 2);
        assert_eq!(h.store.list().len(), 2);
    }

    #[tokio::test]
    async fn failed_plan_fails_status() {
        let h = harness(modified(&["main.tf"]), RunnerConfig::default(), false);
        h.clone_dir(1, "default", ".");
        h.steps.fail_on(Step::Plan { extra_args: vec![] });
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

        let comments = h.comments();
        assert!(comments[0].contains("**Plan Error**"), "{}", comments[0]);
        assert_eq!(
            h.vcs.statuses().last().unwrap(),
            &(CommitStatus::Failed, "atlantis/plan".into(), "Plan failed.".into())
        );
        assert_eq!(
            h.store.get_pull_status(&pull(1)).unwrap().projects[0].status,
            ProjectPlanStatus::PlanErrored
        );
    }

    #[tokio::test]
    async fn plan_for_specific_dir() {
        let h = harness(FakeVcs::default(), RunnerConfig::default(), false);
        h.clone_dir(1, "staging", "infra");
        h.runner
            .run_comment_command(
                repo(),
                Some(repo()),
                Some(pull(1)),
                user(),
                PullNum(1),
                CommentCommand::new(CommandName::Plan)
                    .with_dir("infra")
                    .with_workspace("staging"),
            )
            .await;
        let comments = h.comments();
        assert!(
            comments[0].starts_with("Ran Plan for dir: `infra` workspace: `staging`"),
            "{}",
            comments[0]
        );
        assert!(comments[0].contains("`atlantis apply -d infra -w staging`"));
    }

    #[tokio::test]
    async fn policy_checks_follow_a_clean_plan() {
        let h = harness(
            modified(&["main.tf"]),
            RunnerConfig {
                policy_checks_enabled: true,
                ..RunnerConfig::default()
            },
            false,
        );
        h.clone_dir(1, "default", ".");
        h.runner
            .run_autoplan_command(repo(), repo(), pull(1), user())
            .await;

        let comments = h.comments();
        assert_eq!(comments.len(), 2);
        assert!(comments[1].starts_with("Ran Policy Check for dir: `.`"), "{}", comments[1]);
        assert_eq!(
            h.store.get_pull_status(&pull(1)).unwrap().projects[0].status,
            ProjectPlanStatus::PolicyCheckPassed
        );
    }
}
