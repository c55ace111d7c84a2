//! `atlantis version`.

use tracing::instrument;

use crate::commands::{CommandName, CommentCommand};

use super::command_runner::DefaultCommandRunner;
use super::context::CommandContext;
use super::result::CommandResult;

impl DefaultCommandRunner {
    #[instrument(skip_all)]
    pub(super) async fn run_version(&self, ctx: &CommandContext, cmd: &CommentCommand) {
        let contexts = match self.builder.build_version_commands(ctx, cmd).await {
            Ok(contexts) => contexts,
            Err(e) => return self.fail_build(ctx, CommandName::Version, e).await,
        };
        let results = self.run_project_commands(contexts).await;
        self.comment_result(ctx, CommandName::Version, &CommandResult::from_projects(results))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::{CommandName, CommentCommand};
    use crate::runner::command_runner::test_harness::harness;
    use crate::runner::{CommandRunner, RunnerConfig};
    use crate::test_utils::{FakeVcs, pull, repo, user};
    use crate::types::PullNum;

    #[tokio::test]
    async fn version_prints_per_project_without_status() {
        let h = harness(FakeVcs::default(), RunnerConfig::default(), false);
        h.clone_dir(1, "default", "infra");
        h.runner
            .run_comment_command(
                repo(),
                Some(repo()),
                Some(pull(1)),
                user(),
                PullNum(1),
                CommentCommand::new(CommandName::Version).with_dir("infra"),
            )
            .await;
        let comments = h.comments();
        assert_eq!(
            comments,
            vec!["Ran Version for dir: `infra` workspace: `default`\n\n```\nversion\n```".to_string()]
        );
        assert!(h.vcs.statuses().is_empty());
        // Version never takes project locks.
        assert!(h.store.list().is_empty());
    }
}
