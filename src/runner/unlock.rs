//! `atlantis unlock`: discards every plan and lock for a pull request.

use tracing::{error, info, instrument};

use crate::cleaner::CleanupError;
use crate::commands::CommandName;
use crate::locking::LockError;

use super::command_runner::DefaultCommandRunner;
use super::context::CommandContext;

const UNLOCKED_COMMENT: &str =
    "All Atlantis locks for this PR have been unlocked and plans discarded";
const UNLOCK_FAILED_COMMENT: &str = "Failed to delete PR locks";

impl DefaultCommandRunner {
    #[instrument(skip_all)]
    pub(super) async fn run_unlock(&self, ctx: &CommandContext) {
        let body = match self.discard_pull(ctx).await {
            Ok(count) => {
                info!(locks = count, "Unlocked pull request");
                UNLOCKED_COMMENT.to_string()
            }
            Err(CleanupError::Lock(e @ LockError::PullLocked)) => {
                info!("Pull request is busy, not unlocking");
                format!("{}: {}", UNLOCK_FAILED_COMMENT, e)
            }
            Err(e) => {
                error!(error = %e, "Unable to unlock pull request");
                UNLOCK_FAILED_COMMENT.to_string()
            }
        };
        self.comment(ctx.base_repo(), ctx.pull.num, &body, CommandName::Unlock.as_str())
            .await;
    }

    /// Releases the pull's locks, deletes its clones and forgets its plans.
    /// Returns how many locks were released.
    ///
    /// Fails without changing anything while another command of the pull is
    /// using a working directory.
    async fn discard_pull(&self, ctx: &CommandContext) -> Result<usize, CleanupError> {
        let base = ctx.base_repo();
        let _lock = self.locker.try_lock_pull(&base.full_name, ctx.pull.num)?;
        let released = self.project_locker.unlock_by_pull(&base.full_name, ctx.pull.num)?;
        self.working_dir.delete(base, ctx.pull.num).await?;
        self.store.delete_pull_status(&ctx.pull)?;
        Ok(released.len())
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
    async fn unlock_discards_plans_and_locks() {
        let h = harness(
            FakeVcs {
                modified_files: vec!["a/main.tf".into(), "b/main.tf".into()],
                ..FakeVcs::default()
            },
            RunnerConfig::default(),
            false,
        );
        h.clone_dir(1, "default", "a");
        h.clone_dir(1, "default", "b");
        h.runner
            .run_autoplan_command(repo(), repo(), pull(1), user())
            .await;
        assert_eq!(h.store.list().len(), 2);

        h.runner
            .run_comment_command(
                repo(),
                Some(repo()),
                Some(pull(1)),
                user(),
                PullNum(1),
                CommentCommand::new(CommandName::Unlock),
            )
            .await;

        assert_eq!(h.comments().last().unwrap(), super::UNLOCKED_COMMENT);
        assert!(h.store.list().is_empty());
        assert!(h.store.get_pull_status(&pull(1)).is_none());
        assert!(!h.data.path().join("repos/owner/repo/1").exists());
    }

    #[tokio::test]
    async fn unlock_refuses_while_a_command_runs() {
        let h = harness(
            FakeVcs {
                modified_files: vec!["a/main.tf".into()],
                ..FakeVcs::default()
            },
            RunnerConfig::default(),
            false,
        );
        h.clone_dir(1, "default", "a");
        h.runner
            .run_autoplan_command(repo(), repo(), pull(1), user())
            .await;
        let running = h.locker.try_lock("owner/repo", PullNum(1), "default").unwrap();

        h.runner
            .run_comment_command(
                repo(),
                Some(repo()),
                Some(pull(1)),
                user(),
                PullNum(1),
                CommentCommand::new(CommandName::Unlock),
            )
            .await;

        let last = h.comments().last().unwrap().clone();
        assert!(
            last.starts_with("Failed to delete PR locks: the Atlantis working dir is currently locked"),
            "{}",
            last
        );
        assert_eq!(h.store.list().len(), 1);
        assert!(h.store.get_pull_status(&pull(1)).is_some());
        assert!(h.data.path().join("repos/owner/repo/1/default/a").exists());
        drop(running);
    }
}
