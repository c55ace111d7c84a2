//! Pre- and post-workflow hooks.
//!
//! Hooks are shell commands configured on the server. They run in the
//! pull request's default-workspace clone before and after every command.
//! Hook failures are logged and never stop the command.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::commands::CommandName;
use crate::git::WorkingDir;
use crate::locking::WorkingDirLocker;
use crate::types::DEFAULT_WORKSPACE;

use super::context::CommandContext;

/// Which hooks to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Pre,
    Post,
}

impl HookStage {
    fn as_str(&self) -> &'static str {
        match self {
            HookStage::Pre => "pre_workflow",
            HookStage::Post => "post_workflow",
        }
    }
}

/// Runs workflow hooks.
#[derive(Clone)]
pub struct WorkflowHooksRunner {
    pre: Vec<String>,
    post: Vec<String>,
    working_dir: Arc<dyn WorkingDir>,
    locker: WorkingDirLocker,
}

impl std::fmt::Debug for WorkflowHooksRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowHooksRunner")
            .field("pre", &self.pre)
            .field("post", &self.post)
            .finish_non_exhaustive()
    }
}

impl WorkflowHooksRunner {
    pub fn new(
        pre: Vec<String>,
        post: Vec<String>,
        working_dir: Arc<dyn WorkingDir>,
        locker: WorkingDirLocker,
    ) -> Self {
        WorkflowHooksRunner {
            pre,
            post,
            working_dir,
            locker,
        }
    }

    /// Runs the hooks for `stage`, returning how many succeeded.
    ///
    /// With no hooks configured nothing is cloned or locked.
    #[instrument(skip_all, fields(stage = stage.as_str(), pull = %ctx.pull.num))]
    pub async fn run(&self, ctx: &CommandContext, command: CommandName, stage: HookStage) -> usize {
        let hooks = match stage {
            HookStage::Pre => &self.pre,
            HookStage::Post => &self.post,
        };
        if hooks.is_empty() {
            return 0;
        }

        let _lock = match self
            .locker
            .try_lock(&ctx.base_repo().full_name, ctx.pull.num, DEFAULT_WORKSPACE)
        {
            Ok(lock) => lock,
            Err(e) => {
                warn!(error = %e, "Skipping workflow hooks");
                return 0;
            }
        };
        let dir = match self
            .working_dir
            .clone_pull(&ctx.head_repo, &ctx.pull, DEFAULT_WORKSPACE)
            .await
        {
            Ok(clone) => clone.dir,
            Err(e) => {
                warn!(error = %e, "Unable to clone for workflow hooks");
                return 0;
            }
        };

        let mut succeeded = 0;
        for hook in hooks {
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(hook)
                .current_dir(&dir)
                .env("BASE_REPO_NAME", &ctx.base_repo().name)
                .env("BASE_REPO_OWNER", &ctx.base_repo().owner)
                .env("HEAD_REPO_NAME", &ctx.head_repo.name)
                .env("HEAD_REPO_OWNER", &ctx.head_repo.owner)
                .env("HEAD_BRANCH_NAME", &ctx.pull.head_branch)
                .env("HEAD_COMMIT", ctx.pull.head_commit.as_str())
                .env("BASE_BRANCH_NAME", &ctx.pull.base_branch)
                .env("PULL_NUM", ctx.pull.num.to_string())
                .env("PULL_URL", &ctx.pull.url)
                .env("PULL_AUTHOR", &ctx.pull.author)
                .env("USER_NAME", &ctx.user.username)
                .env("COMMAND_NAME", command.as_str())
                .output()
                .await;
            match output {
                Ok(out) if out.status.success() => {
                    info!(hook = %hook, "Workflow hook succeeded");
                    succeeded += 1;
                }
                Ok(out) => warn!(
                    hook = %hook,
                    status = %out.status,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "Workflow hook failed"
                ),
                Err(e) => warn!(hook = %hook, error = %e, "Unable to run workflow hook"),
            }
        }
        succeeded
    }
}
