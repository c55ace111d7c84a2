//! Command execution.
//!
//! A comment or pull request event becomes a [`CommandContext`]. The
//! [`ProjectCommandBuilder`] expands it into one [`ProjectContext`] per
//! affected project, the [`ProjectCommandRunner`] runs each through its
//! workflow [`Step`]s, and the command runner turns the results into a pull
//! request comment, commit statuses and pull status updates.
//!
//! ```text
//!  webhook ──▶ CommandRunner ──▶ builder ──▶ [ProjectContext]
//!                   │                              │
//!                   │                     ProjectCommandRunner
//!                   │                              │
//!                   ◀──────── [ProjectResult] ◀────┘
//!                   │
//!                   ├──▶ comment (render)
//!                   ├──▶ commit status "atlantis/{command}"
//!                   └──▶ lock store pull status
//! ```

mod apply;
mod approve_policies;
mod builder;
mod command_runner;
mod context;
mod hooks;
mod plan;
mod policy_check;
mod project_runner;
mod render;
mod repo_config;
mod requirements;
mod result;
mod status;
mod steps;
mod unlock;
mod version;

pub use builder::{BuildError, ProjectCommandBuilder, find_default_projects};
pub use command_runner::{CommandRunner, DefaultCommandRunner, RunnerConfig, RunnerParts};
pub use context::{CommandContext, CommandTrigger, ProjectContext};
pub use hooks::{HookStage, WorkflowHooksRunner};
pub use project_runner::ProjectCommandRunner;
pub use render::Renderer;
pub use repo_config::{
    DEFAULT_WHEN_MODIFIED, ProjectConfig, REPO_CONFIG_FILE, RepoConfig, RepoConfigError, Workflow,
    clean_path,
};
pub use requirements::{ApplyRequirement, UnknownRequirement, check_apply_requirements};
pub use result::{CommandResult, PlanSuccess, PolicyCheckSuccess, ProjectOutcome, ProjectResult};
pub use status::CommitStatusUpdater;
pub use steps::{Step, StepError, StepRunner, TerraformStepRunner, plan_file_name, run_steps};

#[cfg(test)]
pub(crate) mod test_support {
    //! Fakes for the runner's seams.

    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::context::ProjectContext;
    use super::repo_config::Workflow;
    use super::steps::{Step, StepError, StepRunner};
    use crate::commands::CommandName;
    use crate::git::{CloneResult, GitError, GitResult, WORKING_DIR_PREFIX, WorkingDir};
    use crate::test_utils::{pull, repo, user};
    use crate::types::{PullNum, PullRequest, Repo};

    pub fn project_context(command: CommandName, dir: &str, workspace: &str) -> ProjectContext {
        ProjectContext {
            command,
            head_repo: repo(),
            pull: pull(1),
            user: user(),
            repo_rel_dir: dir.to_string(),
            workspace: workspace.to_string(),
            project_name: String::new(),
            workflow: Workflow::default(),
            apply_requirements: Vec::new(),
            comment_args: Vec::new(),
            replan_cmd: String::new(),
            apply_cmd: String::new(),
            approve_policies_cmd: String::new(),
            automerge_enabled: false,
            verbose: false,
            prior_status: None,
        }
    }

    /// Steps answer with their name; chosen steps fail.
    #[derive(Debug, Default)]
    pub struct ScriptedSteps {
        failing: Mutex<Vec<Step>>,
        policies_fail: Mutex<bool>,
        apply_delay: Mutex<Option<Duration>>,
        ran: Mutex<Vec<(String, Step)>>,
    }

    impl ScriptedSteps {
        pub fn fail_on(&self, step: Step) {
            self.failing.lock().unwrap().push(step);
        }

        pub fn fail_policies(&self) {
            *self.policies_fail.lock().unwrap() = true;
        }

        /// Makes apply steps take `delay`.
        pub fn slow_apply(&self, delay: Duration) {
            *self.apply_delay.lock().unwrap() = Some(delay);
        }

        /// `(repo_rel_dir, step)` for every step run so far.
        pub fn ran(&self) -> Vec<(String, Step)> {
            self.ran.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StepRunner for ScriptedSteps {
        async fn run(
            &self,
            ctx: &ProjectContext,
            step: &Step,
            dir: &Path,
            _envs: &HashMap<String, String>,
        ) -> Result<String, StepError> {
            self.ran
                .lock()
                .unwrap()
                .push((ctx.repo_rel_dir.clone(), step.clone()));
            let delay = *self.apply_delay.lock().unwrap();
            if let (Step::Apply { .. }, Some(delay)) = (step, delay) {
                tokio::time::sleep(delay).await;
            }
            if matches!(step, Step::PolicyCheck { .. }) && *self.policies_fail.lock().unwrap() {
                return Err(StepError::PoliciesFailed {
                    output: "policy denied".into(),
                });
            }
            if self.failing.lock().unwrap().contains(step) {
                return Err(StepError::Failed {
                    command: step.name().to_string(),
                    dir: dir.to_path_buf(),
                    status: "exit status: 1".into(),
                    output: format!("{} failed", step),
                });
            }
            Ok(step.name().to_string())
        }
    }

    /// A working dir whose "clones" are plain directories under `root`.
    #[derive(Debug)]
    pub struct PreparedWorkingDir {
        root: PathBuf,
    }

    impl PreparedWorkingDir {
        pub fn new(root: &Path) -> Self {
            PreparedWorkingDir {
                root: root.to_path_buf(),
            }
        }

        fn dir(&self, repo: &Repo, pull: PullNum, workspace: &str) -> PathBuf {
            self.pull_dir(repo, pull).join(workspace)
        }

        fn pull_dir(&self, repo: &Repo, pull: PullNum) -> PathBuf {
            self.root
                .join(WORKING_DIR_PREFIX)
                .join(&repo.full_name)
                .join(pull.to_string())
        }
    }

    #[async_trait]
    impl WorkingDir for PreparedWorkingDir {
        async fn clone_pull(
            &self,
            _head_repo: &Repo,
            pull: &PullRequest,
            workspace: &str,
        ) -> GitResult<CloneResult> {
            let dir = self.dir(&pull.base_repo, pull.num, workspace);
            std::fs::create_dir_all(&dir)?;
            Ok(CloneResult {
                dir,
                has_diverged: false,
            })
        }

        fn get_working_dir(
            &self,
            repo: &Repo,
            pull: PullNum,
            workspace: &str,
        ) -> GitResult<PathBuf> {
            let dir = self.dir(repo, pull, workspace);
            if dir.is_dir() {
                Ok(dir)
            } else {
                Err(GitError::NotCloned(dir))
            }
        }

        fn get_pull_dir(&self, repo: &Repo, pull: PullNum) -> GitResult<PathBuf> {
            let dir = self.pull_dir(repo, pull);
            if dir.is_dir() {
                Ok(dir)
            } else {
                Err(GitError::NotCloned(dir))
            }
        }

        async fn delete(&self, repo: &Repo, pull: PullNum) -> GitResult<()> {
            let dir = self.pull_dir(repo, pull);
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
            Ok(())
        }

        async fn delete_for_workspace(
            &self,
            repo: &Repo,
            pull: PullNum,
            workspace: &str,
    ) -> GitResult<()> {
            let dir = self.dir(repo, pull, workspace);
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
            Ok(())
        }

        async fn has_diverged(&self, _dir: &Path) -> bool {
            false
        }
    }
}
