//! Runs one command for one project.
//!
//! Each operation returns a [`ProjectResult`]; nothing here fails the whole
//! command. Locks are taken working directory first, then project.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::commands::CommandName;
use crate::git::{GitError, WorkingDir};
use crate::locking::{ApplyLocker, ProjectLocker, WorkingDirLocker};
use crate::types::{Project, lock_key};

use super::context::ProjectContext;
use super::requirements::check_apply_requirements;
use super::result::{Halt, PlanSuccess, PolicyCheckSuccess, ProjectOutcome, ProjectResult};
use super::steps::{StepError, StepRunner, run_steps};
use crate::vcs::VcsClient;

type Outcome = Result<ProjectOutcome, Halt>;

/// Runs plan, policy check, apply, approve_policies and version for single
/// projects.
#[derive(Clone)]
pub struct ProjectCommandRunner {
    working_dir: Arc<dyn WorkingDir>,
    locker: WorkingDirLocker,
    project_locker: ProjectLocker,
    apply_locker: ApplyLocker,
    steps: Arc<dyn StepRunner>,
    vcs: Arc<dyn VcsClient>,
    atlantis_url: String,
    policy_owners: Vec<String>,
}

impl std::fmt::Debug for ProjectCommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectCommandRunner")
            .field("atlantis_url", &self.atlantis_url)
            .finish_non_exhaustive()
    }
}

impl ProjectCommandRunner {
    pub fn new(
        working_dir: Arc<dyn WorkingDir>,
        locker: WorkingDirLocker,
        project_locker: ProjectLocker,
        apply_locker: ApplyLocker,
        steps: Arc<dyn StepRunner>,
        vcs: Arc<dyn VcsClient>,
    ) -> Self {
        ProjectCommandRunner {
            working_dir,
            locker,
            project_locker,
            apply_locker,
            steps,
            vcs,
            atlantis_url: String::new(),
            policy_owners: Vec::new(),
        }
    }

    /// Base URL used for lock links in comments.
    pub fn with_atlantis_url(mut self, url: impl Into<String>) -> Self {
        self.atlantis_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Users allowed to approve failing policies.
    pub fn with_policy_owners(mut self, owners: Vec<String>) -> Self {
        self.policy_owners = owners;
        self
    }

    /// Runs `ctx.command`.
    pub async fn run(&self, ctx: &ProjectContext) -> ProjectResult {
        match ctx.command {
            CommandName::Plan => self.plan(ctx).await,
            CommandName::PolicyCheck => self.policy_check(ctx).await,
            CommandName::Apply => self.apply(ctx).await,
            CommandName::ApprovePolicies => self.approve_policies(ctx).await,
            CommandName::Version => self.version(ctx).await,
            CommandName::Unlock => result(
                ctx,
                ProjectOutcome::Error("unlock is not a project command".into()),
            ),
        }
    }

    #[instrument(
        skip_all,
        fields(dir = %ctx.repo_rel_dir, workspace = %ctx.workspace, pull = %ctx.pull.num)
    )]
    pub async fn plan(&self, ctx: &ProjectContext) -> ProjectResult {
        result(ctx, self.do_plan(ctx).await.unwrap_or_else(Halt::into_outcome))
    }

    #[instrument(
        skip_all,
        fields(dir = %ctx.repo_rel_dir, workspace = %ctx.workspace, pull = %ctx.pull.num)
    )]
    pub async fn policy_check(&self, ctx: &ProjectContext) -> ProjectResult {
        result(ctx, self.do_policy_check(ctx).await.unwrap_or_else(Halt::into_outcome))
    }

    #[instrument(
        skip_all,
        fields(dir = %ctx.repo_rel_dir, workspace = %ctx.workspace, pull = %ctx.pull.num)
    )]
    pub async fn apply(&self, ctx: &ProjectContext) -> ProjectResult {
        result(ctx, self.do_apply(ctx).await.unwrap_or_else(Halt::into_outcome))
    }

    #[instrument(
        skip_all,
        fields(dir = %ctx.repo_rel_dir, workspace = %ctx.workspace, pull = %ctx.pull.num)
    )]
    pub async fn approve_policies(&self, ctx: &ProjectContext) -> ProjectResult {
        result(ctx, self.do_approve_policies(ctx).unwrap_or_else(Halt::into_outcome))
    }

    #[instrument(
        skip_all,
        fields(dir = %ctx.repo_rel_dir, workspace = %ctx.workspace, pull = %ctx.pull.num)
    )]
    pub async fn version(&self, ctx: &ProjectContext) -> ProjectResult {
        result(ctx, self.do_version(ctx).await.unwrap_or_else(Halt::into_outcome))
    }

    // ─── Implementations ───

    async fn do_plan(&self, ctx: &ProjectContext) -> Outcome {
        let base = ctx.base_repo();
        let _wd_lock = self.locker.try_lock(&base.full_name, ctx.pull.num, &ctx.workspace)?;

        let project = Project::new(&base.full_name, &ctx.repo_rel_dir);
        let lock = self
            .project_locker
            .try_lock(&project, &ctx.workspace, &ctx.pull, &ctx.user)?;
        if !lock.lock_acquired {
            return Err(Halt::Failure(lock.lock_failure_reason));
        }

        let clone = match self
            .working_dir
            .clone_pull(&ctx.head_repo, &ctx.pull, &ctx.workspace)
            .await
        {
            Ok(clone) => clone,
            Err(e) => {
                self.release(&lock.lock_key);
                return Err(e.into());
            }
        };

        let project_dir = clone.dir.join(&ctx.repo_rel_dir);
        if !project_dir.is_dir() {
            self.release(&lock.lock_key);
            return Err(Halt::Error(format!("dir {:?} does not exist", ctx.repo_rel_dir)));
        }

        let (outputs, res) = run_steps(self.steps.as_ref(), ctx, &ctx.steps(), &project_dir).await;
        if let Err(e) = res {
            self.release(&lock.lock_key);
            return Err(Halt::Error(format!("{}\n{}", e, outputs.join("\n"))));
        }

        info!("Plan succeeded");
        Ok(ProjectOutcome::Plan(PlanSuccess {
            terraform_output: outputs.join("\n"),
            lock_url: self.lock_url(&lock.lock_key),
            replan_cmd: ctx.replan_cmd.clone(),
            apply_cmd: ctx.apply_cmd.clone(),
            has_diverged: clone.has_diverged,
        }))
    }

    async fn do_policy_check(&self, ctx: &ProjectContext) -> Outcome {
        let base = ctx.base_repo();
        let _wd_lock = self.locker.try_lock(&base.full_name, ctx.pull.num, &ctx.workspace)?;
        let project_dir = self.project_dir(ctx)?;

        let (outputs, res) = run_steps(self.steps.as_ref(), ctx, &ctx.steps(), &project_dir).await;
        match res {
            Ok(()) => {
                let project = Project::new(&base.full_name, &ctx.repo_rel_dir);
                Ok(ProjectOutcome::PolicyCheck(PolicyCheckSuccess {
                    policy_output: outputs.join("\n"),
                    lock_url: self.lock_url(&lock_key(&project, &ctx.workspace)),
                    replan_cmd: ctx.replan_cmd.clone(),
                    apply_cmd: ctx.apply_cmd.clone(),
                    has_diverged: self.working_dir.has_diverged(&project_dir).await,
                }))
            }
            Err(StepError::PoliciesFailed { .. }) => Err(Halt::Failure(format!(
                "Some policy sets did not pass.\n{}",
                outputs.join("\n")
            ))),
            Err(e) => Err(Halt::Error(format!("{}\n{}", e, outputs.join("\n")))),
        }
    }

    async fn do_apply(&self, ctx: &ProjectContext) -> Outcome {
        if self.apply_locker.is_locked() {
            return Err(Halt::Failure(
                "apply commands are locked globally until they are manually unlocked".into(),
            ));
        }

        let project_dir = self.project_dir(ctx)?;
        let repo_dir = self
            .working_dir
            .get_working_dir(ctx.base_repo(), ctx.pull.num, &ctx.workspace)?;

        if let Some(failure) =
            check_apply_requirements(ctx, self.vcs.as_ref(), self.working_dir.as_ref(), &repo_dir)
                .await?
        {
            return Err(Halt::Failure(failure));
        }

        let base = ctx.base_repo();
        let _wd_lock = self.locker.try_lock(&base.full_name, ctx.pull.num, &ctx.workspace)?;

        let (outputs, res) = run_steps(self.steps.as_ref(), ctx, &ctx.steps(), &project_dir).await;
        if let Err(e) = res {
            return Err(Halt::Error(format!("{}\n{}", e, outputs.join("\n"))));
        }

        let project = Project::new(&base.full_name, &ctx.repo_rel_dir);
        self.release(&lock_key(&project, &ctx.workspace));
        info!("Apply succeeded");
        Ok(ProjectOutcome::Apply(outputs.join("\n")))
    }

    fn do_approve_policies(&self, ctx: &ProjectContext) -> Outcome {
        if !self.policy_owners.iter().any(|o| *o == ctx.user.username) {
            return Err(Halt::Failure(format!(
                "user {} is not a policy owner - please contact policy owners to approve failing policies",
                ctx.user
            )));
        }
        Ok(ProjectOutcome::ApprovePolicies("Policies approved".into()))
    }

    async fn do_version(&self, ctx: &ProjectContext) -> Outcome {
        let project_dir = self.project_dir(ctx)?;
        let (outputs, res) = run_steps(self.steps.as_ref(), ctx, &ctx.steps(), &project_dir).await;
        match res {
            Ok(()) => Ok(ProjectOutcome::Version(outputs.join("\n"))),
            Err(e) => Err(Halt::Error(e.to_string())),
        }
    }

    // ─── Helpers ───

    /// The project's directory inside an existing clone.
    fn project_dir(&self, ctx: &ProjectContext) -> Result<PathBuf, Halt> {
        let repo_dir = match self
            .working_dir
            .get_working_dir(ctx.base_repo(), ctx.pull.num, &ctx.workspace)
        {
            Ok(dir) => dir,
            Err(GitError::NotCloned(_)) => {
                return Err(Halt::Error("project has not been cloned–did you run plan?".into()));
            }
            Err(e) => return Err(e.into()),
        };
        let project_dir = repo_dir.join(&ctx.repo_rel_dir);
        if !Path::new(&project_dir).is_dir() {
            return Err(Halt::Error(format!("dir {:?} does not exist", ctx.repo_rel_dir)));
        }
        Ok(project_dir)
    }

    fn release(&self, key: &str) {
        match self.project_locker.unlock(key) {
            Ok(_) => debug!(key, "Released project lock"),
            Err(e) => warn!(key, error = %e, "Failed to release project lock"),
        }
    }

    fn lock_url(&self, key: &str) -> String {
        let escaped: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        format!("{}/locks?id={}", self.atlantis_url, escaped)
    }
}

fn result(ctx: &ProjectContext, outcome: ProjectOutcome) -> ProjectResult {
    ProjectResult {
        command: ctx.command,
        repo_rel_dir: ctx.repo_rel_dir.clone(),
        workspace: ctx.workspace.clone(),
        project_name: ctx.project_name.clone(),
        outcome,
    }
}
