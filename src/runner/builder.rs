//! Turns a command into the list of projects it runs for.
//!
//! Plan-like commands clone the pull request and work out projects from the
//! modified files and `atlantis.yaml`. Apply-like commands work from the
//! recorded pull status and the existing clones, so they run exactly what was
//! planned.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::commands::{
    CommandName, CommentCommand, EXECUTABLE, build_apply_comment, build_plan_comment,
};
use crate::git::{GitError, WorkingDir};
use crate::locking::{LockError, WorkingDirLocker};
use crate::persistence::LockStore;
use crate::types::{DEFAULT_REPO_REL_DIR, DEFAULT_WORKSPACE, ProjectPlanStatus, ProjectStatus};
use crate::vcs::{VcsClient, VcsError};

use super::context::{CommandContext, ProjectContext};
use super::repo_config::{ProjectConfig, RepoConfig, RepoConfigError, clean_path};
use super::requirements::ApplyRequirement;

/// Why a command couldn't be turned into project commands.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Git(GitError),

    #[error("no working directory found–did you run plan?")]
    NotCloned,

    #[error("getting modified files: {0}")]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Config(#[from] RepoConfigError),

    #[error("no project with name {0:?} is defined in atlantis.yaml")]
    ProjectNotFound(String),

    #[error(
        "must specify project name: more than one project defined in atlantis.yaml matched dir: {dir:?} workspace: {workspace:?}"
    )]
    AmbiguousProject { dir: String, workspace: String },

    #[error("cannot specify a project name unless an atlantis.yaml file exists to configure projects")]
    ProjectNameWithoutConfig,
}

impl From<GitError> for BuildError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::NotCloned(_) => BuildError::NotCloned,
            other => BuildError::Git(other),
        }
    }
}

impl BuildError {
    /// Whether the user caused this and can fix it, as opposed to the server
    /// failing.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BuildError::Lock(LockError::WorkspaceLocked { .. } | LockError::PullLocked)
                | BuildError::ProjectNotFound(_)
                | BuildError::AmbiguousProject { .. }
                | BuildError::ProjectNameWithoutConfig
        )
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;

/// Builds [`ProjectContext`]s for commands.
#[derive(Clone)]
pub struct ProjectCommandBuilder {
    working_dir: Arc<dyn WorkingDir>,
    locker: WorkingDirLocker,
    vcs: Arc<dyn VcsClient>,
    store: Arc<LockStore>,
    global_requirements: Vec<ApplyRequirement>,
    policy_checks_enabled: bool,
}

impl std::fmt::Debug for ProjectCommandBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectCommandBuilder")
            .field("global_requirements", &self.global_requirements)
            .field("policy_checks_enabled", &self.policy_checks_enabled)
            .finish_non_exhaustive()
    }
}

impl ProjectCommandBuilder {
    pub fn new(
        working_dir: Arc<dyn WorkingDir>,
        locker: WorkingDirLocker,
        vcs: Arc<dyn VcsClient>,
        store: Arc<LockStore>,
    ) -> Self {
        ProjectCommandBuilder {
            working_dir,
            locker,
            vcs,
            store,
            global_requirements: Vec::new(),
            policy_checks_enabled: false,
        }
    }

    /// Requirements applied to every project on top of its own.
    pub fn with_global_requirements(mut self, requirements: Vec<ApplyRequirement>) -> Self {
        self.global_requirements = requirements;
        self
    }

    pub fn with_policy_checks(mut self, enabled: bool) -> Self {
        self.policy_checks_enabled = enabled;
        self
    }

    // ─── Plan-like commands ───

    /// Projects to plan when a pull request is opened or updated.
    pub async fn build_autoplan_commands(
        &self,
        ctx: &CommandContext,
    ) -> Result<Vec<ProjectContext>> {
        self.build_modified_commands(ctx, CommandName::Plan, None).await
    }

    /// Projects for `atlantis plan`. Without flags this is the autoplan
    /// selection; with flags it's the one project they name.
    pub async fn build_plan_commands(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<Vec<ProjectContext>> {
        if !cmd.is_for_specific_project() {
            return self.build_modified_commands(ctx, CommandName::Plan, Some(cmd)).await;
        }
        self.build_specific_clone_command(ctx, CommandName::Plan, cmd).await
    }

    /// Projects for `atlantis version`, selected the same way as plan.
    pub async fn build_version_commands(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<Vec<ProjectContext>> {
        if !cmd.is_for_specific_project() {
            return self.build_modified_commands(ctx, CommandName::Version, Some(cmd)).await;
        }
        self.build_specific_clone_command(ctx, CommandName::Version, cmd).await
    }

    #[instrument(
        skip_all,
        fields(repo = %ctx.base_repo(), pull = %ctx.pull.num, command = %command)
    )]
    async fn build_modified_commands(
        &self,
        ctx: &CommandContext,
        command: CommandName,
        cmd: Option<&CommentCommand>,
    ) -> Result<Vec<ProjectContext>> {
        let modified_files = self.vcs.get_modified_files(ctx.base_repo(), &ctx.pull).await?;
        debug!(count = modified_files.len(), "Fetched modified files");

        let _lock = self
            .locker
            .try_lock(&ctx.base_repo().full_name, ctx.pull.num, DEFAULT_WORKSPACE)?;
        let clone = self
            .working_dir
            .clone_pull(&ctx.head_repo, &ctx.pull, DEFAULT_WORKSPACE)
            .await?;

        let repo_cfg = RepoConfig::load(&clone.dir)?;
        let projects: Vec<ProjectConfig> = match &repo_cfg {
            Some(cfg) => cfg.modified_projects(&modified_files).into_iter().cloned().collect(),
            None => find_default_projects(&modified_files, &clone.dir)
                .into_iter()
                .map(|dir| ProjectConfig::new(dir, DEFAULT_WORKSPACE))
                .collect(),
        };
        info!(
            count = projects.len(),
            has_config = repo_cfg.is_some(),
            "Found projects for modified files"
        );

        Ok(projects
            .iter()
            .map(|p| self.project_context(ctx, command, p, repo_cfg.as_ref(), cmd, None))
            .collect())
    }

    async fn build_specific_clone_command(
        &self,
        ctx: &CommandContext,
        command: CommandName,
        cmd: &CommentCommand,
    ) -> Result<Vec<ProjectContext>> {
        let workspace = workspace_or_default(cmd);
        let _lock = self
            .locker
            .try_lock(&ctx.base_repo().full_name, ctx.pull.num, &workspace)?;
        let clone = self
            .working_dir
            .clone_pull(&ctx.head_repo, &ctx.pull, &workspace)
            .await?;
        let repo_cfg = RepoConfig::load(&clone.dir)?;
        let project = resolve_project(repo_cfg.as_ref(), cmd)?;
        Ok(vec![self.project_context(
            ctx,
            command,
            &project,
            repo_cfg.as_ref(),
            Some(cmd),
            None,
        )])
    }

    // ─── Apply-like commands ───

    /// Projects for `atlantis apply`. Without flags, every project whose plan
    /// at the current head commit is ready to apply.
    #[instrument(skip_all, fields(repo = %ctx.base_repo(), pull = %ctx.pull.num))]
    pub async fn build_apply_commands(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<Vec<ProjectContext>> {
        if cmd.is_for_specific_project() {
            let workspace = workspace_or_default(cmd);
            let dir = self
                .working_dir
                .get_working_dir(ctx.base_repo(), ctx.pull.num, &workspace)?;
            let repo_cfg = RepoConfig::load(&dir)?;
            let project = resolve_project(repo_cfg.as_ref(), cmd)?;
            let prior = self.prior_status(ctx, &project);
            return Ok(vec![self.project_context(
                ctx,
                CommandName::Apply,
                &project,
                repo_cfg.as_ref(),
                Some(cmd),
                prior,
            )]);
        }

        self.build_from_pull_status(ctx, CommandName::Apply, cmd, |s| s.is_applyable())
    }

    /// Projects whose policy checks failed.
    pub async fn build_approve_policies_commands(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<Vec<ProjectContext>> {
        self.build_from_pull_status(ctx, CommandName::ApprovePolicies, cmd, |s| {
            *s == ProjectPlanStatus::PolicyCheckErrored
        })
    }

    fn build_from_pull_status(
        &self,
        ctx: &CommandContext,
        command: CommandName,
        cmd: &CommentCommand,
        select: impl Fn(&ProjectPlanStatus) -> bool,
    ) -> Result<Vec<ProjectContext>> {
        let Some(status) = self.store.get_pull_status(&ctx.pull) else {
            debug!("No recorded pull status");
            return Ok(Vec::new());
        };
        if status.pull.head_commit != ctx.pull.head_commit {
            debug!(recorded = %status.pull.head_commit, "Recorded pull status is for an older commit");
            return Ok(Vec::new());
        }

        let mut contexts = Vec::new();
        for project_status in status.projects.iter().filter(|p| select(&p.status)) {
            let dir = self.working_dir.get_working_dir(
                ctx.base_repo(),
                ctx.pull.num,
                &project_status.workspace,
            )?;
            let repo_cfg = RepoConfig::load(&dir)?;
            let project = project_for_status(repo_cfg.as_ref(), project_status);
            contexts.push(self.project_context(
                ctx,
                command,
                &project,
                repo_cfg.as_ref(),
                Some(cmd),
                Some(project_status.status),
            ));
        }
        Ok(contexts)
    }

    fn prior_status(
        &self,
        ctx: &CommandContext,
        project: &ProjectConfig,
    ) -> Option<ProjectPlanStatus> {
        let status = self.store.get_pull_status(&ctx.pull)?;
        status
            .projects
            .iter()
            .find(|p| {
                p.repo_rel_dir == project.dir
                    && p.workspace == project.workspace
                    && p.project_name == project.name.clone().unwrap_or_default()
            })
            .map(|p| p.status)
    }

    fn project_context(
        &self,
        ctx: &CommandContext,
        command: CommandName,
        project: &ProjectConfig,
        repo_cfg: Option<&RepoConfig>,
        cmd: Option<&CommentCommand>,
        prior_status: Option<ProjectPlanStatus>,
    ) -> ProjectContext {
        let project_name = project.name.clone().unwrap_or_default();
        let comment_args = cmd.map(|c| c.flags.clone()).unwrap_or_default();
        let auto_merge_disabled = cmd.is_some_and(|c| c.auto_merge_disabled);

        let mut apply_requirements = self.global_requirements.clone();
        apply_requirements.extend(project.apply_requirements.iter().copied());
        if self.policy_checks_enabled {
            apply_requirements.push(ApplyRequirement::PoliciesPassed);
        }
        apply_requirements.sort();
        apply_requirements.dedup();

        ProjectContext {
            command,
            head_repo: ctx.head_repo.clone(),
            pull: ctx.pull.clone(),
            user: ctx.user.clone(),
            repo_rel_dir: project.dir.clone(),
            workspace: project.workspace.clone(),
            replan_cmd: build_plan_comment(
                &project.dir,
                &project.workspace,
                &project_name,
                &comment_args,
            ),
            apply_cmd: build_apply_comment(
                &project.dir,
                &project.workspace,
                &project_name,
                auto_merge_disabled,
            ),
            approve_policies_cmd: format!("{} {}", EXECUTABLE, CommandName::ApprovePolicies),
            project_name,
            workflow: repo_cfg.map(|c| c.workflow_for(project)).unwrap_or_default(),
            apply_requirements,
            comment_args,
            automerge_enabled: repo_cfg.is_some_and(|c| c.automerge),
            verbose: cmd.is_some_and(|c| c.verbose),
            prior_status,
        }
    }
}

fn workspace_or_default(cmd: &CommentCommand) -> String {
    if cmd.workspace.is_empty() {
        DEFAULT_WORKSPACE.to_string()
    } else {
        cmd.workspace.clone()
    }
}

/// The single project a command's `-p`, `-d` and `-w` flags name.
fn resolve_project(repo_cfg: Option<&RepoConfig>, cmd: &CommentCommand) -> Result<ProjectConfig> {
    let workspace = workspace_or_default(cmd);
    let dir = if cmd.repo_rel_dir.is_empty() {
        DEFAULT_REPO_REL_DIR.to_string()
    } else {
        clean_path(&cmd.repo_rel_dir)
    };

    if !cmd.project_name.is_empty() {
        let cfg = repo_cfg.ok_or(BuildError::ProjectNameWithoutConfig)?;
        return cfg
            .find_project_by_name(&cmd.project_name)
            .cloned()
            .ok_or_else(|| BuildError::ProjectNotFound(cmd.project_name.clone()));
    }

    let Some(cfg) = repo_cfg else {
        return Ok(ProjectConfig::new(dir, workspace));
    };
    match cfg.find_projects_by_dir_workspace(&dir, &workspace).as_slice() {
        [] => Ok(ProjectConfig::new(dir, workspace)),
        [project] => Ok((*project).clone()),
        _ => Err(BuildError::AmbiguousProject { dir, workspace }),
    }
}

/// The config for a project recorded in the pull status.
fn project_for_status(repo_cfg: Option<&RepoConfig>, status: &ProjectStatus) -> ProjectConfig {
    let configured = repo_cfg.and_then(|cfg| {
        if status.project_name.is_empty() {
            cfg.find_projects_by_dir_workspace(&status.repo_rel_dir, &status.workspace)
                .into_iter()
                .find(|p| p.name.is_none())
        } else {
            cfg.find_project_by_name(&status.project_name)
        }
    });
    configured
        .cloned()
        .unwrap_or_else(|| {
            ProjectConfig::new(status.repo_rel_dir.clone(), status.workspace.clone())
        })
}

/// Project directories for modified files in a repo without
/// `atlantis.yaml`.
///
/// A project is the directory holding a modified `.tf` or `.tfvars` file. An
/// `env/` directory belongs to its parent. A change under `modules/` plans
/// the directory containing `modules/`, if that directory is itself a
/// project (has a `main.tf`). Directories that no longer exist are dropped.
pub fn find_default_projects(modified_files: &[String], repo_dir: &Path) -> Vec<String> {
    let mut dirs: Vec<String> = modified_files
        .iter()
        .filter(|f| f.ends_with(".tf") || f.ends_with(".tfvars"))
        .filter_map(|f| project_dir_for_file(f, repo_dir))
        .filter(|dir| repo_dir.join(dir).is_dir())
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

fn project_dir_for_file(file: &str, repo_dir: &Path) -> Option<String> {
    let file = clean_path(file);
    let dir = match file.rfind('/') {
        Some(idx) => file[..idx].to_string(),
        None => DEFAULT_REPO_REL_DIR.to_string(),
    };
    let segments: Vec<&str> = dir.split('/').collect();

    if let Some(idx) = segments.iter().position(|s| *s == "modules") {
        let parent = if idx == 0 {
            DEFAULT_REPO_REL_DIR.to_string()
        } else {
            segments[..idx].join("/")
        };
        return repo_dir
            .join(&parent)
            .join("main.tf")
            .is_file()
            .then_some(parent);
    }

    if segments.last() == Some(&"env") {
        return Some(clean_path(&format!("{}/..", dir)));
    }
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{CheckoutStrategy, FileWorkingDir};
    use crate::runner::context::CommandTrigger;
    use crate::test_utils::{FakeVcs, pull, repo, user};
    use std::fs;
    use tempfile::TempDir;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn default_projects_follow_file_layout() {
        let repo = TempDir::new().unwrap();
        for f in [
            "main.tf",
            "prod/main.tf",
            "staging/env/staging.tfvars",
            "withmain/main.tf",
            "withmain/modules/vpc/main.tf",
            "nomain/modules/vpc/main.tf",
        ] {
            touch(repo.path(), f);
        }

        let dirs = find_default_projects(
            &files(&[
                "main.tf",
                "prod/main.tf",
                "prod/outputs.tf",
                "prod/README.md",
                "staging/env/staging.tfvars",
                "withmain/modules/vpc/main.tf",
                "nomain/modules/vpc/main.tf",
                "deleted/main.tf",
            ]),
            repo.path(),
        );
        assert_eq!(dirs, vec![".", "prod", "staging", "withmain"]);
    }

    fn command(dir: &str, workspace: &str, project: &str) -> CommentCommand {
        CommentCommand::new(CommandName::Plan)
            .with_dir(dir)
            .with_workspace(workspace)
            .with_project(project)
    }

    #[test]
    fn resolve_without_config() {
        let p = resolve_project(None, &command("./infra/", "", "")).unwrap();
        assert_eq!((p.dir.as_str(), p.workspace.as_str()), ("infra", "default"));

        assert!(matches!(
            resolve_project(None, &command("", "", "named")),
            Err(BuildError::ProjectNameWithoutConfig)
        ));
    }

    #[test]
    fn resolve_with_config() {
        let cfg = RepoConfig::parse(
            "version: 3\nprojects:\n- name: a\n  dir: infra\n- name: b\n  dir: infra\n- dir: solo\n  workspace: prod\n",
        )
        .unwrap();

        let p = resolve_project(Some(&cfg), &command("", "", "b")).unwrap();
        assert_eq!(p.name.as_deref(), Some("b"));

        let err = resolve_project(Some(&cfg), &command("", "", "c")).unwrap_err();
        assert_eq!(err.to_string(), "no project with name \"c\" is defined in atlantis.yaml");

        let err = resolve_project(Some(&cfg), &command("infra", "", "")).unwrap_err();
        assert!(err.to_string().starts_with("must specify project name"), "{}", err);

        let p = resolve_project(Some(&cfg), &command("solo", "prod", "")).unwrap();
        assert_eq!(p.workspace, "prod");

        // Unconfigured directories still plan with defaults.
        let p = resolve_project(Some(&cfg), &command("other", "", "")).unwrap();
        assert_eq!(p.dir, "other");
    }

    fn builder(data: &TempDir, store: Arc<LockStore>) -> ProjectCommandBuilder {
        ProjectCommandBuilder::new(
            Arc::new(FileWorkingDir::new(data.path(), CheckoutStrategy::Branch)),
            WorkingDirLocker::new(),
            Arc::new(FakeVcs::default()),
            store,
        )
    }

    fn command_context() -> CommandContext {
        CommandContext {
            head_repo: repo(),
            pull: pull(1),
            user: user(),
            trigger: CommandTrigger::Comment,
        }
    }

    fn status(dir: &str, status: ProjectPlanStatus) -> ProjectStatus {
        ProjectStatus {
            repo_rel_dir: dir.into(),
            workspace: "default".into(),
            project_name: String::new(),
            status,
        }
    }

    #[tokio::test]
    async fn apply_all_uses_applyable_statuses_at_head() {
        let data = TempDir::new().unwrap();
        let store = Arc::new(LockStore::in_memory());
        let ctx = command_context();
        fs::create_dir_all(data.path().join("repos/owner/repo/1/default")).unwrap();

        store
            .update_pull_with_results(
                &ctx.pull,
                vec![
                    status("a", ProjectPlanStatus::Planned),
                    status("b", ProjectPlanStatus::PlannedNoChanges),
                    status("c", ProjectPlanStatus::PolicyCheckPassed),
                    status("d", ProjectPlanStatus::Applied),
                ],
            )
            .unwrap();

        let b = builder(&data, store.clone())
            .with_global_requirements(vec![ApplyRequirement::Mergeable]);
        let contexts = b
            .build_apply_commands(&ctx, &CommentCommand::new(CommandName::Apply))
            .await
            .unwrap();
        let dirs: Vec<&str> = contexts.iter().map(|c| c.repo_rel_dir.as_str()).collect();
        assert_eq!(dirs, vec!["a", "c"]);
        assert_eq!(contexts[0].apply_requirements, vec![ApplyRequirement::Mergeable]);
        assert_eq!(contexts[0].prior_status, Some(ProjectPlanStatus::Planned));
        assert_eq!(contexts[0].apply_cmd, "atlantis apply -d a");

        // A newer commit invalidates the recorded plans.
        let mut newer = ctx.clone();
        newer.pull.head_commit = "ffff".into();
        let contexts = b
            .build_apply_commands(&newer, &CommentCommand::new(CommandName::Apply))
            .await
            .unwrap();
        assert!(contexts.is_empty());
    }

    #[tokio::test]
    async fn apply_without_clone_asks_for_plan() {
        let data = TempDir::new().unwrap();
        let b = builder(&data, Arc::new(LockStore::in_memory()));
        let err = b
            .build_apply_commands(&command_context(), &command("infra", "", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::NotCloned));
        assert_eq!(err.to_string(), "no working directory found–did you run plan?");
    }

    #[tokio::test]
    async fn policy_checks_add_requirement() {
        let data = TempDir::new().unwrap();
        fs::create_dir_all(data.path().join("repos/owner/repo/1/default")).unwrap();
        let b = builder(&data, Arc::new(LockStore::in_memory())).with_policy_checks(true);
        let contexts = b
            .build_apply_commands(&command_context(), &command(".", "", ""))
            .await
            .unwrap();
        assert_eq!(
            contexts[0].apply_requirements,
            vec![ApplyRequirement::PoliciesPassed]
        );
    }

    #[tokio::test]
    async fn approve_policies_selects_failed_checks() {
        let data = TempDir::new().unwrap();
        fs::create_dir_all(data.path().join("repos/owner/repo/1/default")).unwrap();
        let store = Arc::new(LockStore::in_memory());
        let ctx = command_context();
        store
            .update_pull_with_results(
                &ctx.pull,
                vec![
                    status("a", ProjectPlanStatus::PolicyCheckErrored),
                    status("b", ProjectPlanStatus::PolicyCheckPassed),
                ],
            )
            .unwrap();
        let contexts = builder(&data, store)
            .build_approve_policies_commands(
                &ctx,
                &CommentCommand::new(CommandName::ApprovePolicies),
            )
            .await
            .unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].command, CommandName::ApprovePolicies);
        assert_eq!(contexts[0].repo_rel_dir, "a");
    }
}
