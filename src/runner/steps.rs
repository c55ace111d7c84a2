//! Workflow steps and the executor that runs them.
//!
//! A project's pipeline is a list of [`Step`]s run in order in the project
//! directory. The first failing step stops the pipeline; its output and the
//! output of the steps before it end up in the result.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::types::DEFAULT_WORKSPACE;

use super::context::ProjectContext;

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Init { extra_args: Vec<String> },
    Plan { extra_args: Vec<String> },
    /// Converts the plan file to JSON for policy checks. Produces no output.
    Show,
    PolicyCheck { extra_args: Vec<String> },
    Apply { extra_args: Vec<String> },
    Version,
    /// A shell command.
    Run { command: String },
    /// Sets a variable for later steps, either to a literal or to a shell
    /// command's output.
    Env {
        name: String,
        value: Option<String>,
        command: Option<String>,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Init { .. } => "init",
            Step::Plan { .. } => "plan",
            Step::Show => "show",
            Step::PolicyCheck { .. } => "policy_check",
            Step::Apply { .. } => "apply",
            Step::Version => "version",
            Step::Run { .. } => "run",
            Step::Env { .. } => "env",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from running a step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("running {command:?} in {dir:?}: {status}")]
    Failed {
        command: String,
        dir: PathBuf,
        status: String,
        output: String,
    },

    /// Conftest ran and reported failing policies.
    #[error("some policies failed")]
    PoliciesFailed { output: String },

    #[error("no plan found at path {dir:?} and workspace {workspace:?}–did you run plan?")]
    MissingPlan { dir: PathBuf, workspace: String },

    #[error("env step {0:?} needs either a value or a command")]
    EmptyEnv(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StepError {
    /// Output the step produced before failing.
    pub fn output(&self) -> &str {
        match self {
            StepError::Failed { output, .. } | StepError::PoliciesFailed { output } => output,
            _ => "",
        }
    }
}

/// Runs a single step in a project directory.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Runs `step` in `dir`, returning its output.
    ///
    /// `envs` holds the variables set by earlier `env` steps.
    async fn run(
        &self,
        ctx: &ProjectContext,
        step: &Step,
        dir: &Path,
        envs: &HashMap<String, String>,
    ) -> Result<String, StepError>;
}

/// Runs `steps` in order, stopping at the first failure.
///
/// Returns the non-empty outputs collected so far either way. `env` step
/// outputs feed later steps instead of being collected.
pub async fn run_steps(
    runner: &dyn StepRunner,
    ctx: &ProjectContext,
    steps: &[Step],
    dir: &Path,
) -> (Vec<String>, Result<(), StepError>) {
    let mut outputs = Vec::new();
    let mut envs = HashMap::new();

    for step in steps {
        debug!(step = %step, dir = %dir.display(), "Running step");
        match runner.run(ctx, step, dir, &envs).await {
            Ok(out) => match step {
                Step::Env { name, .. } => {
                    envs.insert(name.clone(), out);
                }
                _ if !out.is_empty() => outputs.push(out),
                _ => {}
            },
            Err(e) => {
                if !e.output().is_empty() {
                    outputs.push(e.output().to_string());
                }
                return (outputs, Err(e));
            }
        }
    }
    (outputs, Ok(()))
}

/// Plan file for a project: `{project}-{workspace}.tfplan`, or just
/// `{workspace}.tfplan` for unnamed projects.
pub fn plan_file_name(project_name: &str, workspace: &str) -> String {
    if project_name.is_empty() {
        format!("{}.tfplan", workspace)
    } else {
        format!("{}-{}.tfplan", project_name.replace('/', "::"), workspace)
    }
}

fn show_file_name(project_name: &str, workspace: &str) -> String {
    plan_file_name(project_name, workspace).replace(".tfplan", ".json")
}

/// [`StepRunner`] that runs Terraform, Conftest and shell commands as
/// subprocesses.
#[derive(Debug, Clone)]
pub struct TerraformStepRunner {
    terraform_binary: String,
    conftest_binary: String,
    policy_dir: Option<PathBuf>,
}

impl TerraformStepRunner {
    pub fn new(terraform_binary: impl Into<String>, conftest_binary: impl Into<String>) -> Self {
        Self {
            terraform_binary: terraform_binary.into(),
            conftest_binary: conftest_binary.into(),
            policy_dir: None,
        }
    }

    /// Directory of Rego policies passed to Conftest.
    pub fn with_policy_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.policy_dir = Some(dir.into());
        self
    }

    async fn terraform(
        &self,
        ctx: &ProjectContext,
        args: Vec<String>,
        dir: &Path,
        envs: &HashMap<String, String>,
    ) -> Result<String, StepError> {
        let mut cmd = tokio::process::Command::new(&self.terraform_binary);
        cmd.args(&args).env("TF_IN_AUTOMATION", "true");
        exec(cmd, &self.terraform_binary, &args, dir, ctx, envs).await
    }

    /// Selects the project's workspace, creating it if needed.
    async fn select_workspace(
        &self,
        ctx: &ProjectContext,
        dir: &Path,
        envs: &HashMap<String, String>,
    ) -> Result<(), StepError> {
        if ctx.workspace == DEFAULT_WORKSPACE {
            return Ok(());
        }
        let select = vec!["workspace".into(), "select".into(), ctx.workspace.clone()];
        if self.terraform(ctx, select, dir, envs).await.is_err() {
            let new = vec!["workspace".into(), "new".into(), ctx.workspace.clone()];
            self.terraform(ctx, new, dir, envs).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StepRunner for TerraformStepRunner {
    #[instrument(
        skip_all,
        fields(step = %step, dir = %ctx.repo_rel_dir, workspace = %ctx.workspace)
    )]
    async fn run(
        &self,
        ctx: &ProjectContext,
        step: &Step,
        dir: &Path,
        envs: &HashMap<String, String>,
    ) -> Result<String, StepError> {
        let plan_file = dir.join(plan_file_name(&ctx.project_name, &ctx.workspace));
        let show_file = dir.join(show_file_name(&ctx.project_name, &ctx.workspace));

        match step {
            Step::Init { extra_args } => {
                let mut args = vec!["init".into(), "-input=false".into(), "-no-color".into()];
                args.extend(extra_args.iter().cloned());
                // Init output is only interesting when it fails.
                self.terraform(ctx, args, dir, envs).await.map(|_| String::new())
            }
            Step::Plan { extra_args } => {
                self.select_workspace(ctx, dir, envs).await?;
                let mut args = vec![
                    "plan".into(),
                    "-input=false".into(),
                    "-refresh".into(),
                    "-no-color".into(),
                    "-out".into(),
                    plan_file.display().to_string(),
                ];
                args.extend(extra_args.iter().cloned());
                args.extend(ctx.comment_args.iter().cloned());
                self.terraform(ctx, args, dir, envs).await
            }
            Step::Show => {
                let args = vec![
                    "show".into(),
                    "-no-color".into(),
                    "-json".into(),
                    plan_file.display().to_string(),
                ];
                let json = self.terraform(ctx, args, dir, envs).await?;
                tokio::fs::write(&show_file, json).await?;
                Ok(String::new())
            }
            Step::PolicyCheck { extra_args } => {
                let mut args = vec!["test".to_string(), "--no-color".to_string()];
                if let Some(policy_dir) = &self.policy_dir {
                    args.push("-p".into());
                    args.push(policy_dir.display().to_string());
                }
                args.push(show_file.display().to_string());
                args.extend(extra_args.iter().cloned());

                let mut cmd = tokio::process::Command::new(&self.conftest_binary);
                cmd.args(&args);
                match exec(cmd, &self.conftest_binary, &args, dir, ctx, envs).await {
                    // Conftest exits 1 when policies fail and 2+ on errors.
                    Err(StepError::Failed { status, output, .. }) if status == "exit status 1" => {
                        Err(StepError::PoliciesFailed { output })
                    }
                    other => other,
                }
            }
            Step::Apply { extra_args } => {
                if !tokio::fs::try_exists(&plan_file).await? {
                    return Err(StepError::MissingPlan {
                        dir: dir.to_path_buf(),
                        workspace: ctx.workspace.clone(),
                    });
                }
                let mut args = vec!["apply".into(), "-input=false".into(), "-no-color".into()];
                args.extend(extra_args.iter().cloned());
                args.extend(ctx.comment_args.iter().cloned());
                args.push(plan_file.display().to_string());
                let out = self.terraform(ctx, args, dir, envs).await?;
                // A plan can only be applied once.
                tokio::fs::remove_file(&plan_file).await?;
                Ok(out)
            }
            Step::Version => self.terraform(ctx, vec!["version".into()], dir, envs).await,
            Step::Run { command } => shell(command, dir, ctx, envs).await,
            Step::Env { name, value, command } => match (value, command) {
                (Some(value), _) => Ok(value.clone()),
                (None, Some(command)) => shell(command, dir, ctx, envs).await,
                (None, None) => Err(StepError::EmptyEnv(name.clone())),
            },
        }
    }
}

async fn shell(
    command: &str,
    dir: &Path,
    ctx: &ProjectContext,
    envs: &HashMap<String, String>,
) -> Result<String, StepError> {
    let args = vec!["-c".to_string(), command.to_string()];
    let mut cmd = tokio::process::Command::new("sh");
    cmd.args(&args)
        .env("DIR", dir)
        .env("PLANFILE", dir.join(plan_file_name(&ctx.project_name, &ctx.workspace)))
        .env("SHOWFILE", dir.join(show_file_name(&ctx.project_name, &ctx.workspace)));
    exec(cmd, "sh", &args, dir, ctx, envs).await
}

/// Runs `cmd` in `dir` with the step environment, returning trimmed stdout
/// and stderr combined.
async fn exec(
    mut cmd: tokio::process::Command,
    program: &str,
    args: &[String],
    dir: &Path,
    ctx: &ProjectContext,
    envs: &HashMap<String, String>,
) -> Result<String, StepError> {
    let output = cmd
        .current_dir(dir)
        .envs(ctx.step_env())
        .envs(envs)
        .stdin(Stdio::null())
        .output()
        .await?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    let combined = combined.trim().to_string();

    if output.status.success() {
        Ok(combined)
    } else {
        let status = match output.status.code() {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        Err(StepError::Failed {
            command: format!("{} {}", program, args.join(" ")),
            dir: dir.to_path_buf(),
            status,
            output: combined,
        })
    }
}
