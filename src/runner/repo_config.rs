//! Repo-level `atlantis.yaml`.
//!
//! Supports the version 3 subset: projects with a name, dir, workspace,
//! autoplan settings, apply requirements and workflow, plus custom workflows
//! whose plan, apply and policy_check stages list steps.
//!
//! ```yaml
//! version: 3
//! automerge: true
//! projects:
//! - name: staging
//!   dir: infra
//!   workspace: staging
//!   autoplan:
//!     when_modified: ["*.tf", "../modules/**/*.tf"]
//!   apply_requirements: [approved]
//!   workflow: custom
//! workflows:
//!   custom:
//!     plan:
//!       steps:
//!       - init
//!       - run: ./check.sh
//!       - plan:
//!           extra_args: ["-lock=false"]
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use thiserror::Error;

use crate::types::{DEFAULT_REPO_REL_DIR, DEFAULT_WORKSPACE};

use super::requirements::ApplyRequirement;
use super::steps::Step;

/// Name of the config file at the repo root.
pub const REPO_CONFIG_FILE: &str = "atlantis.yaml";

/// Patterns a project is autoplanned for when it doesn't set its own.
pub const DEFAULT_WHEN_MODIFIED: [&str; 3] = ["**/*.tf*", "**/terragrunt.hcl", "**/.terraform.lock.hcl"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Errors from reading `atlantis.yaml`.
#[derive(Debug, Error)]
pub enum RepoConfigError {
    #[error("parsing {REPO_CONFIG_FILE}: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("reading {REPO_CONFIG_FILE}: {0}")]
    Io(#[from] std::io::Error),

    #[error("version: only version 3 is supported, got {0}")]
    UnsupportedVersion(u32),

    #[error("version: is required")]
    MissingVersion,

    #[error("dir: {0:?} can't be outside the repo")]
    DirOutsideRepo(String),

    #[error("workspace: {0:?} is not a valid workspace name")]
    InvalidWorkspace(String),

    #[error("found two or more projects with name {0:?}; project names must be unique")]
    DuplicateName(String),

    #[error(
        "there are two or more projects with dir: {dir:?} workspace: {workspace:?} that are not all named; they must have a 'name' key so they can be targeted for apply's separately"
    )]
    AmbiguousProject { dir: String, workspace: String },

    #[error("workflow {0:?} is not defined")]
    UndefinedWorkflow(String),

    #[error(
        "{0:?} is not a valid apply_requirement, only \"approved\", \"mergeable\", \"undiverged\" and \"policies_passed\" are supported"
    )]
    InvalidApplyRequirement(String),

    #[error("step {0:?} is not a valid step type")]
    InvalidStep(String),

    #[error("invalid when_modified pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
}

pub type Result<T> = std::result::Result<T, RepoConfigError>;

// ─── Validated config ─────────────────────────────────────────────────────────

/// Steps for each stage of a project's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub plan: Vec<Step>,
    pub apply: Vec<Step>,
    pub policy_check: Vec<Step>,
}

impl Default for Workflow {
    fn default() -> Self {
        Workflow {
            plan: vec![
                Step::Init {
                    extra_args: Vec::new(),
                },
                Step::Plan {
                    extra_args: Vec::new(),
                },
            ],
            apply: vec![Step::Apply {
                extra_args: Vec::new(),
            }],
            policy_check: vec![
                Step::Show,
                Step::PolicyCheck {
                    extra_args: Vec::new(),
                },
            ],
        }
    }
}

/// A project declared in `atlantis.yaml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectConfig {
    pub name: Option<String>,
    pub dir: String,
    pub workspace: String,
    pub autoplan_enabled: bool,
    /// Patterns relative to the project dir.
    pub when_modified: Vec<String>,
    pub apply_requirements: Vec<ApplyRequirement>,
    pub workflow: Option<String>,
}

impl ProjectConfig {
    /// A project with default settings.
    pub fn new(dir: impl Into<String>, workspace: impl Into<String>) -> Self {
        ProjectConfig {
            name: None,
            dir: dir.into(),
            workspace: workspace.into(),
            autoplan_enabled: true,
            when_modified: DEFAULT_WHEN_MODIFIED.iter().map(|s| s.to_string()).collect(),
            apply_requirements: Vec::new(),
            workflow: None,
        }
    }

    fn patterns(&self) -> Result<Vec<Pattern>> {
        self.when_modified
            .iter()
            .map(|p| {
                let joined = clean_path(&format!("{}/{}", self.dir, p));
                Pattern::new(&joined).map_err(|e| RepoConfigError::InvalidPattern {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// Whether any modified file matches the project's `when_modified`.
    pub fn matches_modified(&self, modified_files: &[String]) -> bool {
        // Patterns were checked when the config was loaded.
        let Ok(patterns) = self.patterns() else {
            return false;
        };
        modified_files.iter().any(|file| {
            let file = clean_path(file);
            patterns.iter().any(|p| p.matches_with(&file, MATCH_OPTIONS))
        })
    }
}

/// A parsed and validated `atlantis.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoConfig {
    pub automerge: bool,
    pub projects: Vec<ProjectConfig>,
    pub workflows: HashMap<String, Workflow>,
}

impl RepoConfig {
    /// Parses and validates `atlantis.yaml` content.
    pub fn parse(yaml: &str) -> Result<Self> {
        let raw: RawRepoConfig = serde_yaml::from_str(yaml)?;
        raw.validate()
    }

    /// Loads `atlantis.yaml` from a clone, if it has one.
    pub fn load(repo_dir: &Path) -> Result<Option<Self>> {
        let path = repo_dir.join(REPO_CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(yaml) => Self::parse(&yaml).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_project_by_name(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name.as_deref() == Some(name))
    }

    pub fn find_projects_by_dir_workspace(
        &self,
        dir: &str,
        workspace: &str,
    ) -> Vec<&ProjectConfig> {
        let dir = clean_path(dir);
        self.projects
            .iter()
            .filter(|p| p.dir == dir && p.workspace == workspace)
            .collect()
    }

    /// Autoplan-enabled projects whose `when_modified` matches.
    pub fn modified_projects(&self, modified_files: &[String]) -> Vec<&ProjectConfig> {
        self.projects
            .iter()
            .filter(|p| p.autoplan_enabled && p.matches_modified(modified_files))
            .collect()
    }

    /// The workflow a project runs.
    pub fn workflow_for(&self, project: &ProjectConfig) -> Workflow {
        project
            .workflow
            .as_ref()
            .and_then(|name| self.workflows.get(name))
            .cloned()
            .unwrap_or_default()
    }
}

// ─── Raw YAML ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRepoConfig {
    version: Option<u32>,
    #[serde(default)]
    automerge: bool,
    #[serde(default)]
    projects: Vec<RawProject>,
    #[serde(default)]
    workflows: BTreeMap<String, RawWorkflow>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProject {
    name: Option<String>,
    dir: String,
    workspace: Option<String>,
    autoplan: Option<RawAutoplan>,
    apply_requirements: Option<Vec<String>>,
    workflow: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAutoplan {
    when_modified: Option<Vec<String>>,
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkflow {
    plan: Option<RawStage>,
    apply: Option<RawStage>,
    policy_check: Option<RawStage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStage {
    #[serde(default)]
    steps: Vec<RawStep>,
}

/// `- init`, `- plan: {extra_args: [...]}`, `- run: cmd` or
/// `- env: {name: X, value: y}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStep {
    Name(String),
    Map(BTreeMap<String, RawStepArgs>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStepArgs {
    Command(String),
    Env {
        name: String,
        value: Option<String>,
        command: Option<String>,
    },
    Args {
        #[serde(default)]
        extra_args: Vec<String>,
    },
}

impl RawRepoConfig {
    fn validate(self) -> Result<RepoConfig> {
        match self.version {
            None => return Err(RepoConfigError::MissingVersion),
            Some(3) => {}
            Some(v) => return Err(RepoConfigError::UnsupportedVersion(v)),
        }

        let mut workflows = HashMap::new();
        for (name, raw) in self.workflows {
            workflows.insert(name, raw.validate()?);
        }

        let mut projects = Vec::with_capacity(self.projects.len());
        let mut names = HashSet::new();
        for raw in self.projects {
            let project = raw.validate()?;
            if let Some(name) = &project.name
                && !names.insert(name.clone())
            {
                return Err(RepoConfigError::DuplicateName(name.clone()));
            }
            if let Some(workflow) = &project.workflow
                && !workflows.contains_key(workflow)
            {
                return Err(RepoConfigError::UndefinedWorkflow(workflow.clone()));
            }
            projects.push(project);
        }

        let mut by_dir_workspace: HashMap<(&str, &str), Vec<&ProjectConfig>> = HashMap::new();
        for p in &projects {
            by_dir_workspace
                .entry((p.dir.as_str(), p.workspace.as_str()))
                .or_default()
                .push(p);
        }
        for ((dir, workspace), group) in by_dir_workspace {
            if group.len() > 1 && group.iter().any(|p| p.name.is_none()) {
                return Err(RepoConfigError::AmbiguousProject {
                    dir: dir.to_string(),
                    workspace: workspace.to_string(),
                });
            }
        }

        Ok(RepoConfig {
            automerge: self.automerge,
            projects,
            workflows,
        })
    }
}

impl RawProject {
    fn validate(self) -> Result<ProjectConfig> {
        let dir = clean_path(&self.dir);
        if dir == ".." || dir.starts_with("../") || Path::new(&self.dir).is_absolute() {
            return Err(RepoConfigError::DirOutsideRepo(self.dir));
        }

        let workspace = self.workspace.unwrap_or_else(|| DEFAULT_WORKSPACE.to_string());
        if workspace.is_empty() || workspace.contains("..") || workspace.contains('/') {
            return Err(RepoConfigError::InvalidWorkspace(workspace));
        }

        let apply_requirements = self
            .apply_requirements
            .unwrap_or_default()
            .iter()
            .map(|r| {
                r.parse::<ApplyRequirement>()
                    .map_err(|_| RepoConfigError::InvalidApplyRequirement(r.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut project = ProjectConfig::new(dir, workspace);
        project.name = self.name;
        project.apply_requirements = apply_requirements;
        project.workflow = self.workflow;
        if let Some(autoplan) = self.autoplan {
            if let Some(when_modified) = autoplan.when_modified {
                project.when_modified = when_modified;
            }
            if let Some(enabled) = autoplan.enabled {
                project.autoplan_enabled = enabled;
            }
        }
        project.patterns()?;
        Ok(project)
    }
}

impl RawWorkflow {
    fn validate(self) -> Result<Workflow> {
        let defaults = Workflow::default();
        let stage = |raw: Option<RawStage>, default: Vec<Step>| -> Result<Vec<Step>> {
            match raw {
                None => Ok(default),
                Some(stage) => stage.steps.into_iter().map(RawStep::validate).collect(),
            }
        };
        Ok(Workflow {
            plan: stage(self.plan, defaults.plan)?,
            apply: stage(self.apply, defaults.apply)?,
            policy_check: stage(self.policy_check, defaults.policy_check)?,
        })
    }
}

impl RawStep {
    fn validate(self) -> Result<Step> {
        let (name, args) = match self {
            RawStep::Name(name) => (name, None),
            RawStep::Map(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((name, args)), None) => (name, Some(args)),
                    _ => return Err(RepoConfigError::InvalidStep("<multiple keys>".into())),
                }
            }
        };

        let extra_args = |args: Option<RawStepArgs>| match args {
            None => Ok(Vec::new()),
            Some(RawStepArgs::Args { extra_args }) => Ok(extra_args),
            Some(_) => Err(RepoConfigError::InvalidStep(name.clone())),
        };

        match name.as_str() {
            "init" => Ok(Step::Init {
                extra_args: extra_args(args)?,
            }),
            "plan" => Ok(Step::Plan {
                extra_args: extra_args(args)?,
            }),
            "show" => Ok(Step::Show),
            "policy_check" => Ok(Step::PolicyCheck {
                extra_args: extra_args(args)?,
            }),
            "apply" => Ok(Step::Apply {
                extra_args: extra_args(args)?,
            }),
            "version" => Ok(Step::Version),
            "run" => match args {
                Some(RawStepArgs::Command(command)) => Ok(Step::Run { command }),
                _ => Err(RepoConfigError::InvalidStep(name)),
            },
            "env" => match args {
                Some(RawStepArgs::Env {
                    name: var,
                    value,
                    command,
                }) if value.is_some() != command.is_some() => Ok(Step::Env {
                    name: var,
                    value,
                    command,
                }),
                _ => Err(RepoConfigError::InvalidStep(name)),
            },
            _ => Err(RepoConfigError::InvalidStep(name)),
        }
    }
}

/// Lexically normalizes a slash-separated relative path: drops `.` and
/// empty segments and resolves `..` where possible. Returns `.` for the root.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        DEFAULT_REPO_REL_DIR.to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn clean_path_normalizes() {
        assert_eq!(clean_path("./a//b/"), "a/b");
        assert_eq!(clean_path("a/../b"), "b");
        assert_eq!(clean_path("a/.."), ".");
        assert_eq!(clean_path("../x"), "../x");
        assert_eq!(clean_path("."), ".");
    }

    #[test]
    fn parses_projects_and_workflows() {
        let cfg = RepoConfig::parse(
            r#"
version: 3
automerge: true
projects:
- name: staging
  dir: ./infra/
  workspace: staging
  apply_requirements: [approved, mergeable]
  workflow: custom
- dir: other
  autoplan:
    enabled: false
workflows:
  custom:
    plan:
      steps:
      - init
      - run: echo hi
      - env:
          name: FOO
          value: bar
      - plan:
          extra_args: ["-lock=false"]
"#,
        )
        .unwrap();

        assert!(cfg.automerge);
        let staging = cfg.find_project_by_name("staging").unwrap();
        assert_eq!(staging.dir, "infra");
        assert_eq!(
            staging.apply_requirements,
            vec![ApplyRequirement::Approved, ApplyRequirement::Mergeable]
        );

        let workflow = cfg.workflow_for(staging);
        assert_eq!(
            workflow.plan,
            vec![
                Step::Init { extra_args: vec![] },
                Step::Run {
                    command: "echo hi".into()
                },
                Step::Env {
                    name: "FOO".into(),
                    value: Some("bar".into()),
                    command: None
                },
                Step::Plan {
                    extra_args: vec!["-lock=false".into()]
                },
            ]
        );
        // Unspecified stages keep their defaults.
        assert_eq!(workflow.apply, Workflow::default().apply);

        let other = &cfg.find_projects_by_dir_workspace("other", "default")[0];
        assert!(!other.autoplan_enabled);
        assert_eq!(cfg.workflow_for(other), Workflow::default());
    }

    #[test]
    fn when_modified_is_relative_to_project_dir() {
        let mut project = ProjectConfig::new("infra/prod", "default");
        assert!(project.matches_modified(&files(&["infra/prod/main.tf"])));
        assert!(project.matches_modified(&files(&["infra/prod/nested/vars.tfvars"])));
        assert!(!project.matches_modified(&files(&["infra/staging/main.tf", "README.md"])));

        project.when_modified = vec!["*.tf".into(), "../modules/**/*.tf".into()];
        assert!(project.matches_modified(&files(&["infra/modules/vpc/main.tf"])));
        assert!(!project.matches_modified(&files(&["infra/prod/nested/main.tf"])));
    }

    #[test]
    fn root_project_matches_everything_terraform() {
        let project = ProjectConfig::new(".", "default");
        assert!(project.matches_modified(&files(&["main.tf"])));
        assert!(project.matches_modified(&files(&["a/b/c.tf"])));
        assert!(!project.matches_modified(&files(&["a/b/c.go"])));
    }

    #[test]
    fn modified_projects_skip_autoplan_disabled() {
        let cfg = RepoConfig::parse(
            "version: 3\nprojects:\n- dir: a\n- dir: b\n  autoplan:\n    enabled: false\n",
        )
        .unwrap();
        let matched = cfg.modified_projects(&files(&["a/main.tf", "b/main.tf"]));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].dir, "a");
    }

    #[test]
    fn validation_errors() {
        let cases = [
            ("projects: []", "version: is required"),
            ("version: 2", "only version 3 is supported"),
            ("version: 3\nprojects:\n- dir: ../x", "can't be outside the repo"),
            (
                "version: 3\nprojects:\n- name: a\n  dir: x\n- name: a\n  dir: y",
                "project names must be unique",
            ),
            (
                "version: 3\nprojects:\n- dir: x\n- dir: x",
                "that are not all named",
            ),
            ("version: 3\nprojects:\n- dir: x\n  workflow: nope", "\"nope\" is not defined"),
            (
                "version: 3\nprojects:\n- dir: x\n  apply_requirements: [reviewed]",
                "is not a valid apply_requirement",
            ),
            (
                "version: 3\nworkflows:\n  w:\n    plan:\n      steps: [bogus]",
                "is not a valid step type",
            ),
            (
                "version: 3\nprojects:\n- dir: x\n  workspace: ../etc",
                "is not a valid workspace name",
            ),
        ];
        for (yaml, expected) in cases {
            let err = RepoConfig::parse(yaml).unwrap_err().to_string();
            assert!(err.contains(expected), "{:?}: {}", yaml, err);
        }
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RepoConfig::load(dir.path()).unwrap().is_none());
        std::fs::write(dir.path().join(REPO_CONFIG_FILE), "version: 3\n").unwrap();
        assert!(RepoConfig::load(dir.path()).unwrap().is_some());
    }
}
