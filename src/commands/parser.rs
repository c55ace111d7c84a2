//! Parser for `atlantis` commands in comment text.
//!
//! This module provides a pure parser that extracts structured commands from
//! unstructured pull request comment text.

use std::path::{Component, Path};

use crate::types::{DEFAULT_REPO_REL_DIR, DEFAULT_WORKSPACE, VcsHostType};

use super::flags::{FlagError, FlagSet, FlagSpec};
use super::types::{CommandName, CommentCommand, CommentParseResult};

const WORKSPACE_FLAG: &str = "workspace";
const DIR_FLAG: &str = "dir";
const PROJECT_FLAG: &str = "project";
const AUTO_MERGE_DISABLED_FLAG: &str = "auto-merge-disabled";
const VERBOSE_FLAG: &str = "verbose";

/// The executable name users type, and that re-run hints are built with.
pub const EXECUTABLE: &str = "atlantis";

/// Name of the repo-level config file, as referenced by flag usage text.
const REPO_CONFIG_FILE: &str = "atlantis.yaml";

/// Reply to comments that start with `terraform`.
pub const DID_YOU_MEAN_ATLANTIS: &str = "Did you mean to use `atlantis` instead of `terraform`?";

/// Reply to `atlantis unlock` with any arguments.
pub const UNLOCK_USAGE: &str = "`Usage of unlock:`\n\n ```cmake\natlantis unlock\t\n\n  Unlocks the entire PR and discards all plans in this PR.\n  Arguments or flags are not supported at the moment.\n  If you need to unlock a specific project please use the atlantis UI.\n```";

/// Parses comments into commands.
///
/// # Parsing Rules
///
/// - The comment must be a single line. A trailing blank line is tolerated,
///   since copying a comment in some UIs appends one.
/// - The first word must be `run`, `atlantis` or `@{vcs user}`, where the VCS
///   user is the account the server comments as on that host
/// - Arguments are split shell-style, so quoted values may contain spaces
/// - Flags follow the command; everything after `--` is passed to Terraform
#[derive(Debug, Clone, Default)]
pub struct CommentParser {
    pub github_user: String,
    pub gitlab_user: String,
    pub bitbucket_user: String,
    pub azure_devops_user: String,
    pub apply_disabled: bool,
}

impl CommentParser {
    fn vcs_user(&self, host: VcsHostType) -> &str {
        match host {
            VcsHostType::Github => &self.github_user,
            VcsHostType::Gitlab => &self.gitlab_user,
            VcsHostType::BitbucketCloud | VcsHostType::BitbucketServer => &self.bitbucket_user,
            VcsHostType::AzureDevops => &self.azure_devops_user,
        }
    }

    /// Parses `comment`, received from `host`.
    ///
    /// # Examples
    ///
    /// ```
    /// use atlantis::commands::{CommentParser, CommentParseResult};
    /// use atlantis::types::VcsHostType;
    ///
    /// let parser = CommentParser::default();
    /// match parser.parse("atlantis plan -w staging", VcsHostType::Github) {
    ///     CommentParseResult::Command(cmd) => assert_eq!(cmd.workspace, "staging"),
    ///     other => panic!("{:?}", other),
    /// }
    /// assert_eq!(parser.parse("lgtm", VcsHostType::Github), CommentParseResult::Ignore);
    /// ```
    pub fn parse(&self, comment: &str, host: VcsHostType) -> CommentParseResult {
        if is_multi_line(comment) {
            return CommentParseResult::Ignore;
        }

        let Some(first) = comment.split_whitespace().next() else {
            return CommentParseResult::Ignore;
        };
        if first == "terraform" {
            return CommentParseResult::Response(DID_YOU_MEAN_ATLANTIS.to_string());
        }

        let vcs_user = format!("@{}", self.vcs_user(host));
        if first != "run" && first != EXECUTABLE && first != vcs_user {
            return CommentParseResult::Ignore;
        }

        let Some(args) = shlex::split(comment) else {
            return CommentParseResult::Response(
                "```\nError parsing command: EOF found when expecting closing quote\n```"
                    .to_string(),
            );
        };
        let Some(command) = args.get(1) else {
            return CommentParseResult::Response(help_comment(self.apply_disabled));
        };
        if matches!(command.as_str(), "help" | "-h" | "--help") {
            return CommentParseResult::Response(help_comment(self.apply_disabled));
        }

        let Some(name) = CommandName::from_comment(command) else {
            return CommentParseResult::Response(format!(
                "```\nError: unknown command {:?}.\nRun 'atlantis --help' for usage.\n```",
                command
            ));
        };

        let flags = flag_set(name);
        let parsed = match flags.parse(&args[2..]) {
            Ok(p) => p,
            Err(FlagError::Help) => {
                return CommentParseResult::Response(format!(
                    "```\nUsage of {}:\n{}\n```",
                    name,
                    flags.usages()
                ));
            }
            Err(FlagError::Invalid(_)) if name == CommandName::Unlock => {
                return CommentParseResult::Response(UNLOCK_USAGE.to_string());
            }
            Err(FlagError::Invalid(msg)) => {
                return CommentParseResult::Response(err_markdown(&msg, name, &flags));
            }
        };

        if !parsed.unused_args().is_empty() {
            if name == CommandName::Unlock {
                return CommentParseResult::Response(UNLOCK_USAGE.to_string());
            }
            let msg = format!("unknown argument(s) – {}", parsed.unused_args().join(" "));
            return CommentParseResult::Response(err_markdown(&msg, name, &flags));
        }

        let dir = match validate_dir(&parsed.string(DIR_FLAG)) {
            Ok(d) => d,
            Err(msg) => return CommentParseResult::Response(err_markdown(&msg, name, &flags)),
        };

        let workspace = parsed.string(WORKSPACE_FLAG);
        if !is_path_safe(&workspace) || workspace.contains("..") {
            let msg = format!("invalid workspace: {:?}", workspace);
            return CommentParseResult::Response(err_markdown(&msg, name, &flags));
        }

        let project = parsed.string(PROJECT_FLAG);
        if !project.is_empty() && (!workspace.is_empty() || !dir.is_empty()) {
            return CommentParseResult::Response(err_markdown(
                "cannot use -p/--project at same time as -d/--dir or -w/--workspace",
                name,
                &flags,
            ));
        }

        CommentParseResult::Command(CommentCommand {
            repo_rel_dir: dir,
            flags: parsed.extra_args(),
            name,
            verbose: parsed.bool(VERBOSE_FLAG),
            auto_merge_disabled: parsed.bool(AUTO_MERGE_DISABLED_FLAG),
            workspace,
            project_name: project,
        })
    }
}

/// Whether a newline is followed by more text on the next line.
fn is_multi_line(comment: &str) -> bool {
    comment
        .split('\n')
        .skip(1)
        .any(|line| !line.is_empty() && !line.starts_with('\r'))
}

fn flag_set(name: CommandName) -> FlagSet {
    let verbose = || FlagSpec::bool(VERBOSE_FLAG, "Append Atlantis log to comment.");
    match name {
        CommandName::Plan => FlagSet::new(vec![
            FlagSpec::string(
                WORKSPACE_FLAG,
                'w',
                "Switch to this Terraform workspace before planning.",
            ),
            FlagSpec::string(
                DIR_FLAG,
                'd',
                "Which directory to run plan in relative to root of repo, ex. 'child/dir'.",
            ),
            FlagSpec::string(
                PROJECT_FLAG,
                'p',
                format!(
                    "Which project to run plan for. Refers to the name of the project configured in {}. Cannot be used at same time as workspace or dir flags.",
                    REPO_CONFIG_FILE
                ),
            ),
            verbose(),
        ]),
        CommandName::Apply => FlagSet::new(vec![
            FlagSpec::string(
                WORKSPACE_FLAG,
                'w',
                "Apply the plan for this Terraform workspace.",
            ),
            FlagSpec::string(
                DIR_FLAG,
                'd',
                "Apply the plan for this directory, relative to root of repo, ex. 'child/dir'.",
            ),
            FlagSpec::string(
                PROJECT_FLAG,
                'p',
                format!(
                    "Apply the plan for this project. Refers to the name of the project configured in {}. Cannot be used at same time as workspace or dir flags.",
                    REPO_CONFIG_FILE
                ),
            ),
            FlagSpec::bool(AUTO_MERGE_DISABLED_FLAG, "Disable automerge after apply."),
            verbose(),
        ]),
        CommandName::Version => FlagSet::new(vec![
            FlagSpec::string(
                WORKSPACE_FLAG,
                'w',
                "Switch to this Terraform workspace before running version.",
            ),
            FlagSpec::string(
                DIR_FLAG,
                'd',
                "Which directory to run version in relative to root of repo, ex. 'child/dir'.",
            ),
            FlagSpec::string(
                PROJECT_FLAG,
                'p',
                format!(
                    "Print the version for this project. Refers to the name of the project configured in {}.",
                    REPO_CONFIG_FILE
                ),
            ),
            verbose(),
        ]),
        CommandName::ApprovePolicies => FlagSet::new(vec![verbose()]),
        CommandName::Unlock | CommandName::PolicyCheck => FlagSet::default(),
    }
}

fn err_markdown(msg: &str, name: CommandName, flags: &FlagSet) -> String {
    format!(
        "```\nError: {}.\nUsage of {}:\n{}```",
        msg,
        name,
        flags.usages()
    )
}

/// Normalizes a `-d` value to a path relative to the repo root. Absolute
/// paths are treated as relative to the root; paths escaping it are
/// rejected.
fn validate_dir(dir: &str) -> Result<String, String> {
    if dir.is_empty() {
        return Ok(String::new());
    }
    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(dir).components() {
        match component {
            Component::Normal(p) => parts.push(p.to_str().unwrap_or_default()),
            Component::ParentDir => {
                if parts.pop().is_none() && !dir.starts_with('/') {
                    return Err(format!(
                        "using a relative path {:?} with -d/--dir is not allowed",
                        dir
                    ));
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if parts.is_empty() {
        Ok(DEFAULT_REPO_REL_DIR.to_string())
    } else {
        Ok(parts.join("/"))
    }
}

/// Whether `s` survives URL path-segment escaping unchanged. Workspaces name
/// files on disk, so they may not contain separators.
fn is_path_safe(s: &str) -> bool {
    s.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                '-' | '_' | '.' | '~' | '$' | '&' | '+' | ',' | ':' | ';' | '=' | '@'
            )
    })
}

/// The full help comment. Apply is omitted when apply is disabled.
pub fn help_comment(apply_disabled: bool) -> String {
    let apply_examples = if apply_disabled {
        ""
    } else {
        "\n\n  # apply all unapplied plans from this pull request\n  atlantis apply\n\n  # apply the plan for the root directory and staging workspace\n  atlantis apply -d . -w staging"
    };
    let apply_command = if apply_disabled {
        ""
    } else {
        "\n  apply    Runs 'terraform apply' on all unapplied plans from this pull request.\n           To only apply a specific plan, use the -d, -w and -p flags."
    };
    format!(
        "```cmake
atlantis
Terraform Pull Request Automation

Usage:
  atlantis <command> [options] -- [terraform options]

Examples:
  # run plan in the root directory passing the -target flag to terraform
  atlantis plan -d . -- -target=resource{apply_examples}

Commands:
  plan     Runs 'terraform plan' for the changes in this pull request.
           To plan a specific project, use the -d, -w and -p flags.{apply_command}
  unlock   Removes all atlantis locks and discards all plans for this PR.
           To unlock a specific plan you can use the Atlantis UI.
  approve_policies
           Approves all current policy checking failures for the PR.
  version  Print the output of 'terraform version'
  help     View help.

Flags:
  -h, --help   help for atlantis

Use \"atlantis [command] --help\" for more information about a command.
```"
    )
}

// ─── Re-run hints ───

fn build_flags(
    repo_rel_dir: &str,
    workspace: &str,
    project: &str,
    auto_merge_disabled: bool,
) -> String {
    let dir = if repo_rel_dir.contains(' ') {
        format!("{:?}", repo_rel_dir)
    } else {
        repo_rel_dir.to_string()
    };

    let mut flags = if !project.is_empty() {
        format!(" -p {}", project)
    } else if dir == DEFAULT_REPO_REL_DIR && workspace == DEFAULT_WORKSPACE {
        format!(" -d {}", DEFAULT_REPO_REL_DIR)
    } else if dir == DEFAULT_REPO_REL_DIR {
        format!(" -w {}", workspace)
    } else if workspace == DEFAULT_WORKSPACE {
        format!(" -d {}", dir)
    } else {
        format!(" -d {} -w {}", dir, workspace)
    };
    if auto_merge_disabled {
        flags.push_str(" --");
        flags.push_str(AUTO_MERGE_DISABLED_FLAG);
    }
    flags
}

/// The comment that re-runs plan for one project, preserving the extra
/// Terraform arguments of the original command.
pub fn build_plan_comment(
    repo_rel_dir: &str,
    workspace: &str,
    project: &str,
    comment_args: &[String],
) -> String {
    let flags = build_flags(repo_rel_dir, workspace, project, false);
    let extra = if comment_args.is_empty() {
        String::new()
    } else {
        let unquoted: Vec<&str> = comment_args
            .iter()
            .map(|a| a.trim_start_matches('"').trim_end_matches('"'))
            .collect();
        format!(" -- {}", unquoted.join(" "))
    };
    format!("{} {}{}{}", EXECUTABLE, CommandName::Plan, flags, extra)
}

/// The comment that applies one project's plan.
pub fn build_apply_comment(
    repo_rel_dir: &str,
    workspace: &str,
    project: &str,
    auto_merge_disabled: bool,
) -> String {
    let flags = build_flags(repo_rel_dir, workspace, project, auto_merge_disabled);
    format!("{} {}{}", EXECUTABLE, CommandName::Apply, flags)
}

/// The comment that prints one project's Terraform version.
pub fn build_version_comment(repo_rel_dir: &str, workspace: &str, project: &str) -> String {
    let flags = build_flags(repo_rel_dir, workspace, project, false);
    format!("{} {}{}", EXECUTABLE, CommandName::Version, flags)
}
