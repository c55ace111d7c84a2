//! Command types for `atlantis` comment commands.
//!
//! These commands are parsed from pull request comments, or synthesized for
//! autoplan when a pull request is opened or updated.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The name of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    /// `atlantis plan`, also run by autoplan.
    Plan,
    /// `atlantis apply`
    Apply,
    /// Runs after a successful plan when policy checks are enabled. Never
    /// parsed from a comment.
    PolicyCheck,
    /// `atlantis approve_policies`
    ApprovePolicies,
    /// `atlantis unlock`
    Unlock,
    /// `atlantis version`
    Version,
}

impl CommandName {
    /// The name as typed in a comment.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::Plan => "plan",
            CommandName::Apply => "apply",
            CommandName::PolicyCheck => "policy_check",
            CommandName::ApprovePolicies => "approve_policies",
            CommandName::Unlock => "unlock",
            CommandName::Version => "version",
        }
    }

    /// Title-cased name for comments and commit statuses, e.g. `Policy Check`.
    pub fn title(&self) -> &'static str {
        match self {
            CommandName::Plan => "Plan",
            CommandName::Apply => "Apply",
            CommandName::PolicyCheck => "Policy Check",
            CommandName::ApprovePolicies => "Approve Policies",
            CommandName::Unlock => "Unlock",
            CommandName::Version => "Version",
        }
    }

    /// Commands that can be typed in a comment.
    pub(super) fn from_comment(s: &str) -> Option<Self> {
        match s {
            "plan" => Some(CommandName::Plan),
            "apply" => Some(CommandName::Apply),
            "approve_policies" => Some(CommandName::ApprovePolicies),
            "unlock" => Some(CommandName::Unlock),
            "version" => Some(CommandName::Version),
            _ => None,
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command parsed from a pull request comment.
///
/// Empty `repo_rel_dir`, `workspace` and `project_name` mean the flag was not
/// given; they are deliberately not defaulted here so that "apply everything"
/// can be told apart from "apply the root directory".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentCommand {
    /// Cleaned `-d` value, relative to the repo root.
    pub repo_rel_dir: String,
    /// Arguments after `--`, passed through to Terraform.
    pub flags: Vec<String>,
    pub name: CommandName,
    /// `--verbose`: append the step log to the comment.
    pub verbose: bool,
    /// `--auto-merge-disabled`
    pub auto_merge_disabled: bool,
    pub workspace: String,
    pub project_name: String,
}

impl CommentCommand {
    pub fn new(name: CommandName) -> Self {
        CommentCommand {
            repo_rel_dir: String::new(),
            flags: Vec::new(),
            name,
            verbose: false,
            auto_merge_disabled: false,
            workspace: String::new(),
            project_name: String::new(),
        }
    }

    /// Whether the command targets a single project rather than every
    /// project the pull request touches.
    pub fn is_for_specific_project(&self) -> bool {
        !self.repo_rel_dir.is_empty() || !self.workspace.is_empty() || !self.project_name.is_empty()
    }

    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        self.repo_rel_dir = dir.into();
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project_name = project.into();
        self
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }
}

impl fmt::Display for CommentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command={} verbose={} dir={:?} workspace={:?} project={:?} flags={:?}",
            self.name,
            self.verbose,
            self.repo_rel_dir,
            self.workspace,
            self.project_name,
            self.flags.join(",")
        )
    }
}

/// The outcome of parsing a comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentParseResult {
    /// Not addressed to us.
    Ignore,
    /// Addressed to us, but answered with a canned comment (help, usage or a
    /// parse error) instead of running anything.
    Response(String),
    /// A command to run.
    Command(CommentCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_comment_form() {
        for name in [
            CommandName::Plan,
            CommandName::Apply,
            CommandName::ApprovePolicies,
            CommandName::Unlock,
            CommandName::Version,
        ] {
            assert_eq!(CommandName::from_comment(name.as_str()), Some(name));
        }
        assert_eq!(CommandName::from_comment("policy_check"), None);
    }

    #[test]
    fn titles() {
        assert_eq!(CommandName::PolicyCheck.title(), "Policy Check");
        assert_eq!(CommandName::ApprovePolicies.title(), "Approve Policies");
    }

    #[test]
    fn specific_project_detection() {
        assert!(!CommentCommand::new(CommandName::Apply).is_for_specific_project());
        assert!(CommentCommand::new(CommandName::Apply).with_dir(".").is_for_specific_project());
        assert!(CommentCommand::new(CommandName::Apply).with_workspace("w").is_for_specific_project());
        assert!(CommentCommand::new(CommandName::Apply).with_project("p").is_for_specific_project());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&CommandName::ApprovePolicies).unwrap();
        assert_eq!(json, "\"approve_policies\"");
    }
}
