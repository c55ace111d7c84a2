//! Markdown for command result comments.

use std::fmt::Write as _;

use crate::commands::{CommandName, EXECUTABLE};
use crate::types::VcsHostType;

use super::result::{CommandResult, ProjectOutcome, ProjectResult};

/// Output longer than this many lines is folded into `<details>`.
const MAX_UNWRAPPED_LINES: usize = 12;

const DIVERGED_WARNING: &str =
    ":warning: The branch we're merging into is ahead, it is recommended to pull new commits first.";

/// Renders [`CommandResult`]s as pull request comments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer {
    /// Hide apply hints.
    pub disable_apply: bool,
    /// Hide the "apply all" hint.
    pub disable_apply_all: bool,
}

impl Renderer {
    pub fn new(disable_apply: bool, disable_apply_all: bool) -> Self {
        Renderer {
            disable_apply,
            disable_apply_all,
        }
    }

    /// The comment for a command's result.
    ///
    /// Project results are sorted by dir, workspace and project name so the
    /// comment doesn't depend on completion order.
    pub fn render(
        &self,
        command: CommandName,
        result: &CommandResult,
        host: VcsHostType,
    ) -> String {
        let title = command.title();
        if let Some(error) = &result.error {
            return format!("**{} Error**\n```\n{}\n```", title, error.trim());
        }
        if let Some(failure) = &result.failure {
            return format!("**{} Failed**: {}", title, failure.trim());
        }

        let mut projects: Vec<&ProjectResult> = result.project_results.iter().collect();
        projects.sort_by(|a, b| {
            (&a.repo_rel_dir, &a.workspace, &a.project_name).cmp(&(
                &b.repo_rel_dir,
                &b.workspace,
                &b.project_name,
            ))
        });

        let folding = supports_folding(host);
        let mut out = String::new();
        match projects.as_slice() {
            [single] => {
                let _ = write!(
                    out,
                    "Ran {} for {}\n\n{}",
                    title,
                    describe(single),
                    self.render_project(single, folding)
                );
            }
            many => {
                let _ = writeln!(out, "Ran {} for {} projects:\n", title, many.len());
                for p in many {
                    let _ = writeln!(out, "1. {}", describe(p));
                }
                for p in many {
                    let _ = write!(
                        out,
                        "\n### {}\n{}\n\n---",
                        describe(p),
                        self.render_project(p, folding)
                    );
                }
            }
        }

        let any_plan = projects
            .iter()
            .any(|p| matches!(p.outcome, ProjectOutcome::Plan(_) | ProjectOutcome::PolicyCheck(_)));
        if any_plan {
            out.push_str(&self.plan_footer());
        }
        out.trim().to_string()
    }

    fn render_project(&self, result: &ProjectResult, folding: bool) -> String {
        let title = result.command.title();
        match &result.outcome {
            ProjectOutcome::Error(e) => {
                format!("**{} Error**\n{}", title, code_block("", e.trim(), folding))
            }
            ProjectOutcome::Failure(f) => format!("**{} Failed**: {}", title, f.trim()),
            ProjectOutcome::Plan(plan) => self.plan_body(
                &plan.terraform_output,
                &plan.apply_cmd,
                &plan.lock_url,
                &plan.replan_cmd,
                plan.has_diverged,
                folding,
            ),
            ProjectOutcome::PolicyCheck(check) => self.plan_body(
                &check.policy_output,
                &check.apply_cmd,
                &check.lock_url,
                &check.replan_cmd,
                check.has_diverged,
                folding,
            ),
            ProjectOutcome::Apply(output) => code_block("diff", output.trim(), folding),
            ProjectOutcome::Version(output) => code_block("", output.trim(), folding),
            ProjectOutcome::ApprovePolicies(message) => message.trim().to_string(),
        }
    }

    fn plan_body(
        &self,
        output: &str,
        apply_cmd: &str,
        lock_url: &str,
        replan_cmd: &str,
        has_diverged: bool,
        folding: bool,
    ) -> String {
        let mut body = code_block("diff", output.trim(), folding);
        body.push_str("\n\n");
        if !self.disable_apply {
            let _ = writeln!(
                body,
                "* :arrow_forward: To **apply** this plan, comment:\n    * `{}`",
                apply_cmd
            );
        }
        let _ = writeln!(
            body,
            "* :put_litter_in_its_place: To **delete** this plan click [here]({})",
            lock_url
        );
        let _ = write!(
            body,
            "* :repeat: To **plan** this project again, comment:\n    * `{}`",
            replan_cmd
        );
        if has_diverged {
            body.push_str("\n\n");
            body.push_str(DIVERGED_WARNING);
        }
        body
    }

    fn plan_footer(&self) -> String {
        let mut footer = String::from("\n\n---\n");
        if !self.disable_apply && !self.disable_apply_all {
            let _ = writeln!(
                footer,
                "* :fast_forward: To **apply** all unapplied plans from this pull request, comment:\n    * `{} {}`",
                EXECUTABLE,
                CommandName::Apply
            );
        }
        let _ = write!(
            footer,
            "* :put_litter_in_its_place: To delete all plans and locks for the PR, comment:\n    * `{} {}`",
            EXECUTABLE,
            CommandName::Unlock
        );
        footer
    }
}

fn describe(result: &ProjectResult) -> String {
    if result.project_name.is_empty() {
        format!(
            "dir: `{}` workspace: `{}`",
            result.repo_rel_dir, result.workspace
        )
    } else {
        format!(
            "project: `{}` dir: `{}` workspace: `{}`",
            result.project_name, result.repo_rel_dir, result.workspace
        )
    }
}

/// Bitbucket doesn't render `<details>`.
fn supports_folding(host: VcsHostType) -> bool {
    !matches!(host, VcsHostType::BitbucketCloud | VcsHostType::BitbucketServer)
}

fn code_block(lang: &str, content: &str, folding: bool) -> String {
    let block = format!("```{}\n{}\n```", lang, content);
    if folding && content.lines().count() > MAX_UNWRAPPED_LINES {
        format!("<details><summary>Show Output</summary>\n\n{}\n</details>", block)
    } else {
        block
    }
}
