//! Conditions a pull request must meet before a project can be applied.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::git::WorkingDir;
use crate::types::ProjectPlanStatus;
use crate::vcs::{self, VcsClient};

use super::context::ProjectContext;

/// An apply requirement, as written in `atlantis.yaml` or `--require-*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApplyRequirement {
    /// Approved by someone other than the author.
    Approved,
    Mergeable,
    /// The base branch hasn't moved past the clone.
    Undiverged,
    PoliciesPassed,
}

impl ApplyRequirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyRequirement::Approved => "approved",
            ApplyRequirement::Mergeable => "mergeable",
            ApplyRequirement::Undiverged => "undiverged",
            ApplyRequirement::PoliciesPassed => "policies_passed",
        }
    }

    fn failure_message(&self) -> &'static str {
        match self {
            ApplyRequirement::Approved => {
                "Pull request must be approved by at least one person other than the author before running apply."
            }
            ApplyRequirement::Mergeable => "Pull request must be mergeable before running apply.",
            ApplyRequirement::Undiverged => {
                "Default branch must be rebased onto pull request before running apply."
            }
            ApplyRequirement::PoliciesPassed => {
                "All policies must pass for project before running apply."
            }
        }
    }
}

impl fmt::Display for ApplyRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown requirement name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRequirement(pub String);

impl FromStr for ApplyRequirement {
    type Err = UnknownRequirement;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ApplyRequirement::Approved),
            "mergeable" => Ok(ApplyRequirement::Mergeable),
            "undiverged" => Ok(ApplyRequirement::Undiverged),
            "policies_passed" => Ok(ApplyRequirement::PoliciesPassed),
            other => Err(UnknownRequirement(other.to_string())),
        }
    }
}

/// Checks the project's requirements in a fixed order.
///
/// Returns the first failure as a message for the user, or `None` when
/// every requirement is met.
pub async fn check_apply_requirements(
    ctx: &ProjectContext,
    vcs: &dyn VcsClient,
    working_dir: &dyn WorkingDir,
    repo_dir: &Path,
) -> vcs::Result<Option<String>> {
    let mut requirements = ctx.apply_requirements.clone();
    requirements.sort();
    requirements.dedup();

    for requirement in requirements {
        let met = match requirement {
            ApplyRequirement::Approved => vcs.pull_is_approved(ctx.base_repo(), &ctx.pull).await?,
            ApplyRequirement::Mergeable => vcs.pull_is_mergeable(ctx.base_repo(), &ctx.pull).await?,
            ApplyRequirement::Undiverged => !working_dir.has_diverged(repo_dir).await,
            ApplyRequirement::PoliciesPassed => {
                ctx.prior_status != Some(ProjectPlanStatus::PolicyCheckErrored)
            }
        };
        if !met {
            debug!(requirement = %requirement, "Apply requirement not met");
            return Ok(Some(requirement.failure_message().to_string()));
        }
    }
    Ok(None)
}
