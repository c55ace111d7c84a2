//! Commit statuses summarizing a command across all projects.
//!
//! Each command has one status context, `atlantis/{command}`, on the pull
//! request's head commit.

use std::sync::Arc;

use tracing::warn;

use crate::commands::CommandName;
use crate::types::{PullRequest, Repo};
use crate::vcs::{CommitStatus, VcsClient};

/// Sets `atlantis/{command}` commit statuses.
#[derive(Clone)]
pub struct CommitStatusUpdater {
    vcs: Arc<dyn VcsClient>,
    /// Linked from every status.
    url: String,
}

impl std::fmt::Debug for CommitStatusUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitStatusUpdater")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// The status context for a command.
pub fn status_context(command: CommandName) -> String {
    format!("atlantis/{}", command)
}

fn verb(command: CommandName) -> &'static str {
    match command {
        CommandName::Plan => "planned",
        CommandName::PolicyCheck => "policies checked",
        CommandName::Apply => "applied",
        CommandName::ApprovePolicies => "approved",
        CommandName::Unlock => "unlocked",
        CommandName::Version => "versioned",
    }
}

impl CommitStatusUpdater {
    pub fn new(vcs: Arc<dyn VcsClient>, url: impl Into<String>) -> Self {
        CommitStatusUpdater {
            vcs,
            url: url.into(),
        }
    }

    /// Sets the command's status with a generic description.
    ///
    /// Status updates are best effort; failures are logged.
    pub async fn update_combined(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        state: CommitStatus,
        command: CommandName,
    ) {
        let words = match state {
            CommitStatus::Pending => "in progress...",
            CommitStatus::Success => "succeeded.",
            CommitStatus::Failed => "failed.",
        };
        let description = format!("{} {}", command.title(), words);
        self.set(repo, pull, state, command, &description).await;
    }

    /// Sets the command's status to `{n}/{total} projects {verb} successfully.`
    pub async fn update_combined_count(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        state: CommitStatus,
        command: CommandName,
        num_success: usize,
        num_total: usize,
    ) {
        let description = format!(
            "{}/{} projects {} successfully.",
            num_success,
            num_total,
            verb(command)
        );
        self.set(repo, pull, state, command, &description).await;
    }

    async fn set(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        state: CommitStatus,
        command: CommandName,
        description: &str,
    ) {
        let context = status_context(command);
        if let Err(e) = self
            .vcs
            .update_status(repo, pull, state, &context, description, &self.url)
            .await
        {
            warn!(context = %context, error = %e, "Unable to update commit status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeVcs, pull, repo};

    #[tokio::test]
    async fn descriptions() {
        let vcs = Arc::new(FakeVcs::default());
        let updater = CommitStatusUpdater::new(vcs.clone(), "https://atlantis.example.com");

        updater
            .update_combined(&repo(), &pull(1), CommitStatus::Pending, CommandName::Plan)
            .await;
        updater
            .update_combined(&repo(), &pull(1), CommitStatus::Failed, CommandName::PolicyCheck)
            .await;
        updater
            .update_combined_count(
                &repo(),
                &pull(1),
                CommitStatus::Success,
                CommandName::Apply,
                2,
                3,
            )
            .await;
        updater
            .update_combined_count(
                &repo(),
                &pull(1),
                CommitStatus::Success,
                CommandName::PolicyCheck,
                1,
                1,
            )
            .await;

        assert_eq!(
            vcs.statuses(),
            vec![
                (CommitStatus::Pending, "atlantis/plan".into(), "Plan in progress...".into()),
                (
                    CommitStatus::Failed,
                    "atlantis/policy_check".into(),
                    "Policy Check failed.".into()
                ),
                (
                    CommitStatus::Success,
                    "atlantis/apply".into(),
                    "2/3 projects applied successfully.".into()
                ),
                (
                    CommitStatus::Success,
                    "atlantis/policy_check".into(),
                    "1/1 projects policies checked successfully.".into()
                ),
            ]
        );
    }
}
